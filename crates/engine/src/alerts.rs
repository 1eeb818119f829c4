//! Operator alerting: the outbound sink trait and the repeat-error
//! throttle that keeps a flapping venue from flooding the operator.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outbound operator messaging. Both methods are fire-and-forget:
/// implementations must swallow their own failures — a broken chat
/// bridge never takes the engine down with it.
///
/// Message texts are short human-readable lines prefixed with one of
/// the conventional tags (CYCLE, POSITION, RISK, ORDER, SESSION,
/// SHUTDOWN).
pub trait AlertSink: Send + Sync {
    /// Something requiring operator attention.
    fn alert(&self, text: &str);

    /// Informational update.
    fn notify(&self, text: &str);
}

/// Sink that only writes to the log. Used when no chat credentials are
/// configured, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter;

impl AlertSink for LogAlerter {
    fn alert(&self, text: &str) {
        tracing::warn!(target: "ironfly::alerts", "ALERT: {text}");
    }

    fn notify(&self, text: &str) {
        tracing::info!(target: "ironfly::alerts", "NOTIFY: {text}");
    }
}

#[derive(Debug, Default)]
struct ThrottleEntry {
    count: u32,
    last_alert: Option<Instant>,
}

/// Limits repeated error alerts: identical `(error_code, context)`
/// pairs must occur at least `threshold` times, and then alert at most
/// once per cooldown window. Rate-limit alerts bypass the count
/// threshold but use a doubled cooldown.
pub struct AlertThrottle {
    threshold: u32,
    cooldown: Duration,
    entries: Mutex<HashMap<String, ThrottleEntry>>,
}

impl std::fmt::Debug for AlertThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertThrottle")
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("tracked", &self.entries.lock().len())
            .finish()
    }
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5 * 60))
    }
}

impl AlertThrottle {
    #[must_use]
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records one occurrence of `(error_code, context)` and reports
    /// whether an operator alert should go out now.
    pub fn should_alert(&self, error_code: &str, context: &str) -> bool {
        let key = format!("{error_code}_{context}");
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_default();
        entry.count += 1;

        if entry.count < self.threshold {
            return false;
        }
        self.cooled_down(entry, self.cooldown)
    }

    /// Rate-limit variant: no count threshold, doubled cooldown. The
    /// venue telling us to slow down is worth one line, not a stream.
    pub fn should_alert_rate_limit(&self, context: &str) -> bool {
        let key = format!("RATE_LIMIT_{context}");
        let mut entries = self.entries.lock();
        let entry = entries.entry(key).or_default();
        entry.count += 1;
        self.cooled_down(entry, self.cooldown * 2)
    }

    /// Occurrence count for a pair, for diagnostics.
    #[must_use]
    pub fn count(&self, error_code: &str, context: &str) -> u32 {
        let key = format!("{error_code}_{context}");
        self.entries.lock().get(&key).map_or(0, |e| e.count)
    }

    /// Clears all counters and alert timestamps.
    pub fn reset(&self) {
        self.entries.lock().clear();
        tracing::info!(target: "ironfly::alerts", "alert throttle reset");
    }

    fn cooled_down(&self, entry: &mut ThrottleEntry, cooldown: Duration) -> bool {
        match entry.last_alert {
            Some(last) if last.elapsed() < cooldown => false,
            _ => {
                entry.last_alert = Some(Instant::now());
                true
            }
        }
    }
}
