//! Wall-clock gated session lifecycle.
//!
//! The controller blocks until the configured start time, flips the
//! session to `Active`, spawns the monitoring/risk/cycle workers, and
//! arms the end-of-session timer. Single-day semantics against the
//! host's local clock; a process started after the window alerts
//! "session missed" and never activates.

use chrono::{Local, NaiveTime};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::SessionState;

use crate::alerts::AlertSink;
use crate::closer::Closer;
use crate::monitor::PositionBook;
use crate::scheduler::CycleProgress;
use crate::ShutdownToken;

type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The background workers the controller owns for the session's
/// lifetime. Each observes session state or the shutdown token and
/// terminates on its own.
pub struct SessionWorkers {
    pub monitor: WorkerFuture,
    pub risk: WorkerFuture,
    pub scheduler: WorkerFuture,
}

/// Shared session state: the controller publishes transitions, the
/// scheduler and the shutdown coordinator observe and (for `end`)
/// drive them. All transitions are idempotent.
pub struct SessionHandle {
    state_tx: watch::Sender<SessionState>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Waiting);
        Self { state_tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Waiting → Active. Returns true for the transitioning caller.
    pub fn set_active(&self) -> bool {
        let mut transitioned = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Waiting {
                *state = SessionState::Active;
                transitioned = true;
                true
            } else {
                false
            }
        });
        transitioned
    }

    /// Any state → Ended. Returns true for the first ender only.
    pub fn end(&self) -> bool {
        let mut transitioned = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Ended {
                false
            } else {
                *state = SessionState::Ended;
                transitioned = true;
                true
            }
        });
        transitioned
    }
}

pub struct SessionController {
    handle: Arc<SessionHandle>,
    start_time: NaiveTime,
    end_time: NaiveTime,
    closer: Arc<Closer>,
    book: Arc<PositionBook>,
    progress: Arc<CycleProgress>,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    shutdown: ShutdownToken,
    clock: Box<dyn Fn() -> NaiveTime + Send + Sync>,
}

impl SessionController {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: Arc<SessionHandle>,
        start_time: NaiveTime,
        end_time: NaiveTime,
        closer: Arc<Closer>,
        book: Arc<PositionBook>,
        progress: Arc<CycleProgress>,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            handle,
            start_time,
            end_time,
            closer,
            book,
            progress,
            alerts,
            events,
            shutdown,
            clock: Box::new(|| Local::now().time()),
        }
    }

    /// Replaces the wall-clock source. Test hook.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_active()
    }

    /// Runs the whole session to completion: wait for the window,
    /// activate, spawn workers, end at the window's close (or earlier
    /// on shutdown). Blocking in the async sense.
    pub async fn run(&self, workers: SessionWorkers) {
        let now = (self.clock)();

        if now >= self.end_time {
            tracing::warn!(
                target: "ironfly::session",
                now = %now,
                session_end = %self.end_time,
                "session window already over, not starting"
            );
            self.alerts.alert(&format!(
                "SESSION ⏰ session missed\nCurrent time: {now}\nSession end: {}\nThe session will not start today",
                self.end_time,
            ));
            self.handle.end();
            return;
        }

        if now < self.start_time {
            let wait = duration_between(now, self.start_time);
            tracing::info!(
                target: "ironfly::session",
                now = %now,
                session_start = %self.start_time,
                wait_secs = wait.as_secs(),
                "waiting for session start"
            );
            self.alerts.notify(&format!(
                "SESSION ⏳ waiting for session start\nNow: {now}\nStart: {}\nEnd: {}",
                self.start_time, self.end_time,
            ));
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = shutdown.cancelled() => {
                    self.end_session("shutdown requested before session start").await;
                    return;
                }
            }
        }

        self.activate(workers);

        let remaining = duration_between((self.clock)(), self.end_time);
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            () = tokio::time::sleep(remaining) => {
                self.end_session("session end reached").await;
            }
            () = shutdown.cancelled() => {
                self.end_session("shutdown requested").await;
            }
        }
    }

    fn activate(&self, workers: SessionWorkers) {
        if !self.handle.set_active() {
            return;
        }
        tracing::info!(
            target: "ironfly::session",
            start = %self.start_time,
            end = %self.end_time,
            "trading session started"
        );
        self.events.emit(
            Event::new(EventKind::SessionStarted)
                .with("start", self.start_time)
                .with("end", self.end_time)
                .with("cycles", self.progress.total()),
        );
        self.alerts.notify(&format!(
            "SESSION ✅ trading session active\nWindow: {} - {}\nStarting trading cycles",
            self.start_time, self.end_time,
        ));

        tokio::spawn(workers.monitor);
        tokio::spawn(workers.risk);
        tokio::spawn(workers.scheduler);
    }

    /// Idempotent session end: stop the scheduler through the state
    /// channel, flatten what is still open, publish the summary.
    pub async fn end_session(&self, reason: &str) {
        if !self.handle.end() {
            return;
        }
        tracing::info!(target: "ironfly::session", reason, "ending trading session");

        let open = self.book.open_count();
        if open > 0 {
            tracing::info!(
                target: "ironfly::session",
                open,
                "closing remaining open positions at session end"
            );
            self.closer.close_all(reason).await;
        }

        self.events.emit(
            Event::new(EventKind::SessionEnded)
                .with("reason", reason)
                .with("cycles_completed", self.progress.completed())
                .with("cycles_total", self.progress.total())
                .with("positions", self.book.total_count()),
        );
        self.alerts.notify(&format!(
            "SESSION 🏁 trading session ended\nReason: {reason}\nCycles: {}/{}\nPositions: {}",
            self.progress.completed(),
            self.progress.total(),
            self.book.total_count(),
        ));
    }
}

/// Seconds from `from` to `to` on the same day, saturating at zero.
fn duration_between(from: NaiveTime, to: NaiveTime) -> Duration {
    let seconds = (to - from).num_seconds().max(0);
    Duration::from_secs(seconds as u64)
}
