//! Fires the butterfly builder N times across the session.
//!
//! The first cycle runs immediately on activation; later cycles run at
//! fixed deadlines from the start. A build that overruns its slot is
//! followed immediately by the next cycle — deadlines never queue up,
//! and cycles never overlap because this is a single worker loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use ironfly_core::events::{Event, EventKind, EventSink};
use ironfly_core::models::SessionState;

use crate::alerts::AlertSink;
use crate::builder::ButterflyBuilder;
use crate::ShutdownToken;

/// Published cycle counters for observability.
#[derive(Debug)]
pub struct CycleProgress {
    completed: AtomicU32,
    total: u32,
}

impl CycleProgress {
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            completed: AtomicU32::new(0),
            total,
        }
    }

    #[must_use]
    pub fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    fn record(&self, cycle: u32) {
        self.completed.store(cycle, Ordering::SeqCst);
    }
}

pub struct CycleScheduler {
    builder: Arc<ButterflyBuilder>,
    progress: Arc<CycleProgress>,
    interval: Duration,
    session: watch::Receiver<SessionState>,
    risk_latch: Arc<std::sync::atomic::AtomicBool>,
    alerts: Arc<dyn AlertSink>,
    events: Arc<dyn EventSink>,
    shutdown: ShutdownToken,
}

impl CycleScheduler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        builder: Arc<ButterflyBuilder>,
        progress: Arc<CycleProgress>,
        interval: Duration,
        session: watch::Receiver<SessionState>,
        risk_latch: Arc<std::sync::atomic::AtomicBool>,
        alerts: Arc<dyn AlertSink>,
        events: Arc<dyn EventSink>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            builder,
            progress,
            interval,
            session,
            risk_latch,
            alerts,
            events,
            shutdown,
        }
    }

    /// Runs the cycle loop to completion or early termination.
    pub async fn run(mut self) {
        let total = self.progress.total();
        tracing::info!(
            target: "ironfly::session",
            cycles = total,
            interval_secs = self.interval.as_secs(),
            "cycle scheduler started"
        );
        let started = Instant::now();

        for cycle in 1..=total {
            if self.should_stop() {
                return;
            }

            self.alerts.notify(&format!("CYCLE 🔄 cycle {cycle}/{total} starting"));
            match self.builder.build_one().await {
                Ok(position_id) => {
                    tracing::info!(
                        target: "ironfly::session",
                        cycle,
                        total,
                        position_id = %position_id,
                        "cycle completed"
                    );
                    self.events.emit(
                        Event::new(EventKind::CycleCompleted)
                            .with("cycle", cycle)
                            .with("total", total)
                            .with("position_id", position_id),
                    );
                }
                Err(err) => {
                    tracing::error!(
                        target: "ironfly::session",
                        cycle,
                        total,
                        error = %err,
                        "cycle failed"
                    );
                    self.events.emit(
                        Event::new(EventKind::CycleFailed)
                            .with("cycle", cycle)
                            .with("total", total)
                            .with("error", &err),
                    );
                    self.alerts.alert(&format!("CYCLE ❌ cycle {cycle}/{total} failed: {err}"));
                }
            }
            self.progress.record(cycle);

            if cycle == total {
                self.alerts.notify(&format!(
                    "CYCLE ✅ all {total} cycles completed\nMonitoring positions until session end",
                ));
                tracing::info!(target: "ironfly::session", total, "all cycles completed");
                return;
            }

            // An overrun slot runs the next cycle immediately; the
            // deadline grid stays anchored to the start.
            let deadline = started + self.interval * cycle;
            if !self.wait_until(deadline).await {
                return;
            }
        }
    }

    fn should_stop(&self) -> bool {
        if self.shutdown.is_shutdown() {
            tracing::info!(target: "ironfly::session", "scheduler stopping: shutdown requested");
            return true;
        }
        if self.risk_latch.load(Ordering::SeqCst) {
            tracing::warn!(
                target: "ironfly::session",
                "scheduler stopping: portfolio stop-loss triggered"
            );
            return true;
        }
        if *self.session.borrow() != SessionState::Active {
            tracing::info!(target: "ironfly::session", "scheduler stopping: session not active");
            return true;
        }
        false
    }

    /// Sleeps until `deadline`, waking early for shutdown or a session
    /// state change. Returns false when the loop should stop.
    async fn wait_until(&mut self, deadline: Instant) -> bool {
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return !self.should_stop(),
                () = self.shutdown.cancelled() => return false,
                changed = self.session.changed() => {
                    if changed.is_err() || *self.session.borrow() != SessionState::Active {
                        tracing::info!(
                            target: "ironfly::session",
                            "scheduler stopping during wait: session ended"
                        );
                        return false;
                    }
                }
            }
        }
    }
}
