//! Structured event emission with a closed taxonomy.
//!
//! Components describe what happened through [`Event`] values and hand
//! them to an [`EventSink`]; the default sink renders them through
//! `tracing` under per-area targets so log routing can split order flow
//! from risk flow. Sink failures never propagate.

/// The finite set of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ApplicationStarted,
    SessionStarted,
    SessionEnded,
    CycleCompleted,
    CycleFailed,
    OrderPlaced,
    OrderFilled,
    OrderModified,
    OrderTimeout,
    PositionCreated,
    PositionClosed,
    RiskEvent,
    UncaughtException,
    GracefulShutdownStarted,
    GracefulShutdownCompleted,
    EmergencyShutdown,
}

/// Logical log area an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    Session,
    Orders,
    Positions,
    Risk,
    Trading,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ApplicationStarted => "APPLICATION_STARTED",
            EventKind::SessionStarted => "SESSION_STARTED",
            EventKind::SessionEnded => "SESSION_ENDED",
            EventKind::CycleCompleted => "CYCLE_COMPLETED",
            EventKind::CycleFailed => "CYCLE_FAILED",
            EventKind::OrderPlaced => "ORDER_PLACED",
            EventKind::OrderFilled => "ORDER_FILLED",
            EventKind::OrderModified => "ORDER_MODIFIED",
            EventKind::OrderTimeout => "ORDER_TIMEOUT",
            EventKind::PositionCreated => "POSITION_CREATED",
            EventKind::PositionClosed => "POSITION_CLOSED",
            EventKind::RiskEvent => "RISK_EVENT",
            EventKind::UncaughtException => "UNCAUGHT_EXCEPTION",
            EventKind::GracefulShutdownStarted => "GRACEFUL_SHUTDOWN_STARTED",
            EventKind::GracefulShutdownCompleted => "GRACEFUL_SHUTDOWN_COMPLETED",
            EventKind::EmergencyShutdown => "EMERGENCY_SHUTDOWN",
        }
    }

    fn area(self) -> Area {
        match self {
            EventKind::ApplicationStarted
            | EventKind::SessionStarted
            | EventKind::SessionEnded
            | EventKind::CycleCompleted
            | EventKind::CycleFailed
            | EventKind::GracefulShutdownStarted
            | EventKind::GracefulShutdownCompleted
            | EventKind::EmergencyShutdown => Area::Session,
            EventKind::OrderPlaced
            | EventKind::OrderFilled
            | EventKind::OrderModified
            | EventKind::OrderTimeout => Area::Orders,
            EventKind::PositionCreated | EventKind::PositionClosed => Area::Positions,
            EventKind::RiskEvent => Area::Risk,
            EventKind::UncaughtException => Area::Trading,
        }
    }

    fn is_warning(self) -> bool {
        matches!(
            self,
            EventKind::CycleFailed
                | EventKind::OrderTimeout
                | EventKind::RiskEvent
                | EventKind::UncaughtException
                | EventKind::EmergencyShutdown
        )
    }
}

/// One structured event: a kind plus free-form key/value context.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub context: Vec<(&'static str, String)>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            context: Vec::new(),
        }
    }

    /// Appends a context pair. Chains.
    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    fn render_context(&self) -> String {
        self.context
            .iter()
            .map(|(k, v)| format!("{}: {}", k.to_uppercase(), v))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Destination for structured events. Implementations must swallow
/// their own failures; `emit` is infallible by contract.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: renders events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: Event) {
        let kind = event.kind.as_str();
        let context = event.render_context();
        match (event.kind.area(), event.kind.is_warning()) {
            (Area::Session, false) => tracing::info!(target: "ironfly::session", "{kind} | {context}"),
            (Area::Session, true) => tracing::warn!(target: "ironfly::session", "{kind} | {context}"),
            (Area::Orders, false) => tracing::info!(target: "ironfly::orders", "{kind} | {context}"),
            (Area::Orders, true) => tracing::warn!(target: "ironfly::orders", "{kind} | {context}"),
            (Area::Positions, false) => tracing::info!(target: "ironfly::positions", "{kind} | {context}"),
            (Area::Positions, true) => tracing::warn!(target: "ironfly::positions", "{kind} | {context}"),
            (Area::Risk, _) => tracing::warn!(target: "ironfly::risk", "{kind} | {context}"),
            (Area::Trading, false) => tracing::info!(target: "ironfly::trading", "{kind} | {context}"),
            (Area::Trading, true) => tracing::warn!(target: "ironfly::trading", "{kind} | {context}"),
        }
    }
}

/// Sink that drops everything. Useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_screaming_snake() {
        assert_eq!(EventKind::OrderTimeout.as_str(), "ORDER_TIMEOUT");
        assert_eq!(EventKind::GracefulShutdownStarted.as_str(), "GRACEFUL_SHUTDOWN_STARTED");
        assert_eq!(EventKind::PositionClosed.as_str(), "POSITION_CLOSED");
    }

    #[test]
    fn context_renders_pipe_delimited() {
        let event = Event::new(EventKind::OrderPlaced)
            .with("order_id", 42)
            .with("symbol", "BTC-250801-60000-C");
        assert_eq!(event.render_context(), "ORDER_ID: 42 | SYMBOL: BTC-250801-60000-C");
    }

    #[test]
    fn warnings_are_classified() {
        assert!(EventKind::OrderTimeout.is_warning());
        assert!(EventKind::EmergencyShutdown.is_warning());
        assert!(!EventKind::OrderFilled.is_warning());
    }

    #[test]
    fn tracing_sink_emits_without_panicking() {
        let sink = TracingEventSink;
        sink.emit(Event::new(EventKind::ApplicationStarted).with("version", "test"));
        sink.emit(Event::new(EventKind::RiskEvent).with("type", "PORTFOLIO_STOP_LOSS"));
    }
}
