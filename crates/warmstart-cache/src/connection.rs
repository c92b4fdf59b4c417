use crate::sink::EventSink;
use std::sync::Arc;

/// An external connection that can outlive a restart.
pub trait Connection: Send + Sync + 'static {
    type Event: Send + 'static;

    /// The sink the connection was constructed with.
    fn event_sink(&self) -> Arc<dyn EventSink<Self::Event>>;

    /// Events re-delivered to a generation that reuses this connection:
    /// the status transition, one ready event per unit, then the overall
    /// ready event.
    fn ready_events(&self) -> Vec<Self::Event>;
}
