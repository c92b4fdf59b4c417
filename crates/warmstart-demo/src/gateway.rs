//! Simulated gateway connection
//!
//! Stands in for a chat gateway client: once connected it emits `Ready`,
//! then a heartbeat on a background thread until stopped. A parked gateway
//! keeps beating, so a restart replays the heartbeats that arrived while no
//! generation ran.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};
use warmstart_cache::{Connection, EventSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Ready { session_id: u64 },
    Heartbeat { sequence: u64 },
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

pub struct SimulatedGateway {
    session_id: u64,
    sink: Arc<dyn EventSink<GatewayEvent>>,
    heartbeat: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl SimulatedGateway {
    /// Open a new gateway session delivering to `sink`.
    pub fn connect(
        sink: Arc<dyn EventSink<GatewayEvent>>,
        interval: Duration,
    ) -> std::io::Result<Arc<Self>> {
        let session_id = NEXT_SESSION.fetch_add(1, Ordering::SeqCst);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        sink.handle(GatewayEvent::Ready { session_id });

        let beat_sink = Arc::clone(&sink);
        let handle = thread::Builder::new()
            .name(format!("gateway-{session_id}"))
            .spawn(move || {
                let mut sequence = 0;
                // Any message or a dropped sender stops the heartbeat.
                while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                    sequence += 1;
                    beat_sink.handle(GatewayEvent::Heartbeat { sequence });
                }
            })?;

        info!("Gateway session {session_id} connected");
        Ok(Arc::new(Self {
            session_id,
            sink,
            heartbeat: Mutex::new(Some((stop_tx, handle))),
        }))
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Stop the heartbeat and close the session.
    pub fn disconnect(&self) {
        let Some((stop, handle)) = self
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        drop(stop);
        if handle.join().is_err() {
            debug!("Heartbeat thread of session {} panicked", self.session_id);
        }
        info!("Gateway session {} disconnected", self.session_id);
    }

    pub fn is_connected(&self) -> bool {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Connection for SimulatedGateway {
    type Event = GatewayEvent;

    fn event_sink(&self) -> Arc<dyn EventSink<GatewayEvent>> {
        Arc::clone(&self.sink)
    }

    fn ready_events(&self) -> Vec<GatewayEvent> {
        vec![GatewayEvent::Ready {
            session_id: self.session_id,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warmstart_cache::ListenerSink;

    #[test]
    fn test_heartbeats_until_disconnected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(ListenerSink::new());
        let s = Arc::clone(&seen);
        sink.register(Arc::new(move |e: &GatewayEvent| {
            s.lock().unwrap().push(e.clone())
        }))
        .unwrap();

        let gateway = SimulatedGateway::connect(sink, Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(150));
        gateway.disconnect();
        assert!(!gateway.is_connected());

        let count = seen.lock().unwrap().len();
        assert!(count >= 3, "expected ready and heartbeats, got {count}");
        thread::sleep(Duration::from_millis(60));
        assert_eq!(seen.lock().unwrap().len(), count);
        assert_eq!(
            seen.lock().unwrap()[..2],
            [
                GatewayEvent::Ready {
                    session_id: gateway.session_id()
                },
                GatewayEvent::Heartbeat { sequence: 1 },
            ]
        );

        // Second disconnect is a no-op.
        gateway.disconnect();
    }

    #[test]
    fn test_ready_event_names_session() {
        let gateway =
            SimulatedGateway::connect(Arc::new(ListenerSink::new()), Duration::from_secs(60))
                .unwrap();
        assert_eq!(
            gateway.ready_events(),
            vec![GatewayEvent::Ready {
                session_id: gateway.session_id()
            }]
        );
        gateway.disconnect();
    }
}
