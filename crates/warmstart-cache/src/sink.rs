//! Event sinks
//!
//! A connection delivers its events to one [`EventSink`]. Applications use a
//! [`ListenerSink`] (or their own sink); the continuity layer wraps it in a
//! [`BufferingEventSink`] so events keep queuing while no generation is
//! running.

use crate::error::SinkError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Receives events from a sink.
pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

pub type SharedListener<E> = Arc<dyn EventListener<E>>;

/// Destination for a connection's events.
pub trait EventSink<E>: Send + Sync {
    /// Deliver one event.
    fn handle(&self, event: E);

    fn register(&self, listener: SharedListener<E>) -> Result<(), SinkError>;

    /// Remove a listener previously registered (compared by identity).
    fn unregister(&self, listener: &SharedListener<E>) -> Result<(), SinkError>;

    fn registered_listeners(&self) -> Result<Vec<SharedListener<E>>, SinkError>;

    /// Downcast to the buffering sink, if that is what this is.
    fn as_buffering(self: Arc<Self>) -> Option<Arc<BufferingEventSink<E>>> {
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Default sink: dispatches each event to every listener in registration order.
pub struct ListenerSink<E> {
    listeners: Mutex<Vec<SharedListener<E>>>,
}

impl<E> ListenerSink<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Default for ListenerSink<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send> EventSink<E> for ListenerSink<E> {
    fn handle(&self, event: E) {
        let listeners = lock(&self.listeners).clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn register(&self, listener: SharedListener<E>) -> Result<(), SinkError> {
        lock(&self.listeners).push(listener);
        Ok(())
    }

    fn unregister(&self, listener: &SharedListener<E>) -> Result<(), SinkError> {
        lock(&self.listeners).retain(|existing| !Arc::ptr_eq(existing, listener));
        Ok(())
    }

    fn registered_listeners(&self) -> Result<Vec<SharedListener<E>>, SinkError> {
        Ok(lock(&self.listeners).clone())
    }
}

struct BufferState<E> {
    delegate: Option<Arc<dyn EventSink<E>>>,
    buffer: VecDeque<E>,
    /// A replay loop is draining `buffer`; new events queue behind it.
    replaying: bool,
}

/// Relay that queues events while detached and replays them once attached.
///
/// Buffered events reach the delegate in arrival order, exactly once, and
/// before any event handled after the delegate was set. Delivery happens
/// outside the sink's lock, so listeners may call back into this sink.
pub struct BufferingEventSink<E> {
    state: Mutex<BufferState<E>>,
}

impl<E: Send + 'static> BufferingEventSink<E> {
    /// A detached sink.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                delegate: None,
                buffer: VecDeque::new(),
                replaying: false,
            }),
        }
    }

    /// A sink attached to `delegate`.
    pub fn with_delegate(delegate: Arc<dyn EventSink<E>>) -> Result<Self, SinkError> {
        let sink = Self::new();
        sink.set_delegate(delegate)?;
        Ok(sink)
    }

    /// Attach to `delegate` and flush every buffered event to it.
    pub fn set_delegate(&self, delegate: Arc<dyn EventSink<E>>) -> Result<(), SinkError> {
        self.reattach(delegate, std::iter::empty())
    }

    /// Attach to `delegate`, flush the buffer, then deliver `trailing`.
    ///
    /// `trailing` is queued behind the buffer before the delegate is
    /// installed, so no event handled meanwhile can come between the two.
    pub fn reattach(
        &self,
        delegate: Arc<dyn EventSink<E>>,
        trailing: impl IntoIterator<Item = E>,
    ) -> Result<(), SinkError> {
        if Arc::clone(&delegate).as_buffering().is_some() {
            return Err(SinkError::Loop);
        }

        let mut state = lock(&self.state);
        state.buffer.extend(trailing);
        state.delegate = Some(delegate);
        if state.replaying {
            // The running replay loop picks up the new delegate.
            return Ok(());
        }
        state.replaying = true;

        loop {
            let batch = std::mem::take(&mut state.buffer);
            if batch.is_empty() {
                break;
            }
            let Some(target) = state.delegate.clone() else {
                state.buffer = batch;
                break;
            };
            drop(state);

            trace!("Replaying {} buffered events", batch.len());
            for event in batch {
                target.handle(event);
            }
            state = lock(&self.state);
        }
        state.replaying = false;
        Ok(())
    }

    /// Stop delivering; events buffer until the next [`BufferingEventSink::set_delegate`].
    pub fn detach(&self) -> Option<Arc<dyn EventSink<E>>> {
        lock(&self.state).delegate.take()
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.state).delegate.is_some()
    }

    /// Number of events waiting for a delegate.
    pub fn buffered(&self) -> usize {
        lock(&self.state).buffer.len()
    }

    fn delegate(&self) -> Result<Arc<dyn EventSink<E>>, SinkError> {
        lock(&self.state).delegate.clone().ok_or(SinkError::Detached)
    }
}

impl<E: Send + 'static> Default for BufferingEventSink<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> EventSink<E> for BufferingEventSink<E> {
    fn handle(&self, event: E) {
        let mut state = lock(&self.state);
        let target = match &state.delegate {
            Some(delegate) if !state.replaying => Arc::clone(delegate),
            _ => {
                state.buffer.push_back(event);
                return;
            }
        };
        drop(state);
        target.handle(event);
    }

    fn register(&self, listener: SharedListener<E>) -> Result<(), SinkError> {
        self.delegate()?.register(listener)
    }

    fn unregister(&self, listener: &SharedListener<E>) -> Result<(), SinkError> {
        self.delegate()?.unregister(listener)
    }

    fn registered_listeners(&self) -> Result<Vec<SharedListener<E>>, SinkError> {
        self.delegate()?.registered_listeners()
    }

    fn as_buffering(self: Arc<Self>) -> Option<Arc<BufferingEventSink<E>>> {
        Some(self)
    }
}
