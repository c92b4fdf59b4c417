//! Keyed store of parked connections
//!
//! No implicit eviction: entries stay until a build decision or process exit
//! removes them.

use crate::configuration::ConnectionConfiguration;
use crate::connection::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Deferred teardown work.
pub type ShutdownFn = Box<dyn FnOnce() + Send>;

/// A parked connection and everything needed to finish shutting it down.
pub struct CacheEntry<R: Connection> {
    configuration: ConnectionConfiguration<R::Event>,
    resource: Arc<R>,
    shutdown: ShutdownFn,
    shutdown_signal: Option<ShutdownFn>,
}

impl<R: Connection> CacheEntry<R> {
    pub fn new(
        configuration: ConnectionConfiguration<R::Event>,
        resource: Arc<R>,
        shutdown: ShutdownFn,
    ) -> Self {
        Self {
            configuration,
            resource,
            shutdown,
            shutdown_signal: None,
        }
    }

    pub fn configuration(&self) -> &ConnectionConfiguration<R::Event> {
        &self.configuration
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn has_shutdown_signal(&self) -> bool {
        self.shutdown_signal.is_some()
    }

    /// Run the parked teardown, then the deferred shutdown signal.
    pub fn discard(self) {
        (self.shutdown)();
        if let Some(signal) = self.shutdown_signal {
            signal();
        }
    }

    /// Take the connection back; the parked teardown and signal never run.
    pub fn reclaim(self) -> (ConnectionConfiguration<R::Event>, Arc<R>) {
        (self.configuration, self.resource)
    }
}

impl<R: Connection> std::fmt::Debug for CacheEntry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("configuration", &self.configuration)
            .field("has_shutdown_signal", &self.has_shutdown_signal())
            .finish_non_exhaustive()
    }
}

/// Parked connections by session key.
pub struct ResourceCache<R: Connection> {
    entries: Mutex<HashMap<String, CacheEntry<R>>>,
}

impl<R: Connection> ResourceCache<R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<R>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The parked connection under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<R>> {
        self.lock().get(key).map(|entry| Arc::clone(&entry.resource))
    }

    /// Park `entry`, returning whatever was parked under `key` before.
    pub fn set(&self, key: impl Into<String>, entry: CacheEntry<R>) -> Option<CacheEntry<R>> {
        self.lock().insert(key.into(), entry)
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry<R>> {
        self.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Attach a deferred shutdown signal to the entry under `key`.
    ///
    /// Hands `signal` back when nothing is parked there.
    pub fn attach_shutdown_signal(&self, key: &str, signal: ShutdownFn) -> Result<(), ShutdownFn> {
        match self.lock().get_mut(key) {
            Some(entry) => {
                entry.shutdown_signal = Some(signal);
                Ok(())
            }
            None => Err(signal),
        }
    }

    /// Remove every entry.
    pub fn drain(&self) -> Vec<(String, CacheEntry<R>)> {
        self.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<R: Connection> Default for ResourceCache<R> {
    fn default() -> Self {
        Self::new()
    }
}
