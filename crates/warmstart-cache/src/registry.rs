//! Durable per-key record of connection sessions

use crate::error::ContinuityError;
use crate::session::SessionState;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What is known about the latest session opened for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub key: String,
    /// State of the most recent session
    pub state: SessionState,
    /// Sessions opened for this key so far
    pub attempts: u64,
    /// How many of them reused a parked connection
    pub reused: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new session for `key` and return its attempt number.
    pub(crate) fn open(&self, key: &str) -> u64 {
        let mut records = self.lock();
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| SessionRecord {
                key: key.to_string(),
                state: SessionState::Open,
                attempts: 0,
                reused: 0,
            });
        record.state = SessionState::Open;
        record.attempts += 1;
        record.attempts
    }

    pub(crate) fn transition(&self, key: &str, state: SessionState) {
        if let Some(record) = self.lock().get_mut(key) {
            record.state = state;
            if state == SessionState::Reused {
                record.reused += 1;
            }
        }
    }

    /// The record for `key`; fails when no session was ever opened for it.
    pub fn get_session(&self, key: &str) -> Result<SessionRecord, ContinuityError> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| ContinuityError::UnknownSession {
                key: key.to_string(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }
}
