//! In-memory session store
//!
//! Maps the session cookie to the last trial run under it. Ids are minted
//! here and anything else a client sends is treated as no session. The store
//! holds at most `limit` sessions, evicting the least recently used, and a
//! session is dropped once its shutdown has been taken.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

/// What `/_kill` needs to know about a session's last trial
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTrial {
    pub clone_path: PathBuf,
    pub project: String,
}

#[derive(Debug, Default)]
struct Sessions {
    trials: HashMap<String, RecordedTrial>,
    /// Least recently used first
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct SessionStore {
    limit: usize,
    sessions: Mutex<Sessions>,
}

impl SessionStore {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            sessions: Mutex::new(Sessions::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a trial under `session` when that id is live here, otherwise
    /// under a new id. Returns the id the trial was recorded under.
    pub fn record(&self, session: Option<&str>, trial: RecordedTrial) -> String {
        let mut guard = self.lock();
        let sessions = &mut *guard;

        let id = match session {
            Some(id) if sessions.trials.contains_key(id) => {
                sessions.order.retain(|s| s != id);
                id.to_string()
            }
            _ => Uuid::new_v4().to_string(),
        };
        sessions.trials.insert(id.clone(), trial);
        sessions.order.push_back(id.clone());

        while sessions.order.len() > self.limit {
            if let Some(oldest) = sessions.order.pop_front() {
                sessions.trials.remove(&oldest);
            }
        }
        id
    }

    /// Remove and return the trial recorded for `session`
    pub fn take(&self, session: &str) -> Option<RecordedTrial> {
        let mut guard = self.lock();
        let sessions = &mut *guard;

        let trial = sessions.trials.remove(session)?;
        sessions.order.retain(|s| s != session);
        Some(trial)
    }

    #[cfg(test)]
    pub fn count(&self) -> usize {
        self.lock().trials.len()
    }
}
