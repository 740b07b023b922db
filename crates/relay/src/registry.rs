//! Resource registry
//!
//! Identity-keyed table of live resource sessions, mutated under a single
//! lock. At most one live session per identity: a successful re-handshake
//! with the same public key evicts the previous session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use portway_core::{Identity, ResourceRecord};

use crate::session::ResourceSession;

#[derive(Default)]
pub struct Registry {
    inner: Mutex<HashMap<Identity, Arc<ResourceSession>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a freshly authenticated session, returning the session it
    /// displaced (the caller closes it).
    pub fn admit(&self, session: Arc<ResourceSession>) -> Option<Arc<ResourceSession>> {
        self.inner
            .lock()
            .unwrap()
            .insert(session.identity, session)
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<ResourceSession>> {
        self.inner.lock().unwrap().get(identity).cloned()
    }

    /// Remove the entry for `identity`, but only while it still maps to the
    /// session with handle `id`. An evicted session's cleanup must not take
    /// its successor down with it.
    pub fn remove_if_current(&self, identity: &Identity, id: u32) -> bool {
        let mut map = self.inner.lock().unwrap();
        if map.get(identity).is_some_and(|s| s.id == id) {
            map.remove(identity);
            true
        } else {
            false
        }
    }

    pub fn list(&self) -> Vec<ResourceRecord> {
        let mut records: Vec<ResourceRecord> = self
            .inner
            .lock()
            .unwrap()
            .values()
            .map(|s| s.record())
            .collect();
        records.sort_by_key(|r| r.handle);
        records
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Remove and return every session, for shutdown.
    pub fn drain(&self) -> Vec<Arc<ResourceSession>> {
        self.inner.lock().unwrap().drain().map(|(_, s)| s).collect()
    }
}
