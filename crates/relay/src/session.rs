//! Relay-side session state
//!
//! One session per accepted socket. The registry is the sole owner of a
//! resource session's lifetime; a user session is owned by its connection
//! task. The binding maps are lazily-populated forwarding caches, not
//! membership — entries are pruned when a forward attempt finds the target
//! gone. `bound_users` holds weak references so sessions never keep each
//! other alive across the relay hop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use portway_core::{Identity, ResourceRecord};
use portway_net::PeerWriter;

static NEXT_HANDLE: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-unique session handle.
///
/// Handles are monotonic and never reused for the lifetime of the process;
/// that is what makes a stale binding detectable instead of silently hitting
/// an unrelated newer session.
pub fn allocate_handle() -> u32 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// A connection on the user port.
pub struct UserSession {
    pub id: u32,
    pub writer: PeerWriter,
    closed: Notify,
    bound_resources: Mutex<HashMap<u32, Arc<ResourceSession>>>,
}

impl UserSession {
    pub fn new(id: u32, writer: PeerWriter) -> Arc<Self> {
        Arc::new(Self {
            id,
            writer,
            closed: Notify::new(),
            bound_resources: Mutex::new(HashMap::new()),
        })
    }

    /// Cache a resolved resource under its handle. Idempotent.
    pub fn bind_resource(&self, resource: &Arc<ResourceSession>) {
        self.bound_resources
            .lock()
            .unwrap()
            .insert(resource.id, Arc::clone(resource));
    }

    pub fn bound_resource(&self, handle: u32) -> Option<Arc<ResourceSession>> {
        self.bound_resources.lock().unwrap().get(&handle).cloned()
    }

    pub fn unbind_resource(&self, handle: u32) {
        self.bound_resources.lock().unwrap().remove(&handle);
    }

    /// Ask the connection task to tear the session down.
    pub fn close(&self) {
        self.closed.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }
}

/// An authenticated connection on the resource port.
pub struct ResourceSession {
    pub id: u32,
    pub identity: Identity,
    pub name: String,
    pub description: String,
    pub writer: PeerWriter,
    next_index: AtomicU32,
    closed: Notify,
    bound_users: Mutex<HashMap<u32, Weak<UserSession>>>,
}

impl ResourceSession {
    /// `first_index` is the first outbound command index this session may
    /// use; the handshake burns the indices below it.
    pub fn new(
        id: u32,
        identity: Identity,
        name: String,
        description: String,
        writer: PeerWriter,
        first_index: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            identity,
            name,
            description,
            writer,
            next_index: AtomicU32::new(first_index),
            closed: Notify::new(),
            bound_users: Mutex::new(HashMap::new()),
        })
    }

    pub fn record(&self) -> ResourceRecord {
        ResourceRecord {
            handle: self.id,
            identity: self.identity,
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    /// Allocate the next outbound command index on this link.
    pub fn next_index(&self) -> u32 {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Remember the originating user for the return path. Idempotent.
    pub fn bind_user(&self, user: &Arc<UserSession>) {
        self.bound_users
            .lock()
            .unwrap()
            .insert(user.id, Arc::downgrade(user));
    }

    /// Look up a bound user. A dead weak entry is pruned on the spot — the
    /// self-healing path for users that disconnected since the forward.
    pub fn bound_user(&self, handle: u32) -> Option<Arc<UserSession>> {
        let mut map = self.bound_users.lock().unwrap();
        match map.get(&handle) {
            Some(weak) => match weak.upgrade() {
                Some(user) => Some(user),
                None => {
                    map.remove(&handle);
                    None
                }
            },
            None => None,
        }
    }

    pub fn unbind_user(&self, handle: u32) {
        self.bound_users.lock().unwrap().remove(&handle);
    }

    pub fn close(&self) {
        self.closed.notify_one();
    }

    pub async fn wait_closed(&self) {
        self.closed.notified().await;
    }
}
