//! Shared table of server connections.
//!
//! The table is the only state shared between the accept loop, connection
//! workers and callers of the server API. Every insert, removal and
//! iteration takes the one internal lock; the lock is never held across an
//! `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, Result};
use crate::protocol::message::{ConnectionId, ConnectionInfo};

/// Server-side state for one accepted socket.
///
/// The liveness flags are written by the connection's own worker; the
/// cancellation token is how anyone else closes the connection.
#[derive(Debug)]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    authenticated: AtomicBool,
    pending_disconnect: AtomicBool,
    connected: AtomicBool,
    cancel: CancellationToken,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, peer_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            id,
            peer_addr,
            authenticated: AtomicBool::new(false),
            pending_disconnect: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            cancel,
        }
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            authenticated: self.is_authenticated(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn set_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn is_pending_disconnect(&self) -> bool {
        self.pending_disconnect.load(Ordering::Acquire)
    }

    /// Ask the worker to tear the connection down on its next iteration.
    pub fn mark_pending_disconnect(&self) {
        self.pending_disconnect.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether someone outside the worker asked for the disconnect.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Entry {
    state: Arc<ConnectionState>,
    worker: Option<JoinHandle<()>>,
}

/// Owned connection table with atomic insert/remove/for-each operations.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ConnectionId, Entry>>> {
        self.entries.lock().map_err(|_| ProtocolError::LockPoisoned)
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn insert(&self, state: Arc<ConnectionState>) -> Result<()> {
        self.lock()?.insert(
            state.id,
            Entry {
                state,
                worker: None,
            },
        );
        Ok(())
    }

    /// Record the worker task for `id`. If the entry is already gone the
    /// worker has finished and the handle is simply dropped.
    pub fn attach_worker(&self, id: ConnectionId, worker: JoinHandle<()>) -> Result<()> {
        if let Some(entry) = self.lock()?.get_mut(&id) {
            entry.worker = Some(worker);
        }
        Ok(())
    }

    pub fn get(&self, id: ConnectionId) -> Result<Option<Arc<ConnectionState>>> {
        Ok(self.lock()?.get(&id).map(|e| Arc::clone(&e.state)))
    }

    pub fn take_worker(&self, id: ConnectionId) -> Result<Option<JoinHandle<()>>> {
        Ok(self.lock()?.get_mut(&id).and_then(|e| e.worker.take()))
    }

    /// Remove `id`; removing a missing entry is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Result<Option<Arc<ConnectionState>>> {
        Ok(self.lock()?.remove(&id).map(|e| e.state))
    }

    pub fn ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(self.lock()?.keys().copied().collect())
    }

    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&ConnectionState),
    {
        for entry in self.lock()?.values() {
            f(&entry.state);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<ConnectionInfo>> {
        let mut infos = Vec::new();
        self.for_each(|state| infos.push(state.info()))?;
        infos.sort_by_key(|info| info.id);
        Ok(infos)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}
