use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::task::AbortHandle;

struct Entry {
    peer: SocketAddr,
    abort: Option<AbortHandle>,
}

/// registry of the connections a listener is currently serving
///
/// we are not using an async Mutex here because adding or removing an
/// entry is atomic and the lock is never held across an await point
#[derive(Clone, Default)]
pub struct Connections {
    entries: Arc<Mutex<HashMap<u64, Entry>>>,
}

impl Connections {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: u64, peer: SocketAddr) {
        self.lock().insert(id, Entry { peer, abort: None });
    }

    /// attach the handle of the task serving the connection, nothing
    /// happens if the connection already ended
    pub fn attach(&self, id: u64, abort: AbortHandle) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.lock().values().map(|entry| entry.peer).collect()
    }

    /// abort every connection still being served, returns how many were
    /// aborted
    pub fn abort_all(&self) -> usize {
        let entries: Vec<Entry> = self.lock().drain().map(|(_, entry)| entry).collect();
        let count = entries.len();
        for entry in entries {
            tracing::debug!(peer = %entry.peer, "aborting connection");
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
        count
    }
}
