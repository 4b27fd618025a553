//! In-process coordination service.
//!
//! Provides the namespace semantics the recipes rely on (persistent and
//! ephemeral nodes, per-parent sequence counters, atomic create/delete and
//! one-shot existence watches) on top of a pluggable [`NodeStore`].
//! Every operation runs under a single mutex, so the service is
//! linearizable. Watch callbacks are invoked after that mutex is released.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::error::{CoordError, CoordResult};
use crate::infrastructure::{CoordinationClient, NodeStore};
use crate::infrastructure_in_memory::InMemoryNodeStore;
use crate::types::*;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct PendingWatch {
    id: WatchId,
    session: SessionId,
    watcher: Watcher,
}

type Fired = Vec<(Watcher, WatchEvent)>;

struct ServiceState {
    store: Box<dyn NodeStore>,
    live_sessions: HashSet<SessionId>,
    // Session -> paths of the ephemeral nodes it owns
    ephemerals: HashMap<SessionId, BTreeSet<String>>,
    // Watched path -> pending registrations
    watches: HashMap<String, Vec<PendingWatch>>,
    // Registration -> watched path, for removal
    watch_paths: HashMap<WatchId, String>,
    next_session: SessionId,
    next_watch: u64,
    available: bool,
}

impl ServiceState {
    fn check(&self, session: SessionId) -> CoordResult<()> {
        if !self.live_sessions.contains(&session) {
            return Err(CoordError::SessionExpired(session));
        }
        if !self.available {
            return Err(CoordError::ConnectionLoss);
        }
        Ok(())
    }

    fn existing(&self, path: &str) -> CoordResult<Node> {
        self.store
            .get(path)?
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    fn take_watches(&mut self, path: &str, event: WatchEvent, fired: &mut Fired) {
        if let Some(pending) = self.watches.remove(path) {
            for watch in pending {
                self.watch_paths.remove(&watch.id);
                fired.push((watch.watcher, event));
            }
        }
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        fired: &mut Fired,
    ) -> CoordResult<String> {
        validate_path(path)?;
        let parent_path = parent_of(path).ok_or_else(|| CoordError::NodeExists(path.to_string()))?;
        let mut parent = self.existing(parent_path)?;
        if parent.is_ephemeral() {
            return Err(CoordError::NoChildrenForEphemerals(parent_path.to_string()));
        }

        let assigned = if mode.is_sequential() {
            let seq = parent.next_child_seq;
            if seq > MAX_SEQUENCE {
                return Err(CoordError::Storage(format!(
                    "sequence counter of {} exhausted",
                    parent_path
                )));
            }
            parent.next_child_seq += 1;
            self.store.put(parent)?;
            format!("{}{}", path, format_sequence(seq))
        } else {
            path.to_string()
        };

        if self.store.get(&assigned)?.is_some() {
            return Err(CoordError::NodeExists(assigned));
        }

        let owner = mode.is_ephemeral().then_some(session);
        let node = Node::new(assigned.clone(), data.to_vec(), acl.to_vec(), owner, now_ms());
        self.store.put(node)?;
        if let Some(owner) = owner {
            self.ephemerals.entry(owner).or_default().insert(assigned.clone());
        }

        debug!(path = %assigned, mode = %mode, session, "node created");
        self.take_watches(&assigned, WatchEvent::NodeCreated, fired);
        Ok(assigned)
    }

    fn delete(&mut self, path: &str, version: Option<u32>, fired: &mut Fired) -> CoordResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(CoordError::InvalidPath(path.to_string()));
        }
        let node = self.existing(path)?;
        if let Some(expected) = version {
            if expected != node.version {
                return Err(CoordError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        if !self.store.children(path)?.is_empty() {
            return Err(CoordError::NotEmpty(path.to_string()));
        }

        self.store.remove(path)?;
        if let Some(owner) = node.ephemeral_owner {
            if let Some(owned) = self.ephemerals.get_mut(&owner) {
                owned.remove(path);
            }
        }

        debug!(path = %path, "node deleted");
        self.take_watches(path, WatchEvent::NodeDeleted, fired);
        Ok(())
    }

    /// Ends a session: its pending watches fire `SessionExpired`, then its
    /// ephemeral nodes are removed (firing `NodeDeleted` for other sessions).
    fn end_session(&mut self, session: SessionId, fired: &mut Fired) -> bool {
        if !self.live_sessions.remove(&session) {
            return false;
        }

        for pending in self.watches.values_mut() {
            let mut kept = Vec::with_capacity(pending.len());
            for watch in pending.drain(..) {
                if watch.session == session {
                    self.watch_paths.remove(&watch.id);
                    fired.push((watch.watcher, WatchEvent::SessionExpired));
                } else {
                    kept.push(watch);
                }
            }
            *pending = kept;
        }
        self.watches.retain(|_, pending| !pending.is_empty());

        for path in self.ephemerals.remove(&session).unwrap_or_default() {
            match self.store.remove(&path) {
                Ok(_) => self.take_watches(&path, WatchEvent::NodeDeleted, fired),
                Err(e) => warn!(path = %path, session, error = %e, "failed to remove ephemeral node"),
            }
        }
        true
    }
}

/// A linearizable, in-process coordination service.
///
/// Cloning yields another handle to the same namespace.
#[derive(Clone)]
pub struct CoordinationService {
    inner: Arc<Mutex<ServiceState>>,
}

impl CoordinationService {
    /// Wrap a node store. Ephemeral nodes left behind by sessions of an
    /// earlier run are purged, since no session survives a restart.
    pub fn new(store: impl NodeStore + 'static) -> CoordResult<Self> {
        let mut store: Box<dyn NodeStore> = Box::new(store);
        let stale = store.ephemeral_paths()?;
        for path in &stale {
            store.remove(path)?;
        }
        if !stale.is_empty() {
            info!(purged = stale.len(), "removed ephemeral nodes from a previous run");
        }

        Ok(Self::with_store(store))
    }

    /// Service backed by an empty in-memory store.
    pub fn in_memory() -> Self {
        Self::with_store(Box::new(InMemoryNodeStore::new()))
    }

    fn with_store(store: Box<dyn NodeStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServiceState {
                store,
                live_sessions: HashSet::new(),
                ephemerals: HashMap::new(),
                watches: HashMap::new(),
                watch_paths: HashMap::new(),
                next_session: 1,
                next_watch: 1,
                available: true,
            })),
        }
    }

    /// Open a new session.
    pub fn connect(&self) -> Session {
        let mut state = self.state();
        let id = state.next_session;
        state.next_session += 1;
        state.live_sessions.insert(id);
        info!(session = id, "session opened");
        Session {
            id,
            service: self.clone(),
        }
    }

    /// End a session as if its client had crashed. Returns false if the
    /// session had already ended.
    pub fn expire_session(&self, session: SessionId) -> bool {
        let ended = self.end_session(session);
        if ended {
            info!(session, "session expired");
        }
        ended
    }

    /// Simulate the service becoming unreachable (or reachable again).
    /// While unavailable every client operation fails with `ConnectionLoss`.
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }

    pub fn is_available(&self) -> bool {
        self.state().available
    }

    /// Number of pending (not yet fired) watch registrations
    pub fn watch_count(&self) -> usize {
        self.state().watch_paths.len()
    }

    /// Number of stored nodes, root included
    pub fn node_count(&self) -> CoordResult<usize> {
        self.state().store.count()
    }

    pub fn session_count(&self) -> usize {
        self.state().live_sessions.len()
    }

    fn end_session(&self, session: SessionId) -> bool {
        let mut fired = Vec::new();
        let ended = self.state().end_session(session, &mut fired);
        deliver(fired);
        ended
    }

    fn run<T>(
        &self,
        session: SessionId,
        op: impl FnOnce(&mut ServiceState, &mut Fired) -> CoordResult<T>,
    ) -> CoordResult<T> {
        let mut fired = Vec::new();
        let result = {
            let mut state = self.state();
            state.check(session).and_then(|_| op(&mut *state, &mut fired))
        };
        deliver(fired);
        result
    }

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn deliver(fired: Fired) {
    for (watcher, event) in fired {
        watcher(event);
    }
}

/// A client session on a [`CoordinationService`].
///
/// Ephemeral nodes created through a session live exactly as long as the
/// session. Dropping the session closes it.
pub struct Session {
    id: SessionId,
    service: CoordinationService,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn service(&self) -> &CoordinationService {
        &self.service
    }

    /// Close the session, removing its ephemeral nodes. Idempotent.
    pub fn close(&self) {
        if self.service.end_session(self.id) {
            info!(session = self.id, "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.service.state().live_sessions.contains(&self.id)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

impl CoordinationClient for Session {
    fn exists(&self, path: &str) -> CoordResult<bool> {
        validate_path(path)?;
        self.service
            .run(self.id, |state, _| Ok(state.store.get(path)?.is_some()))
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> CoordResult<String> {
        self.service.run(self.id, |state, fired| {
            state.create(self.id, path, data, acl, mode, fired)
        })
    }

    fn delete(&self, path: &str, version: Option<u32>) -> CoordResult<()> {
        self.service
            .run(self.id, |state, fired| state.delete(path, version, fired))
    }

    fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
        validate_path(path)?;
        self.service.run(self.id, |state, _| {
            state.existing(path)?;
            state.store.children(path)
        })
    }

    fn get_data(&self, path: &str) -> CoordResult<Vec<u8>> {
        validate_path(path)?;
        self.service
            .run(self.id, |state, _| Ok(state.existing(path)?.data))
    }

    fn watch_exists(&self, path: &str, watcher: Watcher) -> CoordResult<WatchRegistration> {
        validate_path(path)?;
        self.service.run(self.id, |state, _| {
            let exists = state.store.get(path)?.is_some();
            let id = WatchId(state.next_watch);
            state.next_watch += 1;
            state.watch_paths.insert(id, path.to_string());
            state.watches.entry(path.to_string()).or_default().push(PendingWatch {
                id,
                session: self.id,
                watcher,
            });
            debug!(path = %path, watch = %id, exists, "watch registered");
            Ok(WatchRegistration { id, exists })
        })
    }

    fn remove_watch(&self, id: WatchId) -> CoordResult<bool> {
        self.service.run(self.id, |state, _| {
            let Some(path) = state.watch_paths.remove(&id) else {
                return Ok(false);
            };
            if let Some(pending) = state.watches.get_mut(&path) {
                pending.retain(|w| w.id != id);
                if pending.is_empty() {
                    state.watches.remove(&path);
                }
            }
            Ok(true)
        })
    }
}
