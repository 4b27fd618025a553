use crate::error::{CoordError, CoordResult};
use crate::types::{parent_of, Acl, CreateMode, Node, WatchId, WatchRegistration, Watcher};

/// Attempts at a sequential create before a run of `NodeExists` / `NoNode`
/// races is treated as an error.
pub(crate) const MAX_CREATE_ATTEMPTS: u32 = 5;

/// The operations the recipes consume from a hierarchical coordination
/// service. Implementations must be linearizable and deliver each watch
/// at most once.
pub trait CoordinationClient: Send + Sync {
    /// Whether a node exists at `path`
    fn exists(&self, path: &str) -> CoordResult<bool>;

    /// Create a node; returns the assigned path (with the sequence suffix
    /// appended for sequential modes)
    fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode)
        -> CoordResult<String>;

    /// Delete a node. `None` matches any version.
    fn delete(&self, path: &str, version: Option<u32>) -> CoordResult<()>;

    /// Names (not paths) of the children of `path`, sorted
    fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Payload stored at `path`
    fn get_data(&self, path: &str) -> CoordResult<Vec<u8>>;

    /// Register a one-shot watch on the existence of `path`. Fires on the
    /// next create or delete of that node, or when the session ends.
    fn watch_exists(&self, path: &str, watcher: Watcher) -> CoordResult<WatchRegistration>;

    /// Drop a pending watch. Returns false if it already fired or was removed.
    fn remove_watch(&self, id: WatchId) -> CoordResult<bool>;
}

/// Create `path` and any missing ancestors as persistent nodes.
/// Concurrent creators are tolerated: `NodeExists` at any level is success.
pub fn ensure_path<C: CoordinationClient + ?Sized>(
    client: &C,
    path: &str,
    acl: &[Acl],
) -> CoordResult<()> {
    if path == "/" || client.exists(path)? {
        return Ok(());
    }
    if let Some(parent) = parent_of(path) {
        ensure_path(client, parent, acl)?;
    }
    match client.create(path, &[], acl, CreateMode::Persistent) {
        Ok(_) => Ok(()),
        Err(CoordError::NodeExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Defines the contract for node storage backends behind
/// [`CoordinationService`](crate::service::CoordinationService).
///
/// Stores are plain keyed storage; tree invariants, sessions and watches
/// are enforced by the service.
pub trait NodeStore: Send {
    /// Fetch a node by path
    fn get(&self, path: &str) -> CoordResult<Option<Node>>;

    /// Insert or replace a node
    fn put(&mut self, node: Node) -> CoordResult<()>;

    /// Remove a node, returning it if it was present
    fn remove(&mut self, path: &str) -> CoordResult<Option<Node>>;

    /// Names of the direct children of `path`, sorted
    fn children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// Paths of every ephemeral node currently stored
    fn ephemeral_paths(&self) -> CoordResult<Vec<String>>;

    /// Total number of stored nodes, root included
    fn count(&self) -> CoordResult<usize>;
}
