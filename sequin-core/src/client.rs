//! High-level entry point that wires the recipes to a local coordination
//! service with a pluggable node store. The CLI server and demos go
//! through this.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::PayloadCodec;
use crate::config::RecipeConfig;
use crate::error::{CoordResult, RecipeError};
use crate::infrastructure::CoordinationClient;
use crate::lock::FairLock;
use crate::queue::DistributedQueue;
use crate::service::{CoordinationService, Session};
use crate::types::SessionId;

/// Owns a [`CoordinationService`] and hands out sessions and recipes
/// bound to it.
#[derive(Clone)]
pub struct LocalCoordinator {
    service: CoordinationService,
}

impl LocalCoordinator {
    /// Coordinator over an empty in-memory namespace.
    pub fn new() -> Self {
        Self {
            service: CoordinationService::in_memory(),
        }
    }

    /// Coordinator backed by SQLite at the given path.
    /// Persistent nodes (queue items, directories) survive restarts.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str) -> Result<Self, String> {
        let store = crate::infrastructure_sqlite::SqliteNodeStore::open(path)
            .map_err(|e| format!("Failed to open SQLite database at '{}': {}", path, e))?;
        let service = CoordinationService::new(store)
            .map_err(|e| format!("Failed to load nodes from '{}': {}", path, e))?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &CoordinationService {
        &self.service
    }

    /// Open a new session. The session ends when the last `Arc` is dropped.
    pub fn connect(&self) -> Arc<Session> {
        Arc::new(self.service.connect())
    }

    /// End a session as if its client had crashed.
    pub fn expire_session(&self, id: SessionId) -> bool {
        self.service.expire_session(id)
    }

    /// A fair lock on `dir`, contending through `session`.
    pub fn fair_lock<C>(&self, session: Arc<C>, dir: &str) -> Result<FairLock<C>, RecipeError>
    where
        C: CoordinationClient + ?Sized,
    {
        FairLock::new(session, RecipeConfig::lock(dir))
    }

    /// A JSON-encoded queue on `dir`.
    pub fn queue<T, C>(
        &self,
        session: Arc<C>,
        dir: &str,
    ) -> Result<DistributedQueue<T, C>, RecipeError>
    where
        T: Serialize + DeserializeOwned,
        C: CoordinationClient + ?Sized,
    {
        DistributedQueue::new(session, RecipeConfig::queue(dir))
    }

    /// A queue on `dir` with an explicit codec.
    pub fn queue_with_codec<T, C, K>(
        &self,
        session: Arc<C>,
        dir: &str,
        codec: K,
    ) -> Result<DistributedQueue<T, C, K>, RecipeError>
    where
        C: CoordinationClient + ?Sized,
        K: PayloadCodec<T>,
    {
        DistributedQueue::with_codec(session, RecipeConfig::queue(dir), codec)
    }

    pub fn node_count(&self) -> CoordResult<usize> {
        self.service.node_count()
    }

    pub fn session_count(&self) -> usize {
        self.service.session_count()
    }
}

impl Default for LocalCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
