//! FIFO work queue over persistent sequential nodes.
//!
//! Producers append items as persistent sequential children of the queue
//! directory. Consumers scan children in sequence order and claim an item
//! by deleting it; the service's atomic delete guarantees a single winner
//! per item. There is no client-side locking.
//!
//! An item whose payload cannot be decoded is skipped but left in place,
//! so it stays in the directory until removed by hand.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::config::RecipeConfig;
use crate::error::{CoordError, RecipeError};
use crate::infrastructure::{ensure_path, CoordinationClient, MAX_CREATE_ATTEMPTS};
use crate::types::{join, sort_by_sequence, CreateMode};

pub struct DistributedQueue<T, C: CoordinationClient + ?Sized, K = JsonCodec<T>> {
    client: Arc<C>,
    config: RecipeConfig,
    codec: K,
    dir_ready: AtomicBool,
    _item: PhantomData<fn() -> T>,
}

impl<T, C> DistributedQueue<T, C, JsonCodec<T>>
where
    C: CoordinationClient + ?Sized,
    JsonCodec<T>: PayloadCodec<T>,
{
    /// Queue whose items are stored with the versioned JSON codec.
    pub fn new(client: Arc<C>, config: RecipeConfig) -> Result<Self, RecipeError> {
        Self::with_codec(client, config, JsonCodec::new())
    }
}

impl<T, C, K> DistributedQueue<T, C, K>
where
    C: CoordinationClient + ?Sized,
    K: PayloadCodec<T>,
{
    pub fn with_codec(client: Arc<C>, config: RecipeConfig, codec: K) -> Result<Self, RecipeError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            codec,
            dir_ready: AtomicBool::new(false),
            _item: PhantomData,
        })
    }

    /// Append an item. Returns the path of the created node.
    pub fn enqueue(&self, item: &T) -> Result<String, RecipeError> {
        let bytes = self.codec.encode(item)?;
        self.ensure_dir()?;

        let base = self.config.node_base();
        let mut attempts = 0;
        let created = loop {
            attempts += 1;
            match self.create_item(&base, &bytes) {
                Err(CoordError::NodeExists(path)) if attempts < MAX_CREATE_ATTEMPTS => {
                    warn!(item = %path, "sequential node already existed, retrying create");
                }
                Err(CoordError::NoNode(_)) if attempts < MAX_CREATE_ATTEMPTS => {
                    warn!(dir = %self.config.dir, "queue directory vanished, recreating");
                    self.dir_ready.store(false, Ordering::Release);
                    self.ensure_dir()?;
                }
                other => break other,
            }
        };

        match created {
            Ok(path) => {
                debug!(item = %path, bytes = bytes.len(), "item enqueued");
                Ok(path)
            }
            Err(e) => {
                error!(dir = %self.config.dir, error = %e, "failed to enqueue item");
                Err(e.into())
            }
        }
    }

    /// Number of items currently in the queue. A point-in-time reading
    /// that may already be stale; failures read as zero.
    pub fn size(&self) -> usize {
        match self.client.get_children(&self.config.dir) {
            Ok(children) => children.len(),
            Err(CoordError::NoNode(_)) => 0,
            Err(e) => {
                error!(dir = %self.config.dir, error = %e, "failed to read queue size");
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The oldest readable item, without removing it.
    pub fn peek(&self) -> Option<T> {
        for path in self.ordered_items()? {
            if let Some(item) = self.read_item(&path) {
                return Some(item);
            }
        }
        None
    }

    /// Remove and return the oldest item this consumer manages to claim.
    pub fn dequeue(&self) -> Option<T> {
        for path in self.ordered_items()? {
            let Some(item) = self.read_item(&path) else {
                continue;
            };
            match self.client.delete(&path, None) {
                Ok(()) => {
                    debug!(item = %path, "item dequeued");
                    return Some(item);
                }
                Err(e) => {
                    // Another consumer claimed it first.
                    debug!(item = %path, error = %e, "item claimed elsewhere, skipping");
                }
            }
        }
        None
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    fn create_item(&self, base: &str, bytes: &[u8]) -> Result<String, CoordError> {
        self.client
            .create(base, bytes, &self.config.acl, CreateMode::PersistentSequential)
    }

    fn ensure_dir(&self) -> Result<(), RecipeError> {
        if !self.dir_ready.load(Ordering::Acquire) {
            ensure_path(&*self.client, &self.config.dir, &self.config.acl).map_err(|e| {
                error!(dir = %self.config.dir, error = %e, "failed to create queue directory");
                RecipeError::from(e)
            })?;
            self.dir_ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Item paths in sequence order. `None` if the directory cannot be listed.
    fn ordered_items(&self) -> Option<Vec<String>> {
        let children = match self.client.get_children(&self.config.dir) {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return None,
            Err(e) => {
                error!(dir = %self.config.dir, error = %e, "failed to list queue items");
                return None;
            }
        };
        Some(
            sort_by_sequence(children)
                .into_iter()
                .map(|(_, name)| join(&self.config.dir, &name))
                .collect(),
        )
    }

    fn read_item(&self, path: &str) -> Option<T> {
        let bytes = match self.client.get_data(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(item = %path, error = %e, "item vanished before read, skipping");
                return None;
            }
        };
        match self.codec.decode(&bytes) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(item = %path, error = %e, "undecodable item left in queue");
                None
            }
        }
    }
}

impl<T, C: CoordinationClient + ?Sized, K> std::fmt::Debug for DistributedQueue<T, C, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedQueue")
            .field("dir", &self.config.dir)
            .field("prefix", &self.config.prefix)
            .finish()
    }
}
