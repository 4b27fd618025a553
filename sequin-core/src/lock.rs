//! FIFO-fair distributed lock.
//!
//! Every contender creates an ephemeral sequential node under the lock
//! directory. The surviving node with the smallest sequence suffix holds
//! the lock; everyone else watches only the node immediately ahead of its
//! own, so a release wakes exactly one waiter.
//!
//! ```rust,ignore
//! let session = Arc::new(service.connect());
//! let mut lock = FairLock::new(session, RecipeConfig::lock("/locks/catalog"))?;
//!
//! lock.acquire()?;
//! // critical section
//! lock.unlock()?;
//! ```
//!
//! A `FairLock` belongs to one thread of control: every mutating method
//! takes `&mut self`. Contention between threads or processes goes through
//! separate instances, each on its own session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::RecipeConfig;
use crate::error::{CoordError, RecipeError};
use crate::infrastructure::{ensure_path, CoordinationClient, MAX_CREATE_ATTEMPTS};
use crate::signal::{CancelHandle, WaitOutcome, WatchSignal};
use crate::types::{join, name_of, sequence_of, sort_by_sequence, CreateMode, WatchEvent, WatchId};

#[derive(Debug, Clone, Copy)]
enum Wait {
    Never,
    Until(Instant),
    Forever,
}

pub struct FairLock<C: CoordinationClient + ?Sized> {
    client: Arc<C>,
    config: RecipeConfig,
    /// Written into our lock node so other participants can see who holds it
    owner_id: String,
    /// Full path of our lock node, once created
    node: Option<String>,
    /// Reentry count; the lock is held while this is non-zero
    holds: u32,
    dir_ready: bool,
    /// Set once the session is gone; the instance is unusable afterwards
    lost: bool,
    cancel: CancelHandle,
}

impl<C: CoordinationClient + ?Sized> FairLock<C> {
    pub fn new(client: Arc<C>, config: RecipeConfig) -> Result<Self, RecipeError> {
        config.validate()?;
        Ok(Self {
            client,
            config,
            owner_id: nanoid::nanoid!(),
            node: None,
            holds: 0,
            dir_ready: false,
            lost: false,
            cancel: CancelHandle::new(),
        })
    }

    /// Block until this instance holds the lock. Reentrant: if it already
    /// does, the hold count is bumped without touching the service.
    pub fn acquire(&mut self) -> Result<(), RecipeError> {
        if self.reenter()? {
            return Ok(());
        }
        self.contend(Wait::Forever)?;
        Ok(())
    }

    /// Take the lock only if no earlier contender is still queued.
    ///
    /// On `false` our node stays in place, so a later call keeps the
    /// position this one obtained.
    pub fn try_acquire(&mut self) -> Result<bool, RecipeError> {
        if self.reenter()? {
            return Ok(true);
        }
        self.contend(Wait::Never)
    }

    /// Like [`acquire`](Self::acquire), but gives up after `timeout`.
    pub fn try_acquire_for(&mut self, timeout: Duration) -> Result<bool, RecipeError> {
        if self.reenter()? {
            return Ok(true);
        }
        let wait = match Instant::now().checked_add(timeout) {
            Some(deadline) => Wait::Until(deadline),
            None => Wait::Forever,
        };
        self.contend(wait)
    }

    /// Drop one hold. The last one deletes our lock node, handing the lock
    /// to the next contender. The session itself is left alone.
    pub fn unlock(&mut self) -> Result<(), RecipeError> {
        if self.lost {
            self.holds = 0;
            self.node = None;
            return Err(RecipeError::SessionLost);
        }
        if self.holds == 0 {
            return Err(RecipeError::NotHeld);
        }
        self.holds -= 1;
        if self.holds > 0 {
            return Ok(());
        }
        if let Err(e) = self.delete_node() {
            // The node is still there, so we still hold the lock.
            if e == RecipeError::ServiceUnavailable {
                self.holds = 1;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Give up our position, held or queued, regardless of the hold count.
    pub fn withdraw(&mut self) -> Result<(), RecipeError> {
        self.ensure_live()?;
        self.holds = 0;
        self.delete_node()
    }

    /// Owner id written into the current holder's node, if anyone holds
    /// the lock.
    pub fn holder(&self) -> Result<Option<String>, RecipeError> {
        let children = match self.client.get_children(&self.config.dir) {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        for (_, name) in sort_by_sequence(children) {
            match self.client.get_data(&join(&self.config.dir, &name)) {
                Ok(data) => return Ok(Some(String::from_utf8_lossy(&data).into_owned())),
                // Released between the listing and the read; try the next one.
                Err(e) if e.is_race_lost() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    pub fn is_held(&self) -> bool {
        self.holds > 0 && !self.lost
    }

    pub fn hold_count(&self) -> u32 {
        self.holds
    }

    /// Path of our lock node, if one has been created
    pub fn node_path(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn config(&self) -> &RecipeConfig {
        &self.config
    }

    /// Handle that aborts a blocked `acquire` / `try_acquire_for` from
    /// another thread. A request made while no wait is in flight aborts the
    /// next wait; a grant consumes any pending request.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn ensure_live(&self) -> Result<(), RecipeError> {
        if self.lost {
            return Err(RecipeError::SessionLost);
        }
        Ok(())
    }

    fn reenter(&mut self) -> Result<bool, RecipeError> {
        self.ensure_live()?;
        if self.holds > 0 {
            self.holds += 1;
            debug!(node = ?self.node, holds = self.holds, "lock re-entered");
            return Ok(true);
        }
        Ok(false)
    }

    /// Translate a service error, poisoning the instance on session loss.
    fn fail(&mut self, e: CoordError) -> RecipeError {
        if matches!(e, CoordError::SessionExpired(_)) {
            warn!(dir = %self.config.dir, error = %e, "session lost, lock instance is unusable");
            self.lost = true;
            self.holds = 0;
            self.node = None;
        }
        e.into()
    }

    fn ensure_dir(&mut self) -> Result<(), RecipeError> {
        if !self.dir_ready {
            ensure_path(&*self.client, &self.config.dir, &self.config.acl)
                .map_err(|e| self.fail(e))?;
            self.dir_ready = true;
        }
        Ok(())
    }

    fn ensure_node(&mut self) -> Result<String, RecipeError> {
        if let Some(node) = &self.node {
            return Ok(node.clone());
        }
        self.ensure_dir()?;

        let base = self.config.node_base();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let created = self.client.create(
                &base,
                self.owner_id.as_bytes(),
                &self.config.acl,
                CreateMode::EphemeralSequential,
            );
            match created {
                Ok(path) => {
                    debug!(node = %path, owner = %self.owner_id, "lock node created");
                    self.node = Some(path.clone());
                    return Ok(path);
                }
                Err(CoordError::NodeExists(path)) if attempts < MAX_CREATE_ATTEMPTS => {
                    warn!(node = %path, "sequential node already existed, retrying create");
                }
                Err(CoordError::NoNode(_)) if attempts < MAX_CREATE_ATTEMPTS => {
                    warn!(dir = %self.config.dir, "lock directory vanished, recreating");
                    self.dir_ready = false;
                    self.ensure_dir()?;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Contenders queued ahead of `own`, in sequence order. `None` if our
    /// own node is no longer among the children.
    fn predecessors(&mut self, own: &str) -> Result<Option<Vec<String>>, RecipeError> {
        let children = match self.client.get_children(&self.config.dir) {
            Ok(children) => children,
            Err(CoordError::NoNode(_)) => return Ok(None),
            Err(e) => return Err(self.fail(e)),
        };

        let own_name = name_of(own);
        if !children.iter().any(|c| c == own_name) {
            return Ok(None);
        }
        let Some(own_seq) = sequence_of(own_name) else {
            return Err(RecipeError::Coordination(CoordError::InvalidPath(own.to_string())));
        };

        let ahead = sort_by_sequence(children)
            .into_iter()
            .filter(|(seq, name)| (*seq, name.as_str()) < (own_seq, own_name))
            .map(|(_, name)| name)
            .collect();
        Ok(Some(ahead))
    }

    fn contend(&mut self, wait: Wait) -> Result<bool, RecipeError> {
        let mut own = self.ensure_node()?;

        loop {
            let ahead = match self.predecessors(&own)? {
                Some(ahead) => ahead,
                None => {
                    warn!(node = %own, "lock node disappeared, re-queueing");
                    self.node = None;
                    own = self.ensure_node()?;
                    continue;
                }
            };

            let Some(previous) = ahead.last() else {
                // A cancel aimed at this acquire must not outlive the grant.
                self.cancel.take_request();
                self.holds = 1;
                debug!(node = %own, "lock acquired");
                return Ok(true);
            };

            if let Wait::Never = wait {
                debug!(node = %own, ahead = ahead.len(), "lock busy");
                return Ok(false);
            }
            if self.cancel.take_request() {
                return Err(RecipeError::Cancelled);
            }

            let previous = join(&self.config.dir, previous);
            let signal = WatchSignal::new();
            let registration = self
                .client
                .watch_exists(&previous, signal.watcher())
                .map_err(|e| self.fail(e))?;
            if !registration.exists {
                // Gone before the watch landed; re-derive the queue.
                self.drop_watch(registration.id);
                continue;
            }

            debug!(node = %own, waiting_on = %previous, "waiting for predecessor");
            self.cancel.arm(&signal);
            let outcome = match wait {
                Wait::Forever => signal.wait(),
                Wait::Until(deadline) => signal.wait_until(deadline),
                Wait::Never => WaitOutcome::TimedOut,
            };
            self.cancel.disarm();

            match outcome {
                WaitOutcome::Fired(WatchEvent::SessionExpired) => {
                    self.lost = true;
                    self.holds = 0;
                    self.node = None;
                    warn!(node = %own, "session expired while waiting for lock");
                    return Err(RecipeError::SessionLost);
                }
                WaitOutcome::Fired(event) => {
                    debug!(node = %own, ?event, "predecessor changed, re-checking");
                }
                WaitOutcome::TimedOut => {
                    self.drop_watch(registration.id);
                    debug!(node = %own, "lock wait timed out");
                    return Ok(false);
                }
                WaitOutcome::Cancelled => {
                    self.cancel.take_request();
                    self.drop_watch(registration.id);
                    debug!(node = %own, "lock wait cancelled");
                    return Err(RecipeError::Cancelled);
                }
            }
        }
    }

    fn drop_watch(&self, id: WatchId) {
        if let Err(e) = self.client.remove_watch(id) {
            warn!(watch = %id, error = %e, "failed to remove watch");
        }
    }

    fn delete_node(&mut self) -> Result<(), RecipeError> {
        let Some(node) = self.node.take() else {
            return Ok(());
        };
        match self.client.delete(&node, None) {
            Ok(()) => {
                debug!(node = %node, "lock node deleted");
                Ok(())
            }
            Err(e) if e.is_race_lost() => {
                warn!(node = %node, error = %e, "lock node already gone");
                Ok(())
            }
            Err(CoordError::ConnectionLoss) => {
                self.node = Some(node);
                Err(RecipeError::ServiceUnavailable)
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl<C: CoordinationClient + ?Sized> Drop for FairLock<C> {
    fn drop(&mut self) {
        if self.lost {
            return;
        }
        if let Some(node) = self.node.take() {
            if let Err(e) = self.client.delete(&node, None) {
                debug!(node = %node, error = %e, "could not delete lock node on drop");
            }
        }
    }
}

impl<C: CoordinationClient + ?Sized> std::fmt::Debug for FairLock<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairLock")
            .field("dir", &self.config.dir)
            .field("owner_id", &self.owner_id)
            .field("node", &self.node)
            .field("holds", &self.holds)
            .field("lost", &self.lost)
            .finish()
    }
}
