use serde::{Deserialize, Serialize};

/// Identifies one client session on the coordination service.
pub type SessionId = u64;

/// How a node is created: whether it outlives its session and whether the
/// service appends a sequence suffix to its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session
    Persistent,
    /// Persistent, with a service-assigned sequence suffix
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    /// Ephemeral, with a service-assigned sequence suffix
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

impl std::fmt::Display for CreateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateMode::Persistent => write!(f, "PERSISTENT"),
            CreateMode::PersistentSequential => write!(f, "PERSISTENT_SEQUENTIAL"),
            CreateMode::Ephemeral => write!(f, "EPHEMERAL"),
            CreateMode::EphemeralSequential => write!(f, "EPHEMERAL_SEQUENTIAL"),
        }
    }
}

/// Permission bits carried by an [`Acl`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Perms(pub u32);

impl Perms {
    /// Read, write, create, delete and admin bits all set
    pub const ALL: Perms = Perms(0b1_1111);
}

/// An access-control entry. Stored with every node and handed back
/// untouched; nothing in this crate enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Acl {
    pub perms: Perms,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    pub fn new(perms: Perms, scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            perms,
            scheme: scheme.into(),
            id: id.into(),
        }
    }

    /// `world:anyone` with every permission.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::new(Perms::ALL, "world", "anyone")]
    }
}

/// Events delivered to a one-shot watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchEvent {
    /// The watched node was created
    NodeCreated,
    /// The watched node was deleted
    NodeDeleted,
    /// The session that registered the watch ended
    SessionExpired,
}

/// Handle for a pending watch registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

/// Callback invoked at most once when a watch fires.
pub type Watcher = Box<dyn FnOnce(WatchEvent) + Send>;

/// Outcome of registering an existence watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchRegistration {
    pub id: WatchId,
    /// Whether the node existed at the moment the watch was registered
    pub exists: bool,
}
