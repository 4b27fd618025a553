use serde::{Deserialize, Serialize};

use super::{Acl, SessionId};
use crate::error::{CoordError, CoordResult};

/// Width of the zero-padded sequence suffix appended to sequential nodes.
/// Fixed width keeps lexicographic and numeric order identical.
pub const SEQUENCE_WIDTH: usize = 10;

/// Largest sequence number that still fits in [`SEQUENCE_WIDTH`] digits.
pub const MAX_SEQUENCE: u64 = 9_999_999_999;

/// A node in the coordination namespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Absolute path
    pub path: String,
    /// Opaque payload
    pub data: Vec<u8>,
    /// Access-control list, passed through untouched
    pub acl: Vec<Acl>,
    /// Owning session for ephemeral nodes
    pub ephemeral_owner: Option<SessionId>,
    /// Data version, checked by versioned deletes
    pub version: u32,
    /// Next sequence number handed to a sequential child
    pub next_child_seq: u64,
    /// Creation time (ms since epoch)
    pub created_at: u64,
}

impl Node {
    pub fn new(
        path: impl Into<String>,
        data: Vec<u8>,
        acl: Vec<Acl>,
        ephemeral_owner: Option<SessionId>,
        now: u64,
    ) -> Self {
        Self {
            path: path.into(),
            data,
            acl,
            ephemeral_owner,
            version: 0,
            next_child_seq: 0,
            created_at: now,
        }
    }

    pub fn root() -> Self {
        Self::new("/", Vec::new(), Acl::open_unsafe(), None, 0)
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner.is_some()
    }
}

/// Validates an absolute node path: leading `/`, no trailing `/` (except
/// the root itself), no empty segments.
pub fn validate_path(path: &str) -> CoordResult<()> {
    if path == "/" {
        return Ok(());
    }
    let invalid = !path.starts_with('/')
        || path.ends_with('/')
        || path[1..].split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if invalid {
        return Err(CoordError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Parent of an absolute path. `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of an absolute path.
pub fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

pub fn format_sequence(seq: u64) -> String {
    format!("{:0width$}", seq, width = SEQUENCE_WIDTH)
}

/// Extracts the service-assigned suffix from a sequential node name.
/// Returns `None` for names that carry no such suffix.
pub fn sequence_of(name: &str) -> Option<u64> {
    let name = name_of(name);
    if name.len() < SEQUENCE_WIDTH {
        return None;
    }
    let suffix = &name.as_bytes()[name.len() - SEQUENCE_WIDTH..];
    if !suffix.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(suffix).ok()?.parse().ok()
}

/// Sorts sibling names by sequence suffix, dropping names without one.
/// Ties (same suffix under different prefixes) fall back to the name.
pub fn sort_by_sequence(names: Vec<String>) -> Vec<(u64, String)> {
    let mut seqs: Vec<(u64, String)> = names
        .into_iter()
        .filter_map(|name| sequence_of(&name).map(|seq| (seq, name)))
        .collect();
    seqs.sort();
    seqs
}
