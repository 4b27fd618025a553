//! SQLite-backed NodeStore implementation.
//! Keeps persistent nodes (queue items, directories, sequence counters)
//! across restarts of the local coordination service.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! sequin-core = { path = "../sequin-core", features = ["sqlite"] }
//! ```

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoordError, CoordResult};
use crate::infrastructure::NodeStore;
use crate::types::{join, parent_of, Acl, Node};

/// A persistent node store backed by SQLite.
///
/// Uses WAL mode for concurrent read performance.
pub struct SqliteNodeStore {
    conn: Connection,
}

impl SqliteNodeStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Mostly useful in tests.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                path            TEXT PRIMARY KEY,
                parent          TEXT,
                data            BLOB NOT NULL,
                acl             TEXT NOT NULL,
                ephemeral_owner INTEGER,
                version         INTEGER NOT NULL DEFAULT 0,
                next_child_seq  INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent);
            CREATE INDEX IF NOT EXISTS idx_nodes_ephemeral ON nodes(ephemeral_owner);",
        )?;

        let store = Self { conn };
        let has_root: bool = store.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM nodes WHERE path = '/')",
            [],
            |row| row.get(0),
        )?;
        if !has_root {
            store.insert_row(&Node::root())?;
        }
        Ok(store)
    }

    fn insert_row(&self, node: &Node) -> Result<(), rusqlite::Error> {
        let acl = serde_json::to_string(&node.acl)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO nodes
                (path, parent, data, acl, ephemeral_owner, version, next_child_seq, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.path,
                parent_of(&node.path),
                node.data,
                acl,
                node.ephemeral_owner.map(|s| s as i64),
                node.version,
                node.next_child_seq as i64,
                node.created_at as i64,
            ],
        )?;
        Ok(())
    }

    fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
        let acl_json: String = row.get(2)?;
        let acl: Vec<Acl> = serde_json::from_str(&acl_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Node {
            path: row.get(0)?,
            data: row.get(1)?,
            acl,
            ephemeral_owner: row.get::<_, Option<i64>>(3)?.map(|s| s as u64),
            version: row.get(4)?,
            next_child_seq: row.get::<_, i64>(5)? as u64,
            created_at: row.get::<_, i64>(6)? as u64,
        })
    }
}

impl NodeStore for SqliteNodeStore {
    fn get(&self, path: &str) -> CoordResult<Option<Node>> {
        let node = self
            .conn
            .query_row(
                "SELECT path, data, acl, ephemeral_owner, version, next_child_seq, created_at
                 FROM nodes WHERE path = ?1",
                params![path],
                Self::row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    fn put(&mut self, node: Node) -> CoordResult<()> {
        self.insert_row(&node)?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> CoordResult<Option<Node>> {
        let existing = self.get(path)?;
        if existing.is_some() {
            self.conn
                .execute("DELETE FROM nodes WHERE path = ?1", params![path])?;
        }
        Ok(existing)
    }

    fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let prefix = join(path, "");
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM nodes WHERE parent = ?1 ORDER BY path")?;
        let rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            let child = row?;
            match child.strip_prefix(&prefix) {
                Some(name) => names.push(name.to_string()),
                None => {
                    return Err(CoordError::Storage(format!(
                        "child {} does not live under {}",
                        child, path
                    )))
                }
            }
        }
        Ok(names)
    }

    fn ephemeral_paths(&self) -> CoordResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM nodes WHERE ephemeral_owner IS NOT NULL")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paths)
    }

    fn count(&self) -> CoordResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
