use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ShioriError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identity (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    user_id     TEXT NOT NULL,
    display_name TEXT,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS auth_token (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    bearer      TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// Last-known identity, restored across reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentity {
    pub user_id: String,
    pub display_name: Option<String>,
}

/// SQLite-backed store for the last-known user identity and bearer token.
///
/// Read once at startup, written on login/logout. This is the only local
/// persistence the sync core owns.
pub struct IdentityStore {
    conn: Connection,
}

impl IdentityStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, ShioriError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, ShioriError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn save_identity(&self, identity: &StoredIdentity) -> Result<(), ShioriError> {
        self.conn.execute(
            "INSERT INTO identity (id, user_id, display_name, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 user_id = excluded.user_id,
                 display_name = excluded.display_name,
                 updated_at = excluded.updated_at",
            params![identity.user_id, identity.display_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_identity(&self) -> Result<Option<StoredIdentity>, ShioriError> {
        let row = self
            .conn
            .query_row(
                "SELECT user_id, display_name FROM identity WHERE id = 1",
                [],
                |row| {
                    Ok(StoredIdentity {
                        user_id: row.get(0)?,
                        display_name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_token(&self, bearer: &str) -> Result<(), ShioriError> {
        self.conn.execute(
            "INSERT INTO auth_token (id, bearer, updated_at)
             VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET
                 bearer = excluded.bearer,
                 updated_at = excluded.updated_at",
            params![bearer, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_token(&self) -> Result<Option<String>, ShioriError> {
        let token = self
            .conn
            .query_row("SELECT bearer FROM auth_token WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(token)
    }

    /// Drop identity and token together (logout).
    pub fn clear(&self) -> Result<(), ShioriError> {
        self.conn.execute("DELETE FROM identity", [])?;
        self.conn.execute("DELETE FROM auth_token", [])?;
        Ok(())
    }
}
