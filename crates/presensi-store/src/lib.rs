//! presensi-store — SQLite persistence for the attendance roster.
//!
//! One database file holds three tables: `members` (enrolled identities),
//! `face_vectors` (many embedding samples per member, JSON-encoded) and
//! `attendance` (one row per member per day, mutated once at check-out).
//! All access goes through [`SqliteStore`], which owns a single
//! `tokio-rusqlite` connection.

pub mod attendance;
pub mod error;
pub mod members;

pub use attendance::{AttendanceEvent, AttendanceStatus};
pub use error::{Result, StoreError};
pub use members::Member;

use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE members (
    key         TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    division    TEXT,
    photo_path  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE face_vectors (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    member_key  TEXT NOT NULL REFERENCES members(key)
                ON UPDATE CASCADE ON DELETE CASCADE,
    vector      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX idx_face_vectors_member ON face_vectors(member_key);

CREATE TABLE attendance (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    member_key  TEXT NOT NULL REFERENCES members(key)
                ON UPDATE CASCADE ON DELETE CASCADE,
    date        TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    ended_at    TEXT,
    activity    TEXT,
    photo_path  TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE (member_key, date)
);
";

/// Handle to the presensi database.
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open (and migrate if needed) the database at `path`.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    /// Open a fresh in-memory database. Used by tests and diagnostics.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        let version = self
            .conn
            .call(|conn| {
                conn.pragma_update(None, "foreign_keys", true)?;

                let version: usize =
                    conn.query_row("SELECT user_version FROM pragma_user_version", [], |row| {
                        row.get(0)
                    })?;

                if version < 1 {
                    conn.execute_batch(SCHEMA)?;
                    conn.pragma_update(None, "user_version", 1)?;
                }

                Ok(version)
            })
            .await?;

        tracing::info!(version, "database ready");
        Ok(())
    }
}

/// Timestamp string for created_at/updated_at columns.
pub(crate) fn now_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
