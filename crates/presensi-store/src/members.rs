//! Member (enrolled identity) and face-vector access.
//!
//! A member owns many independent embedding samples; deleting the member
//! cascades to its vectors and attendance rows. Vectors are stored as JSON
//! arrays and dimension-checked on every read — a row that fails the check
//! is skipped with a warning, never fatal to a match scan.

use crate::error::{Result, StoreError};
use crate::{now_stamp, SqliteStore};
use presensi_core::{Embedding, GalleryEntry, EMBEDDING_DIM};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// An enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub key: String,
    pub name: String,
    pub division: Option<String>,
    pub photo_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Member {
    pub fn new(key: impl Into<String>, name: impl Into<String>, division: Option<String>) -> Self {
        let stamp = now_stamp();
        Self {
            key: key.into(),
            name: name.into(),
            division,
            photo_path: None,
            created_at: stamp.clone(),
            updated_at: stamp,
        }
    }
}

fn member_from_row(row: &Row) -> rusqlite::Result<Member> {
    Ok(Member {
        key: row.get(0)?,
        name: row.get(1)?,
        division: row.get(2)?,
        photo_path: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const MEMBER_COLUMNS: &str = "key, name, division, photo_path, created_at, updated_at";

fn encode_vector(values: &[f32]) -> std::result::Result<String, tokio_rusqlite::Error> {
    serde_json::to_string(values).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
}

impl SqliteStore {
    /// Insert a member together with its first batch of face vectors, in one
    /// transaction. Re-enrolling an existing key is rejected, never merged.
    pub async fn insert_enrollment(
        &self,
        member: Member,
        vectors: Vec<Vec<f32>>,
    ) -> Result<usize> {
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM members WHERE key = ?1)",
                    [&member.key],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(Err(StoreError::DuplicateMember(member.key)));
                }

                tx.execute(
                    "INSERT INTO members (key, name, division, photo_path, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        member.key,
                        member.name,
                        member.division,
                        member.photo_path,
                        member.created_at,
                        member.updated_at
                    ],
                )?;

                let stamp = now_stamp();
                for values in &vectors {
                    tx.execute(
                        "INSERT INTO face_vectors (member_key, vector, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![member.key, encode_vector(values)?, stamp],
                    )?;
                }

                tx.commit()?;
                Ok(Ok(vectors.len()))
            })
            .await??;

        Ok(stored)
    }

    /// Replace all of a member's face vectors with a new batch, atomically.
    ///
    /// An empty batch is refused up front so a failed re-extraction can never
    /// leave the member with zero vectors. Optionally updates the profile
    /// photo reference.
    pub async fn replace_vectors(
        &self,
        member_key: &str,
        vectors: Vec<Vec<f32>>,
        photo_path: Option<String>,
    ) -> Result<usize> {
        if vectors.is_empty() {
            return Err(StoreError::EmptyVectorBatch);
        }
        let member_key = member_key.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM members WHERE key = ?1)",
                    [&member_key],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(Err(StoreError::MemberNotFound(member_key)));
                }

                tx.execute("DELETE FROM face_vectors WHERE member_key = ?1", [&member_key])?;

                let stamp = now_stamp();
                for values in &vectors {
                    tx.execute(
                        "INSERT INTO face_vectors (member_key, vector, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![member_key, encode_vector(values)?, stamp],
                    )?;
                }

                if let Some(path) = &photo_path {
                    tx.execute(
                        "UPDATE members SET photo_path = ?1, updated_at = ?2 WHERE key = ?3",
                        params![path, stamp, member_key],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE members SET updated_at = ?1 WHERE key = ?2",
                        params![stamp, member_key],
                    )?;
                }

                tx.commit()?;
                Ok(Ok(vectors.len()))
            })
            .await?
    }

    /// Load the full roster snapshot for matching. Corrupt rows (unparseable
    /// or wrong dimensionality) are skipped with a warning.
    pub async fn load_roster(&self) -> Result<Vec<GalleryEntry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT member_key, vector FROM face_vectors ORDER BY member_key, id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    let (key, raw) = row?;
                    match serde_json::from_str::<Vec<f32>>(&raw) {
                        Ok(values) if values.len() == EMBEDDING_DIM => entries.push(GalleryEntry {
                            identity_key: key,
                            embedding: Embedding::new(values),
                        }),
                        Ok(values) => tracing::warn!(
                            identity_key = %key,
                            dim = values.len(),
                            expected = EMBEDDING_DIM,
                            "skipping stored vector with wrong dimensionality"
                        ),
                        Err(err) => tracing::warn!(
                            identity_key = %key,
                            %err,
                            "skipping unparseable stored vector"
                        ),
                    }
                }
                Ok(entries)
            })
            .await?;

        Ok(entries)
    }

    pub async fn get_member(&self, key: &str) -> Result<Member> {
        let lookup = key.to_string();
        let key = key.to_string();
        let member = self
            .conn
            .call(move |conn| {
                let member = conn
                    .query_row(
                        &format!("SELECT {MEMBER_COLUMNS} FROM members WHERE key = ?1"),
                        [&lookup],
                        member_from_row,
                    )
                    .optional()?;
                Ok(member)
            })
            .await?;

        member.ok_or(StoreError::MemberNotFound(key))
    }

    /// List members, optionally filtered by division.
    pub async fn list_members(&self, division: Option<String>) -> Result<Vec<Member>> {
        let members = self
            .conn
            .call(move |conn| {
                let members = match &division {
                    Some(division) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {MEMBER_COLUMNS} FROM members WHERE division = ?1 ORDER BY key"
                        ))?;
                        let rows = stmt.query_map([division], member_from_row)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {MEMBER_COLUMNS} FROM members ORDER BY key"
                        ))?;
                        let rows = stmt.query_map([], member_from_row)?;
                        rows.collect::<rusqlite::Result<Vec<_>>>()?
                    }
                };
                Ok(members)
            })
            .await?;

        Ok(members)
    }

    /// Delete a member; owned vectors and attendance rows cascade.
    pub async fn delete_member(&self, key: &str) -> Result<()> {
        let lookup = key.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM members WHERE key = ?1", [&lookup])?;
                Ok(deleted)
            })
            .await?;

        if deleted == 0 {
            return Err(StoreError::MemberNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Total stored vectors across all members.
    pub async fn vector_count(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: usize =
                    conn.query_row("SELECT COUNT(*) FROM face_vectors", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec512(fill: f32) -> Vec<f32> {
        vec![fill; EMBEDDING_DIM]
    }

    async fn store_with_member(key: &str, vectors: Vec<Vec<f32>>) -> SqliteStore {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .insert_enrollment(Member::new(key, "Test Person", None), vectors)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_enrollment_roundtrip() {
        let store = store_with_member("A01", vec![vec512(0.1), vec512(0.2)]).await;

        let member = store.get_member("A01").await.unwrap();
        assert_eq!(member.name, "Test Person");

        let roster = store.load_roster().await.unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster.iter().all(|e| e.identity_key == "A01"));
        assert!(roster.iter().all(|e| e.embedding.has_expected_dim()));
    }

    #[tokio::test]
    async fn test_duplicate_enrollment_rejected() {
        let store = store_with_member("A01", vec![vec512(0.1)]).await;
        let err = store
            .insert_enrollment(Member::new("A01", "Someone Else", None), vec![vec512(0.5)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMember(key) if key == "A01"));
        // The failed attempt must not have written anything.
        assert_eq!(store.vector_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_vectors_swaps_batch() {
        let store = store_with_member("A01", vec![vec512(0.1), vec512(0.2)]).await;
        let stored = store
            .replace_vectors("A01", vec![vec512(0.7)], Some("A01/new.jpg".into()))
            .await
            .unwrap();
        assert_eq!(stored, 1);
        assert_eq!(store.vector_count().await.unwrap(), 1);
        let member = store.get_member("A01").await.unwrap();
        assert_eq!(member.photo_path.as_deref(), Some("A01/new.jpg"));
    }

    #[tokio::test]
    async fn test_replace_vectors_empty_batch_keeps_previous() {
        let store = store_with_member("A01", vec![vec512(0.1)]).await;
        let err = store.replace_vectors("A01", vec![], None).await.unwrap_err();
        assert!(matches!(err, StoreError::EmptyVectorBatch));
        assert_eq!(store.vector_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replace_vectors_unknown_member() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store
            .replace_vectors("GHOST", vec![vec512(0.1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MemberNotFound(_)));
    }

    #[tokio::test]
    async fn test_roster_skips_corrupt_vector() {
        let store = store_with_member("A01", vec![vec512(0.1)]).await;
        // Write a wrong-dimensionality row and a non-JSON row directly.
        store
            .conn
            .call(|conn| {
                conn.execute(
                    "INSERT INTO face_vectors (member_key, vector, created_at)
                     VALUES ('A01', '[1.0, 2.0]', ''), ('A01', 'not json', '')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let roster = store.load_roster().await.unwrap();
        assert_eq!(roster.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_member_cascades() {
        let store = store_with_member("A01", vec![vec512(0.1)]).await;
        store.delete_member("A01").await.unwrap();

        assert!(matches!(
            store.get_member("A01").await.unwrap_err(),
            StoreError::MemberNotFound(_)
        ));
        assert_eq!(store.vector_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_members_division_filter() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .insert_enrollment(
                Member::new("A01", "One", Some("Web".into())),
                vec![vec512(0.1)],
            )
            .await
            .unwrap();
        store
            .insert_enrollment(
                Member::new("B02", "Two", Some("Embedded".into())),
                vec![vec512(0.2)],
            )
            .await
            .unwrap();

        assert_eq!(store.list_members(None).await.unwrap().len(), 2);
        let web = store.list_members(Some("Web".into())).await.unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].key, "A01");
    }
}
