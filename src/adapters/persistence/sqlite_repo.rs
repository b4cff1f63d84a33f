//! SQLite-backed fingerprint store via libsql.
//!
//! Uses the same libsql backend as grammers-session to avoid duplicate SQLite symbol link errors.
//! One `fingerprints` table keyed by (chat_id, message_id); writes are upserts.
//! Database file: data/relay.db

use crate::domain::DomainError;
use crate::ports::FingerprintStore;
use libsql::{Connection, Database, params};
use std::path::{Path, PathBuf};
use tracing::info;

const FINGERPRINTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fingerprints (
    chat_id INTEGER NOT NULL,
    message_id INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (chat_id, message_id)
)"#;

pub struct SqliteFingerprintStore {
    db: Database,
    db_path: PathBuf,
}

impl SqliteFingerprintStore {
    /// Open (or create) `relay.db` under `base_dir` and ensure the schema.
    ///
    /// WAL mode lets lookups proceed while an upsert is in flight.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = base_dir.as_ref();
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        let db_path = base.join("relay.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;
        let conn = db.connect().map_err(|e| DomainError::Repo(e.to_string()))?;

        // PRAGMA returns a row; execute fails when rows come back.
        pragma(&conn, "PRAGMA journal_mode=WAL").await?;
        pragma(&conn, "PRAGMA synchronous=NORMAL").await?;

        conn.execute(FINGERPRINTS_TABLE, ())
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;

        info!(path = %db_path.display(), "fingerprint store ready (SQLite, WAL)");

        Ok(Self { db, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection, DomainError> {
        self.db
            .connect()
            .map_err(|e| DomainError::Repo(e.to_string()))
    }
}

async fn pragma(conn: &Connection, sql: &str) -> Result<(), DomainError> {
    let mut rows = conn
        .query(sql, ())
        .await
        .map_err(|e| DomainError::Repo(format!("{} failed: {}", sql, e)))?;
    while rows
        .next()
        .await
        .map_err(|e| DomainError::Repo(e.to_string()))?
        .is_some()
    {}
    Ok(())
}

#[async_trait::async_trait]
impl FingerprintStore for SqliteFingerprintStore {
    async fn get(&self, chat_id: i64, message_id: i32) -> Result<Option<String>, DomainError> {
        let conn = self.conn()?;
        let mut rows = conn
            .query(
                "SELECT content_hash FROM fingerprints WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
            )
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DomainError::Repo(e.to_string()))?
        {
            Some(row) => {
                let hash: String = row.get(0).map_err(|e| DomainError::Repo(e.to_string()))?;
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        chat_id: i64,
        message_id: i32,
        fingerprint: &str,
    ) -> Result<(), DomainError> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        conn.execute(
            r#"
            INSERT INTO fingerprints (chat_id, message_id, content_hash, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (chat_id, message_id) DO UPDATE SET
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
            params![chat_id, message_id, fingerprint, now],
        )
        .await
        .map_err(|e| DomainError::Repo(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteFingerprintStore::connect(dir.path()).await.unwrap();
        assert_eq!(store.get(-100, 1).await.unwrap(), None);
        assert!(store.path().ends_with("relay.db"));
    }

    #[tokio::test]
    async fn put_upserts_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteFingerprintStore::connect(dir.path()).await.unwrap();

        store.put(-100, 1, "aaa").await.unwrap();
        store.put(-100, 2, "bbb").await.unwrap();
        store.put(-100, 1, "ccc").await.unwrap();

        assert_eq!(store.get(-100, 1).await.unwrap().as_deref(), Some("ccc"));
        assert_eq!(store.get(-100, 2).await.unwrap().as_deref(), Some("bbb"));
        assert_eq!(store.get(-200, 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SqliteFingerprintStore::connect(dir.path()).await.unwrap();
            store.put(-100, 7, "persisted").await.unwrap();
        }
        let store = SqliteFingerprintStore::connect(dir.path()).await.unwrap();
        assert_eq!(
            store.get(-100, 7).await.unwrap().as_deref(),
            Some("persisted")
        );
    }
}
