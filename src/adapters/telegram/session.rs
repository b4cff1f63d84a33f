//! Persistent grammers session (SQLite file), so authorization survives restarts.

use crate::domain::DomainError;
use grammers_session::storages::SqliteSession;
use std::path::Path;
use tracing::info;

/// Open the session file at `path`, creating it and its parent directory
/// when missing. A fresh file means the login flow will run.
pub async fn open_file_session(path: impl AsRef<Path>) -> Result<SqliteSession, DomainError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::Config(format!("create session directory: {}", e)))?;
    }
    let resumed = tokio::fs::try_exists(path).await.unwrap_or(false);
    let session = SqliteSession::open(path)
        .await
        .map_err(|e| DomainError::Config(format!("open session {}: {}", path.display(), e)))?;
    info!(path = %path.display(), resumed, "telegram session opened");
    Ok(session)
}
