//! Session file storage
//!
//! Stores each session in `{data_dir}/sessions/{id}.json`. Writes go to a
//! temp file first and are renamed into place, so readers never observe a
//! half-written record.

use super::{ChangeFeed, Datastore, DatastoreError, SessionSubscription};
use crate::models::{NewSession, Session, SessionPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Version of the session file format
const SESSION_FILE_VERSION: u32 = 1;

/// On-disk envelope around a session record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    /// File format version
    pub version: u32,
    /// When this file was last written
    pub updated_at: DateTime<Utc>,
    /// The session record
    pub session: Session,
}

impl SessionFile {
    fn wrap(session: Session) -> Self {
        Self {
            version: SESSION_FILE_VERSION,
            updated_at: Utc::now(),
            session,
        }
    }
}

/// Session store backed by JSON files
pub struct FileDatastore {
    sessions_dir: PathBuf,
    /// Serializes read-modify-write cycles and their notifications
    write_lock: Mutex<()>,
    feed: ChangeFeed,
}

impl FileDatastore {
    /// Create a store rooted at `data_dir`. The directory is created lazily.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: data_dir.as_ref().join("sessions"),
            write_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
        }
    }

    /// Get the file path for a session
    pub fn session_file_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", session_id))
    }

    async fn read_file(&self, session_id: &str) -> Result<SessionFile, DatastoreError> {
        if !is_safe_id(session_id) {
            return Err(DatastoreError::NotFound(session_id.to_string()));
        }

        let path = self.session_file_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DatastoreError::NotFound(session_id.to_string()));
            }
            Err(e) => {
                return Err(DatastoreError::Io(format!(
                    "Failed to read session file {:?}: {}",
                    path, e
                )));
            }
        };

        serde_json::from_str(&content).map_err(|e| {
            DatastoreError::Serialization(format!("Failed to parse {:?}: {}", path, e))
        })
    }

    async fn write_file(&self, session: &Session) -> Result<(), DatastoreError> {
        let path = self.session_file_path(&session.id);
        let content = serde_json::to_string_pretty(&SessionFile::wrap(session.clone()))?;
        atomic_write(&path, &content).await?;
        log::debug!("Saved session {} to {:?}", session.id, path);
        Ok(())
    }
}

#[async_trait]
impl Datastore for FileDatastore {
    async fn read_session(&self, id: &str) -> Result<Session, DatastoreError> {
        Ok(self.read_file(id).await?.session)
    }

    async fn update_session(
        &self,
        id: &str,
        patch: &SessionPatch,
    ) -> Result<Session, DatastoreError> {
        let _guard = self.write_lock.lock().await;

        let mut session = self.read_file(id).await?.session;
        patch.apply_to(&mut session);
        self.write_file(&session).await?;

        self.feed.publish(&session);
        Ok(session)
    }

    async fn insert_session(&self, new_session: &NewSession) -> Result<Session, DatastoreError> {
        let _guard = self.write_lock.lock().await;

        let session = Session::initial(uuid::Uuid::new_v4().to_string(), &new_session.user_id);
        self.write_file(&session).await?;

        log::info!("Created session file for {}", session.id);
        Ok(session)
    }

    fn subscribe(&self, id: &str) -> SessionSubscription {
        self.feed.subscribe(id)
    }
}

/// Session ids become file names; refuse anything that could escape the directory
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Write data to a file atomically (temp file + rename)
async fn atomic_write(path: &Path, content: &str) -> Result<(), DatastoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            DatastoreError::Io(format!("Failed to create directory {:?}: {}", parent, e))
        })?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await.map_err(|e| {
        DatastoreError::Io(format!("Failed to write temp file {:?}: {}", temp_path, e))
    })?;

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        DatastoreError::Io(format!(
            "Failed to rename {:?} to {:?}: {}",
            temp_path, path, e
        ))
    })
}
