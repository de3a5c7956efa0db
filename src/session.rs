//! Durable session state.
//!
//! A session makes one fault-injection run uniquely identifiable: its id
//! is the namespace root for every firewall chain the engine creates, so
//! concurrent sessions in different working directories never collide in
//! the shared global firewall namespace. Exactly one session may be
//! initialized per persistence location at a time.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::error::{BarricadeError, Result};

/// Directory created under the store's base directory.
const STATE_DIR_NAME: &str = ".barricade";

/// State file name inside the state directory.
const STATE_FILE_NAME: &str = "state.yml";

/// Prefix of generated session ids.
const SESSION_ID_PREFIX: &str = "barricade-";

/// Version written into new session records.
const STATE_VERSION: u32 = 1;

/// On-disk session record.
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    containers: Vec<Endpoint>,
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
}

/// An initialized or recovered fault-injection session.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    containers: Vec<Endpoint>,
    version: u32,
}

impl Session {
    /// The unique session id, used to namespace all firewall objects.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The endpoint roster, as an immutable snapshot.
    pub fn containers(&self) -> Vec<Endpoint> {
        self.containers.clone()
    }

    /// The record format version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Persists session identity and roster with exactly-once initialization
/// semantics and crash-safe teardown.
#[derive(Debug, Clone)]
pub struct SessionStore {
    state_dir: PathBuf,
}

impl SessionStore {
    /// Creates a store rooted at the given base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: base_dir.into().join(STATE_DIR_NAME),
        }
    }

    /// Creates a store rooted at the current working directory.
    pub fn in_current_dir() -> Self {
        Self::new(".")
    }

    fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    /// Creates the session record.
    ///
    /// Generates an id when none is given. Fails with
    /// [`AlreadyInitialized`] if a record already exists at this location,
    /// without modifying it. If the write begins but a later step fails,
    /// the partial record is removed before the error propagates.
    ///
    /// [`AlreadyInitialized`]: BarricadeError::AlreadyInitialized
    pub async fn initialize(
        &self,
        containers: Vec<Endpoint>,
        id: Option<String>,
    ) -> Result<Session> {
        let id = id.unwrap_or_else(generate_session_id);
        let record = SessionRecord {
            id: id.clone(),
            containers: containers.clone(),
            version: STATE_VERSION,
            uri: None,
        };

        self.ensure_state_dir().await?;

        let path = self.state_file();
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BarricadeError::already_initialized(&path));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write_record(&mut file, &record).await {
            // Never leave a corrupt or partial record behind.
            drop(file);
            self.remove_state().await;
            return Err(e);
        }

        info!(session_id = %id, path = %path.display(), "session initialized");

        Ok(Session {
            id,
            containers,
            version: STATE_VERSION,
        })
    }

    /// Reads the session record.
    pub async fn load(&self) -> Result<Session> {
        let path = self.state_file();
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BarricadeError::NotInitialized);
            }
            Err(e) => return Err(BarricadeError::InconsistentState(e.to_string())),
        };

        let record: SessionRecord = serde_yaml::from_str(&raw)
            .map_err(|e| BarricadeError::InconsistentState(e.to_string()))?;

        debug!(session_id = %record.id, "session loaded");

        Ok(Session {
            id: record.id,
            containers: record.containers,
            version: record.version,
        })
    }

    /// Removes the session record and its containing directory.
    ///
    /// Idempotent over absence: a missing record or directory is fine, and
    /// a directory holding anything else is left in place. Any other
    /// removal failure propagates, since reporting success while the
    /// record remains would leave the location looking active.
    pub async fn destroy(&self) -> Result<()> {
        match tokio::fs::remove_file(self.state_file()).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_dir(&self.state_dir).await {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(e) => return Err(e.into()),
        }
        info!(path = %self.state_dir.display(), "session destroyed");
        Ok(())
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        match tokio::fs::create_dir(&self.state_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of the state file and directory, for cleaning
    /// up after a failed write. The directory is left in place when it
    /// holds anything else.
    async fn remove_state(&self) {
        let _ = tokio::fs::remove_file(self.state_file()).await;
        let _ = tokio::fs::remove_dir(&self.state_dir).await;
    }
}

async fn write_record(file: &mut tokio::fs::File, record: &SessionRecord) -> Result<()> {
    let serialized = serde_yaml::to_string(record)?;
    file.write_all(serialized.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Generates a session id: a fixed prefix plus a random suffix long
/// enough to make collision between concurrent sessions negligible.
fn generate_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{SESSION_ID_PREFIX}{}", &suffix[..10])
}

/// Exposes the state file path for a base directory.
///
/// Absence of this file means "no active session here".
pub fn state_file_path(base_dir: impl AsRef<Path>) -> PathBuf {
    base_dir.as_ref().join(STATE_DIR_NAME).join(STATE_FILE_NAME)
}
