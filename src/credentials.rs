use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Exact username match and a constant-time password comparison.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        self.username == username
            && constant_time_eq(self.password.as_bytes(), password.as_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("username '{0}' is already registered")]
    Conflict(String),
    #[error("credential storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// First record registered under `username`.
    async fn get(&self, username: &str) -> Result<Option<Credential>, StoreError>;
    /// Adds a record, or fails with `StoreError::Conflict` if the username is taken.
    async fn append(&self, credential: Credential) -> Result<(), StoreError>;

    /// Record whose username and password both match.
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .get(username)
            .await?
            .filter(|c| c.matches(username, password)))
    }
}

/// Pretty-printed JSON array of `{username, password}` on disk, replaced as a
/// whole on every append.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Credential>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(
                    "Credential file {:?} is not a JSON array ({}); treating as empty",
                    self.path, e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn write_all(&self, records: &[Credential]) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(records)?;
        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "users.json".into());
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn get(&self, username: &str) -> Result<Option<Credential>, StoreError> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|c| c.username == username))
    }

    // Files written before usernames were unique can hold several records per
    // name, so every record is checked.
    async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|c| c.matches(username, password)))
    }

    async fn append(&self, credential: Credential) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read_all().await?;
        if records.iter().any(|c| c.username == credential.username) {
            return Err(StoreError::Conflict(credential.username));
        }
        records.push(credential);
        self.write_all(&records).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, username: &str) -> Result<Option<Credential>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|c| c.username == username).cloned())
    }

    async fn append(&self, credential: Credential) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if records.iter().any(|c| c.username == credential.username) {
            return Err(StoreError::Conflict(credential.username));
        }
        records.push(credential);
        Ok(())
    }
}
