// Persistence for the server admin credentials
//
// The orchestrator only calls `get` and `set`. FileCredentialStore keeps the pair in the
// `[couch]` table of a TOML file (username, sealed `ENCv1:` password, updated_at) and
// leaves every other table in that file alone.

use crate::error::{BootstrapError, BootstrapResult};
use crate::models::state::AdminCredentials;
use crate::security::secret_protector::SecretProtector;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const COUCH_TABLE: &str = "couch";

/// Storage backend for the current admin pair.
///
/// `get` returns `Ok(None)` when nothing is stored; that is a normal answer, not an error.
/// Any failure to read or write is a [`BootstrapError::Persistence`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self) -> BootstrapResult<Option<AdminCredentials>>;

    /// Overwrites whatever pair was stored before.
    async fn set(&self, credentials: &AdminCredentials) -> BootstrapResult<()>;
}

/// TOML-file backed store.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    secrets: Arc<SecretProtector>,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf, secrets: Arc<SecretProtector>) -> Self {
        Self { path, secrets }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> BootstrapResult<toml::Table> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(toml::Table::new());
        }

        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            BootstrapError::Persistence(format!(
                "Cannot read credentials file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        contents.parse::<toml::Table>().map_err(|e| {
            BootstrapError::Persistence(format!(
                "Credentials file {} is not valid TOML: {}",
                self.path.display(),
                e.message()
            ))
        })
    }

    async fn write_table(&self, table: &toml::Table) -> BootstrapResult<()> {
        let contents = toml::to_string_pretty(table).map_err(|e| {
            BootstrapError::Persistence(format!("Failed to serialize credentials: {}", e))
        })?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BootstrapError::Persistence(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // write-then-rename so a crash never leaves a half-written file behind
        let tmp = self.path.with_extension("toml.tmp");
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let write = async {
            use tokio::io::AsyncWriteExt;
            let mut file = opts.open(&tmp).await?;
            file.write_all(contents.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        write.await.map_err(|e| {
            BootstrapError::Persistence(format!(
                "Cannot write credentials file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> BootstrapResult<Option<AdminCredentials>> {
        let table = self.read_table().await?;
        let Some(couch) = table.get(COUCH_TABLE).and_then(|v| v.as_table()) else {
            return Ok(None);
        };

        let username = couch.get("username").and_then(|v| v.as_str()).unwrap_or("");
        let stored_password = couch.get("password").and_then(|v| v.as_str()).unwrap_or("");
        if username.is_empty() || stored_password.is_empty() {
            return Ok(None);
        }

        let password = self
            .secrets
            .decrypt(stored_password)
            .await
            .map_err(|e| BootstrapError::Persistence(format!("{:#}", e)))?;
        Ok(Some(AdminCredentials::new(username, password)))
    }

    async fn set(&self, credentials: &AdminCredentials) -> BootstrapResult<()> {
        let sealed = self
            .secrets
            .encrypt(&credentials.password)
            .await
            .map_err(|e| BootstrapError::Persistence(format!("{:#}", e)))?;

        let mut table = self.read_table().await?;
        let mut couch = toml::Table::new();
        couch.insert(
            "username".to_string(),
            toml::Value::String(credentials.username.clone()),
        );
        couch.insert("password".to_string(), toml::Value::String(sealed));
        couch.insert(
            "updated_at".to_string(),
            toml::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        table.insert(COUCH_TABLE.to_string(), toml::Value::Table(couch));

        self.write_table(&table).await
    }
}

/// Process-local store for embedding callers that persist credentials themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<AdminCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<AdminCredentials>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> BootstrapResult<Option<AdminCredentials>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| BootstrapError::Persistence("credential store lock poisoned".to_string()))?;
        Ok(guard.clone())
    }

    async fn set(&self, credentials: &AdminCredentials) -> BootstrapResult<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| BootstrapError::Persistence("credential store lock poisoned".to_string()))?;
        *guard = Some(credentials.clone());
        Ok(())
    }
}
