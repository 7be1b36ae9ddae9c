// Bootstrap configuration
//
// Layering (last wins): built-in defaults -> optional TOML file -> COUCH_BOOTSTRAP_* env vars
// -> command-line overrides applied by the binary.

use crate::couch::probe::ProbeOptions;
use crate::error::{BootstrapError, BootstrapResult};
use crate::utils::logging::mask_couch_url;
use crate::utils::path_resolver::{default_credentials_path, resolve_server_log_path};
use crate::utils::validation::{validate_couch_url, validate_password};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "COUCH_BOOTSTRAP";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub couch_url: String,
    pub app_name: String,
    /// Password for the application `admin` user; skips the prompt when set.
    pub admin_password: Option<String>,
    /// false = never prompt (CI, containers); a fixed fallback identity is used instead.
    pub interactive: bool,
    pub probe_timeout_ms: u64,
    pub probe_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Prompt rounds allowed when the stored credentials are rejected.
    pub max_credential_attempts: u32,
    pub credentials_path: Option<PathBuf>,
    pub server_log_path: Option<PathBuf>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            couch_url: "http://127.0.0.1:5984".to_string(),
            app_name: "app".to_string(),
            admin_password: None,
            interactive: true,
            probe_timeout_ms: 30_000,
            probe_interval_ms: 200,
            request_timeout_ms: 10_000,
            max_credential_attempts: 3,
            credentials_path: None,
            server_log_path: None,
        }
    }
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("couch_url", &mask_couch_url(&self.couch_url))
            .field("app_name", &self.app_name)
            .field(
                "admin_password",
                &self.admin_password.as_ref().map(|_| "***"),
            )
            .field("interactive", &self.interactive)
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("probe_interval_ms", &self.probe_interval_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_credential_attempts", &self.max_credential_attempts)
            .field("credentials_path", &self.credentials_path)
            .field("server_log_path", &self.server_log_path)
            .finish()
    }
}

impl BootstrapConfig {
    /// Load defaults, then `file` (if any), then process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Same as [`BootstrapConfig::load`], but with an explicit environment map instead of the
    /// process environment when `env` is `Some`.
    pub fn load_from(file: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let defaults = config::Config::try_from(&BootstrapConfig::default())
            .context("Failed to build default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let cfg: BootstrapConfig = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Configuration has invalid values")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> BootstrapResult<()> {
        validate_couch_url(&self.couch_url).map_err(|e| BootstrapError::Config(e.to_string()))?;

        if self.app_name.trim().is_empty() {
            return Err(BootstrapError::Config("app_name is required".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(BootstrapError::Config(
                "probe_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.probe_interval_ms == 0 {
            return Err(BootstrapError::Config(
                "probe_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(BootstrapError::Config(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_credential_attempts == 0 {
            return Err(BootstrapError::Config(
                "max_credential_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(password) = &self.admin_password {
            validate_password(password)
                .map_err(|e| BootstrapError::Config(format!("admin_password: {}", e)))?;
        }
        Ok(())
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(self.probe_timeout_ms),
            interval: Duration::from_millis(self.probe_interval_ms),
            log_hint: self.log_hint(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path
            .clone()
            .unwrap_or_else(default_credentials_path)
    }

    /// Where an operator should look when the server never comes up.
    pub fn log_hint(&self) -> String {
        resolve_server_log_path(self.server_log_path.as_deref())
            .display()
            .to_string()
    }
}
