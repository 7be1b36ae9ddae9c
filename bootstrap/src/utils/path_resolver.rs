use anyhow::Result;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "couch-bootstrap";
const LOG_DIR: &str = "Bootstrap_Log";

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> Result<PathBuf> {
    // Prefer the folder where the EXE is running from (works in dev and deployed)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    // Fallback: current working directory
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    Ok(cwd)
}

/// Per-user configuration directory for this tool (`~/.config/couch-bootstrap` on Linux).
pub fn resolve_config_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join(APP_DIR)
    } else if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".config").join(APP_DIR)
    } else {
        PathBuf::from(format!(".{}", APP_DIR))
    }
}

pub fn default_credentials_path() -> PathBuf {
    resolve_config_dir().join("credentials.toml")
}

/// Key file used to encrypt stored passwords; lives next to the credentials file.
pub fn default_key_path(credentials_path: &Path) -> PathBuf {
    credentials_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(resolve_config_dir)
        .join("secrets")
        .join("bootstrap_master_key.b64")
}

/// Resolve log folder (absolute path)
pub fn resolve_log_folder() -> Result<PathBuf> {
    // Walk up from CWD looking for an existing `Bootstrap_Log/` so nested working dirs
    // share one folder.
    if let Ok(mut dir) = std::env::current_dir() {
        for _ in 0..12 {
            let candidate = dir.join(LOG_DIR);
            if candidate.exists() {
                return Ok(candidate);
            }
            if let Some(parent) = dir.parent() {
                dir = parent.to_path_buf();
            } else {
                break;
            }
        }
    }

    // Fallback: per-user data dir, then the deployment folder (best-effort).
    let base = match dirs::data_local_dir() {
        Some(d) => d.join(APP_DIR),
        None => resolve_deployment_folder()?,
    };
    let log_dir = base.join(LOG_DIR);
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder: {}", e))?;
    Ok(log_dir)
}

/// Server log location named in the "not reachable" hint.
pub fn resolve_server_log_path(configured: Option<&Path>) -> PathBuf {
    if let Some(p) = configured {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("couch.log")
}
