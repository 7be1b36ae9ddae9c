// Bootstrap error kinds
//
// Every step returns these unchanged to the orchestrator's caller. The only errors that
// are ever swallowed are the "already exists" answers for databases and the config doc,
// and those are turned into ProvisionOutcome::AlreadyPresent before they become errors.

use std::time::Duration;
use thiserror::Error;

pub type BootstrapResult<T> = std::result::Result<T, BootstrapError>;

#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The prober's deadline elapsed without a 200 from the server root.
    #[error(
        "Timed out waiting for CouchDB at {endpoint} after {elapsed:?}, please check {log_hint}"
    )]
    Unreachable {
        endpoint: String,
        elapsed: Duration,
        log_hint: String,
    },

    /// Connection refused, DNS failure, request timeout, unreadable body.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials rejected (or missing) where they are required.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A resource already exists and the caller asked for strict creation.
    #[error("Resource already exists: {0}")]
    ProvisioningConflict(String),

    /// The server answered with a status the step does not accept.
    #[error("Provisioning step '{step}' failed with HTTP {status}: {reason}")]
    Provisioning {
        step: String,
        status: u16,
        reason: String,
    },

    /// Credential store write/read failure.
    #[error("Failed to persist credentials: {0}")]
    Persistence(String),

    /// Malformed prompted or configured value (empty password, bad database name, ...).
    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No usable terminal for an interactive prompt.
    #[error("Terminal unavailable: {0}")]
    Terminal(String),

    /// The operator aborted an interactive prompt (Esc / Ctrl-C).
    #[error("Cancelled by operator: {0}")]
    Cancelled(String),
}

impl BootstrapError {
    /// Short machine-friendly kind, used in progress events and JSON logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BootstrapError::Unreachable { .. } => "unreachable",
            BootstrapError::Transport(_) => "transport",
            BootstrapError::Authentication(_) => "authentication",
            BootstrapError::ProvisioningConflict(_) => "provisioning_conflict",
            BootstrapError::Provisioning { .. } => "provisioning",
            BootstrapError::Persistence(_) => "persistence",
            BootstrapError::Input(_) => "input",
            BootstrapError::Config(_) => "config",
            BootstrapError::Terminal(_) => "terminal",
            BootstrapError::Cancelled(_) => "cancelled",
        }
    }
}
