// Install orchestrator
//
// probe -> admin mode -> (create internal admin + register app admin | rotate credentials)
//       -> app database -> app config document -> plugins database
//
// Strictly sequential; the first error is returned as-is. Nothing is rolled back:
// every step is idempotent, so running again is the recovery path.

use crate::couch::admin::{
    create_internal_admin, is_admin_party, register_admin_user, resolve_admin_user,
};
use crate::couch::client::CouchClient;
use crate::couch::probe::{wait_until_reachable, ProbeAttempt};
use crate::couch::provision::{ensure_app_config, ensure_database, APP_DB, PLUGINS_DB};
use crate::couch::rotation::{ensure_verified_credentials, RotationPolicy};
use crate::couch::transport::HttpTransport;
use crate::error::BootstrapResult;
use crate::models::config::BootstrapConfig;
use crate::models::state::{AdminPartyState, DatabaseReport, InstallReport, ServerEndpoint};
use crate::prompt::Prompter;
use crate::security::credential_store::CredentialStore;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub correlation_id: String,
    pub step: String,
    pub severity: String, // "info" | "warn" | "error"
    pub phase: String,
    pub percent: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
}

pub type ProgressEmitter = Arc<dyn Fn(ProgressPayload) + Send + Sync>;

pub struct Installer {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    prompter: Arc<dyn Prompter>,
    emit_progress: ProgressEmitter,
}

/// Per-run context so every event carries the same correlation id and clock.
struct RunContext {
    correlation_id: String,
    started: Instant,
    emit_progress: ProgressEmitter,
}

impl RunContext {
    fn emit(&self, step: &str, severity: &str, percent: i32, message: impl Into<String>) {
        (self.emit_progress)(ProgressPayload {
            correlation_id: self.correlation_id.clone(),
            step: step.to_string(),
            severity: severity.to_string(),
            phase: "install".to_string(),
            percent,
            message: message.into(),
            elapsed_ms: Some(self.started.elapsed().as_millis()),
        });
    }
}

impl Installer {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        prompter: Arc<dyn Prompter>,
    ) -> Self {
        Self {
            transport,
            store,
            prompter,
            emit_progress: Arc::new(|_: ProgressPayload| {}),
        }
    }

    pub fn with_progress(mut self, emit_progress: ProgressEmitter) -> Self {
        self.emit_progress = emit_progress;
        self
    }

    /// Runs the whole bootstrap against `endpoint`.
    pub async fn install(
        &self,
        endpoint: &ServerEndpoint,
        cfg: &BootstrapConfig,
    ) -> BootstrapResult<InstallReport> {
        let ctx = RunContext {
            correlation_id: uuid::Uuid::new_v4().simple().to_string(),
            started: Instant::now(),
            emit_progress: Arc::clone(&self.emit_progress),
        };
        info!(
            "[PHASE: install] [STEP: start] Bootstrap {} starting for {} (app '{}', interactive: {})",
            ctx.correlation_id, endpoint, cfg.app_name, cfg.interactive
        );
        ctx.emit("start", "info", 1, "Starting CouchDB bootstrap...");

        match self.run_steps(&ctx, endpoint, cfg).await {
            Ok(report) => {
                info!(
                    "[PHASE: install] [STEP: complete] Bootstrap {} finished in {:?}",
                    ctx.correlation_id, report.elapsed
                );
                ctx.emit("complete", "info", 100, "CouchDB bootstrap complete.");
                Ok(report)
            }
            Err(e) => {
                error!(
                    "[PHASE: install] [STEP: failed] Bootstrap {} failed ({}): {}",
                    ctx.correlation_id,
                    e.kind(),
                    e
                );
                ctx.emit("failed", "error", 100, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_steps(
        &self,
        ctx: &RunContext,
        endpoint: &ServerEndpoint,
        cfg: &BootstrapConfig,
    ) -> BootstrapResult<InstallReport> {
        let client = CouchClient::new(endpoint.clone(), Arc::clone(&self.transport));

        // 0. nothing else touches the server until it answers
        ctx.emit("probe", "info", 5, format!("Waiting for CouchDB at {}...", endpoint));
        let on_attempt = |a: &ProbeAttempt| {
            ctx.emit(
                "probe",
                "warn",
                5,
                format!(
                    "CouchDB not ready (attempt {}, {} ms): {}",
                    a.attempt,
                    a.elapsed.as_millis(),
                    a.detail
                ),
            );
        };
        let reached = wait_until_reachable(&client, &cfg.probe_options(), &on_attempt).await?;
        let client = client.with_endpoint(reached);

        // 1. admin state
        ctx.emit("admin_mode", "info", 20, "Checking CouchDB admin mode...");
        let admin_state = AdminPartyState::from_party_flag(is_admin_party(&client).await?);
        let (creds, app_admin_registered) = match admin_state {
            AdminPartyState::Party => {
                // resolved first: once the internal admin exists, a rerun takes the
                // guarded path and would never register `admin`
                let user = resolve_admin_user(cfg, self.prompter.as_ref()).await?;

                ctx.emit(
                    "internal_admin",
                    "info",
                    30,
                    "Admin party detected; creating internal admin...",
                );
                let creds = create_internal_admin(&client, self.store.as_ref()).await?;

                ctx.emit("app_admin", "info", 40, "Registering application admin...");
                register_admin_user(&client, &creds, &user).await?;
                (creds, true)
            }
            AdminPartyState::Guarded => {
                ctx.emit(
                    "verify_credentials",
                    "info",
                    30,
                    "Verifying stored CouchDB admin credentials...",
                );
                let creds = ensure_verified_credentials(
                    &client,
                    self.store.as_ref(),
                    self.prompter.as_ref(),
                    &RotationPolicy::from_config(cfg),
                )
                .await?;
                (creds, false)
            }
        };
        info!(
            "[PHASE: install] [STEP: credentials] Using '{}' (fingerprint {})",
            creds.username,
            creds.fingerprint()
        );

        // 2. app database + config document
        ctx.emit("app_db", "info", 60, "Creating app database...");
        let app_outcome = ensure_database(&client, APP_DB, &creds).await?;
        ctx.emit("app_config", "info", 75, "Writing app config document...");
        let app_config = ensure_app_config(&client, &creds, &cfg.app_name).await?;

        // 3. plugins database
        ctx.emit("plugins_db", "info", 90, "Creating plugins database...");
        let plugins_outcome = ensure_database(&client, PLUGINS_DB, &creds).await?;

        Ok(InstallReport {
            correlation_id: ctx.correlation_id.clone(),
            admin_state,
            internal_admin: creds.username.clone(),
            app_admin_registered,
            databases: vec![
                DatabaseReport {
                    name: APP_DB.to_string(),
                    outcome: app_outcome,
                },
                DatabaseReport {
                    name: PLUGINS_DB.to_string(),
                    outcome: plugins_outcome,
                },
            ],
            app_config,
            elapsed: ctx.started.elapsed(),
        })
    }
}
