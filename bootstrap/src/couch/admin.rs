// Server admin handling
//
// Admin party detection, credential verification, creation of the internal admin account
// and registration of the application `admin` user. All of it goes through the
// `/_config/admins` section and the privileged `/_users/_all_docs` probe.

use crate::couch::client::CouchClient;
use crate::error::{BootstrapError, BootstrapResult};
use crate::models::config::BootstrapConfig;
use crate::models::state::{AdminCredentials, AdminUser};
use crate::prompt::Prompter;
use crate::security::credential_store::CredentialStore;
use crate::security::crypto::generate_password;
use crate::utils::validation::validate_password;
use log::{info, warn};
use serde_json::Value;

/// Account the bootstrap creates for itself while the server is in admin party mode.
pub const INTERNAL_ADMIN_USERNAME: &str = "_bootstrap";

/// Application-level administrator name. Not configurable.
pub const APP_ADMIN_USERNAME: &str = "admin";

/// Used for the application admin when nobody can be asked and nothing is configured.
pub const NON_INTERACTIVE_ADMIN_PASSWORD: &str = "ci-bootstrap";

pub const ADMIN_PASSWORD_PROMPT: &str = "Please set an admin password";

/// Admin-only resource: anonymous access works only while no admin exists.
const PRIVILEGED_RESOURCE: [&str; 2] = ["_users", "_all_docs"];

/// `true` when an anonymous request reaches an admin-only resource.
pub async fn is_admin_party(client: &CouchClient) -> BootstrapResult<bool> {
    let resp = client.head(&PRIVILEGED_RESOURCE, None).await?;
    let party = resp.status == 200;
    info!(
        "[PHASE: admin] [STEP: detect_mode] HEAD /_users/_all_docs -> HTTP {} (admin party: {})",
        resp.status, party
    );
    Ok(party)
}

/// Checks `stored` against the live server. No stored pair is simply "not valid", and
/// costs no request.
pub async fn check_credentials(
    client: &CouchClient,
    stored: Option<&AdminCredentials>,
) -> BootstrapResult<bool> {
    let Some(creds) = stored else {
        info!("[PHASE: admin] [STEP: verify] No stored credentials to verify");
        return Ok(false);
    };

    let resp = client.head(&PRIVILEGED_RESOURCE, Some(creds)).await?;
    let valid = resp.status == 200;
    info!(
        "[PHASE: admin] [STEP: verify] Credentials for '{}' (fingerprint {}) -> HTTP {} (valid: {})",
        creds.username,
        creds.fingerprint(),
        resp.status,
        valid
    );
    Ok(valid)
}

/// Creates the internal admin with a freshly generated password and persists it.
///
/// Only valid while the server is in admin party mode; the caller checks that. Any
/// non-2xx answer is fatal: the server is then in an unknown state for us.
pub async fn create_internal_admin(
    client: &CouchClient,
    store: &dyn CredentialStore,
) -> BootstrapResult<AdminCredentials> {
    let password = generate_password().map_err(|e| {
        BootstrapError::Authentication(format!("Cannot generate internal admin password: {}", e))
    })?;
    let creds = AdminCredentials::new(INTERNAL_ADMIN_USERNAME, password);

    let resp = client
        .put(
            &["_config", "admins", INTERNAL_ADMIN_USERNAME],
            None,
            Some(Value::String(creds.password.clone())),
        )
        .await?;
    if !resp.is_success() {
        return Err(BootstrapError::Authentication(format!(
            "Server refused to create internal admin '{}' (HTTP {}: {})",
            INTERNAL_ADMIN_USERNAME,
            resp.status,
            resp.reason()
        )));
    }

    store.set(&creds).await?;
    info!(
        "[PHASE: admin] [STEP: create_internal_admin] Created '{}' (fingerprint {}) and stored credentials",
        creds.username,
        creds.fingerprint()
    );
    Ok(creds)
}

/// Picks the application admin password: configuration first, then the operator, then
/// the fixed non-interactive identity.
pub async fn resolve_admin_user(
    cfg: &BootstrapConfig,
    prompter: &dyn Prompter,
) -> BootstrapResult<AdminUser> {
    let password = match (&cfg.admin_password, cfg.interactive) {
        (Some(configured), _) => configured.clone(),
        (None, true) => prompter.ask_hidden(ADMIN_PASSWORD_PROMPT).await?,
        (None, false) => {
            warn!(
                "[PHASE: admin] [STEP: resolve_admin_user] Non-interactive run without admin_password; using the fixed fallback password for '{}'",
                APP_ADMIN_USERNAME
            );
            NON_INTERACTIVE_ADMIN_PASSWORD.to_string()
        }
    };

    validate_password(&password).map_err(|e| BootstrapError::Input(e.to_string()))?;
    Ok(AdminUser {
        name: APP_ADMIN_USERNAME.to_string(),
        password,
    })
}

/// Registers `user` as a server admin, authenticated as the internal admin.
pub async fn register_admin_user(
    client: &CouchClient,
    internal: &AdminCredentials,
    user: &AdminUser,
) -> BootstrapResult<()> {
    let resp = client
        .put(
            &["_config", "admins", user.name.as_str()],
            Some(internal),
            Some(Value::String(user.password.clone())),
        )
        .await?;

    match resp.status {
        s if (200..300).contains(&s) => {
            info!(
                "[PHASE: admin] [STEP: register_admin_user] Registered server admin '{}'",
                user.name
            );
            Ok(())
        }
        401 | 403 => Err(BootstrapError::Authentication(format!(
            "Internal admin was rejected while registering '{}' (HTTP {}: {})",
            user.name,
            resp.status,
            resp.reason()
        ))),
        status => Err(BootstrapError::Provisioning {
            step: "register_admin_user".to_string(),
            status,
            reason: resp.reason(),
        }),
    }
}
