// Database and document provisioning
//
// Creates are idempotent: "already exists" answers (412/409 for databases, 409 for the
// config document) become `ProvisionOutcome::AlreadyPresent`. The security document is
// written on every run, so a hand-edited `_security` is put back to admin-only.

use crate::couch::client::CouchClient;
use crate::couch::transport::HttpResponse;
use crate::error::{BootstrapError, BootstrapResult};
use crate::models::documents::{AppConfigDocument, SecurityDocument, APP_CONFIG_DOC_ID};
use crate::models::state::{AdminCredentials, ProvisionOutcome};
use crate::utils::validation::validate_couch_db_name;
use log::info;

pub const APP_DB: &str = "app";
pub const PLUGINS_DB: &str = "plugins";

/// Creates `name` if missing, then (re)applies the admin-only security document.
pub async fn ensure_database(
    client: &CouchClient,
    name: &str,
    creds: &AdminCredentials,
) -> BootstrapResult<ProvisionOutcome> {
    validate_couch_db_name(name).map_err(|e| BootstrapError::Input(e.to_string()))?;

    let resp = client.put(&[name], Some(creds), None).await?;
    let outcome = match resp.status {
        201 | 202 => ProvisionOutcome::Created,
        412 | 409 => ProvisionOutcome::AlreadyPresent,
        _ => return Err(unexpected("create_database", name, &resp)),
    };
    info!(
        "[PHASE: provision] [STEP: create_database] Database '{}': {:?}",
        name, outcome
    );

    apply_security(client, name, creds).await?;
    Ok(outcome)
}

/// `PUT /{name}/_security` with admins and members restricted to the `_admin` role.
pub async fn apply_security(
    client: &CouchClient,
    name: &str,
    creds: &AdminCredentials,
) -> BootstrapResult<()> {
    let doc = serde_json::to_value(SecurityDocument::admin_only()).map_err(|e| {
        BootstrapError::Input(format!("Cannot serialize security document: {}", e))
    })?;
    let resp = client
        .put(&[name, "_security"], Some(creds), Some(doc))
        .await?;
    if !resp.is_success() {
        return Err(unexpected("apply_security", name, &resp));
    }
    info!(
        "[PHASE: provision] [STEP: apply_security] Security document applied to '{}'",
        name
    );
    Ok(())
}

/// Writes the application config document into `app` unless it is already there.
/// An existing document is left untouched.
pub async fn ensure_app_config(
    client: &CouchClient,
    creds: &AdminCredentials,
    app_name: &str,
) -> BootstrapResult<ProvisionOutcome> {
    let app_name = app_name.trim();
    if app_name.is_empty() {
        return Err(BootstrapError::Input(
            "Application name must not be empty".to_string(),
        ));
    }

    let doc = AppConfigDocument::new(app_name, chrono::Utc::now());
    let body = serde_json::to_value(&doc)
        .map_err(|e| BootstrapError::Input(format!("Cannot serialize app config: {}", e)))?;

    let resp = client
        .put(&[APP_DB, APP_CONFIG_DOC_ID], Some(creds), Some(body))
        .await?;
    let outcome = match resp.status {
        201 | 202 => ProvisionOutcome::Created,
        409 => ProvisionOutcome::AlreadyPresent,
        _ => return Err(unexpected("create_app_config", APP_DB, &resp)),
    };
    info!(
        "[PHASE: provision] [STEP: create_app_config] Config document for '{}': {:?}",
        app_name, outcome
    );
    Ok(outcome)
}

fn unexpected(step: &str, db: &str, resp: &HttpResponse) -> BootstrapError {
    match resp.status {
        401 | 403 => BootstrapError::Authentication(format!(
            "{} on '{}' was refused (HTTP {}: {})",
            step,
            db,
            resp.status,
            resp.reason()
        )),
        status => BootstrapError::Provisioning {
            step: step.to_string(),
            status,
            reason: resp.reason(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couch::fake::{FakeCouch, FakeDb};
    use crate::couch::transport::Method;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<FakeCouch>, CouchClient, AdminCredentials) {
        let fake = FakeCouch::guarded("_bootstrap", "pw");
        let client = CouchClient::new(FakeCouch::endpoint(), fake.clone());
        (fake, client, AdminCredentials::new("_bootstrap", "pw"))
    }

    fn admin_only() -> serde_json::Value {
        json!({
            "admins": { "names": [], "roles": ["_admin"] },
            "members": { "names": [], "roles": ["_admin"] }
        })
    }

    #[tokio::test]
    async fn creates_database_and_locks_it() {
        let (fake, client, creds) = setup();

        let outcome = ensure_database(&client, APP_DB, &creds).await.unwrap();

        assert_eq!(outcome, ProvisionOutcome::Created);
        assert_eq!(fake.database(APP_DB).unwrap().security, Some(admin_only()));
    }

    #[tokio::test]
    async fn existing_database_is_already_present_and_security_is_reapplied() {
        let (fake, client, creds) = setup();
        fake.add_database(
            PLUGINS_DB,
            FakeDb {
                security: Some(json!({"admins": {"names": ["mallory"], "roles": []}})),
                ..FakeDb::default()
            },
        );

        let outcome = ensure_database(&client, PLUGINS_DB, &creds).await.unwrap();

        assert_eq!(outcome, ProvisionOutcome::AlreadyPresent);
        assert_eq!(
            fake.database(PLUGINS_DB).unwrap().security,
            Some(admin_only())
        );
        assert_eq!(fake.count(Method::Put, "/plugins/_security"), 1);
    }

    #[tokio::test]
    async fn conflict_status_also_counts_as_present() {
        let (fake, client, creds) = setup();
        fake.override_status(Method::Put, "/app", 409);
        fake.add_database(APP_DB, FakeDb::default());

        let outcome = ensure_database(&client, APP_DB, &creds).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_any_request() {
        let (fake, client, creds) = setup();
        let err = ensure_database(&client, "Bad Name", &creds)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "input");
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_create_is_authentication_and_server_error_is_provisioning() {
        let (_fake, client, _) = setup();
        let wrong = AdminCredentials::new("_bootstrap", "nope");
        let err = ensure_database(&client, APP_DB, &wrong).await.unwrap_err();
        assert_eq!(err.kind(), "authentication");

        let (fake, client, creds) = setup();
        fake.override_status(Method::Put, "/app", 500);
        match ensure_database(&client, APP_DB, &creds).await.unwrap_err() {
            BootstrapError::Provisioning { step, status, .. } => {
                assert_eq!(step, "create_database");
                assert_eq!(status, 500);
            }
            other => panic!("expected Provisioning, got {:?}", other),
        }
        assert_eq!(fake.count(Method::Put, "/app/_security"), 0);
    }

    #[tokio::test]
    async fn security_failure_is_an_error_even_when_database_exists() {
        let (fake, client, creds) = setup();
        fake.add_database(APP_DB, FakeDb::default());
        fake.override_status(Method::Put, "/app/_security", 500);

        let err = ensure_database(&client, APP_DB, &creds).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Provisioning { status: 500, .. }));
    }

    #[tokio::test]
    async fn app_config_created_once() {
        let (fake, client, creds) = setup();
        ensure_database(&client, APP_DB, &creds).await.unwrap();

        let first = ensure_app_config(&client, &creds, "shop").await.unwrap();
        let doc = fake.database(APP_DB).unwrap().docs[APP_CONFIG_DOC_ID].clone();
        let second = ensure_app_config(&client, &creds, "renamed").await.unwrap();

        assert_eq!(first, ProvisionOutcome::Created);
        assert_eq!(second, ProvisionOutcome::AlreadyPresent);
        assert_eq!(doc["_id"], "config");
        assert_eq!(doc["name"], "shop");
        assert_eq!(doc["config"], json!({}));
        // the existing document is not overwritten
        assert_eq!(fake.database(APP_DB).unwrap().docs[APP_CONFIG_DOC_ID], doc);
    }

    #[tokio::test]
    async fn app_config_requires_a_name_and_the_database() {
        let (_fake, client, creds) = setup();
        let err = ensure_app_config(&client, &creds, "  ").await.unwrap_err();
        assert_eq!(err.kind(), "input");

        // no `app` database yet: the server answers 404
        let err = ensure_app_config(&client, &creds, "shop").await.unwrap_err();
        assert!(matches!(err, BootstrapError::Provisioning { status: 404, .. }));
    }
}
