// Credential rotation
//
// Used when the server already has admins. The stored pair is verified; if the server
// rejects it, the operator is asked for a working pair, which is stored and verified
// again. Prompt rounds are capped by `max_attempts`, and a non-interactive run never
// prompts at all.

use crate::couch::admin::check_credentials;
use crate::couch::client::CouchClient;
use crate::error::{BootstrapError, BootstrapResult};
use crate::models::config::BootstrapConfig;
use crate::models::state::AdminCredentials;
use crate::prompt::Prompter;
use crate::security::credential_store::CredentialStore;
use crate::utils::validation::{validate_password, validate_username};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub interactive: bool,
    /// Prompt rounds before giving up. Each round is one username + password pair.
    pub max_attempts: u32,
}

impl RotationPolicy {
    pub fn from_config(cfg: &BootstrapConfig) -> Self {
        Self {
            interactive: cfg.interactive,
            max_attempts: cfg.max_credential_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationState {
    Verify,
    PromptAndUpdate,
}

/// Returns a pair the server accepts, prompting and persisting a new one if needed.
pub async fn ensure_verified_credentials(
    client: &CouchClient,
    store: &dyn CredentialStore,
    prompter: &dyn Prompter,
    policy: &RotationPolicy,
) -> BootstrapResult<AdminCredentials> {
    let mut state = RotationState::Verify;
    let mut rounds: u32 = 0;

    loop {
        state = match state {
            RotationState::Verify => {
                let stored = store.get().await?;
                let valid = check_credentials(client, stored.as_ref()).await?;
                match stored {
                    Some(creds) if valid => {
                        info!(
                            "[PHASE: admin] [STEP: rotation] Stored credentials for '{}' accepted",
                            creds.username
                        );
                        return Ok(creds);
                    }
                    _ if !policy.interactive => {
                        return Err(BootstrapError::Authentication(
                            "Stored CouchDB admin credentials are missing or rejected, and prompting is disabled (non-interactive run)".to_string(),
                        ));
                    }
                    _ if rounds >= policy.max_attempts => {
                        return Err(exhausted(policy.max_attempts));
                    }
                    _ => RotationState::PromptAndUpdate,
                }
            }
            RotationState::PromptAndUpdate => {
                rounds += 1;
                info!(
                    "[PHASE: admin] [STEP: rotation] Asking for CouchDB admin credentials (attempt {}/{})",
                    rounds, policy.max_attempts
                );
                match prompt_couch_credentials(prompter).await {
                    Ok(creds) => {
                        store.set(&creds).await?;
                        RotationState::Verify
                    }
                    // a rejected answer earns another round; anything else aborts
                    Err(BootstrapError::Input(reason)) => {
                        warn!(
                            "[PHASE: admin] [STEP: rotation] Rejected input on attempt {}: {}",
                            rounds, reason
                        );
                        if rounds >= policy.max_attempts {
                            return Err(exhausted(policy.max_attempts));
                        }
                        RotationState::PromptAndUpdate
                    }
                    Err(e) => return Err(e),
                }
            }
        };
    }
}

fn exhausted(max_attempts: u32) -> BootstrapError {
    BootstrapError::Authentication(format!(
        "No valid CouchDB admin credentials after {} attempt(s)",
        max_attempts
    ))
}

/// Asks for a username (visible) then a password (hidden).
pub async fn prompt_couch_credentials(prompter: &dyn Prompter) -> BootstrapResult<AdminCredentials> {
    info!("[PHASE: admin] [STEP: prompt] Please enter your CouchDB _admin credentials");

    let username = prompter.ask_visible("Username").await?;
    let username = username.trim().to_string();
    validate_username(&username).map_err(|e| BootstrapError::Input(e.to_string()))?;

    let password = prompter.ask_hidden("Password").await?;
    validate_password(&password).map_err(|e| BootstrapError::Input(e.to_string()))?;

    Ok(AdminCredentials::new(username, password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couch::fake::{FailingStore, FakeCouch};
    use crate::couch::transport::Method;
    use crate::prompt::ScriptedPrompter;
    use crate::security::credential_store::MemoryCredentialStore;
    use std::sync::Arc;

    const HEAD_PATH: &str = "/_users/_all_docs";

    fn client(fake: &Arc<FakeCouch>) -> CouchClient {
        CouchClient::new(FakeCouch::endpoint(), fake.clone())
    }

    fn policy(interactive: bool, max_attempts: u32) -> RotationPolicy {
        RotationPolicy {
            interactive,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn valid_stored_pair_needs_no_prompt() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::new(Some(AdminCredentials::new("ops", "s3cret")));
        let prompter = ScriptedPrompter::default();

        let creds = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 3))
            .await
            .unwrap();

        assert_eq!(creds.username, "ops");
        assert!(prompter.asked().is_empty());
        assert_eq!(fake.count(Method::Head, HEAD_PATH), 1);
    }

    #[tokio::test]
    async fn stale_pair_then_good_prompt_is_exactly_one_cycle() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::new(Some(AdminCredentials::new("ops", "old")));
        let prompter = ScriptedPrompter::new(["ops", "s3cret"]);

        let creds = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 3))
            .await
            .unwrap();

        assert_eq!(creds, AdminCredentials::new("ops", "s3cret"));
        assert_eq!(store.get().await.unwrap(), Some(creds));
        // VERIFY -> PROMPT -> VERIFY
        assert_eq!(fake.count(Method::Head, HEAD_PATH), 2);
        assert_eq!(
            prompter.asked(),
            vec![(false, "Username".to_string()), (true, "Password".to_string())]
        );
    }

    #[tokio::test]
    async fn non_interactive_never_prompts() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::new(Some(AdminCredentials::new("ops", "old")));
        let prompter = ScriptedPrompter::default();

        let err = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(false, 3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "authentication");
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn wrong_answers_exhaust_the_budget() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::default();
        let prompter = ScriptedPrompter::new(["ops", "a", "ops", "b"]);

        let err = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 2))
            .await
            .unwrap_err();

        assert!(
            matches!(err, BootstrapError::Authentication(ref m) if m.contains("2 attempt")),
            "{:?}",
            err
        );
        // no HEAD for the initial (absent) pair, one per stored answer
        assert_eq!(fake.count(Method::Head, HEAD_PATH), 2);
        assert_eq!(prompter.asked().len(), 4);
    }

    #[tokio::test]
    async fn empty_input_consumes_an_attempt_and_reprompts() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::default();
        let prompter = ScriptedPrompter::new(["", "ops", "s3cret"]);

        let creds = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 2))
            .await
            .unwrap();

        assert_eq!(creds.username, "ops");
        assert_eq!(prompter.asked().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_prompt_aborts() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::default();
        let prompter = ScriptedPrompter::new(Vec::<String>::new())
            .then_fail(BootstrapError::Cancelled("prompt 'Username'".to_string()));

        let err = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn missing_terminal_aborts_without_burning_attempts() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = MemoryCredentialStore::default();
        let prompter = ScriptedPrompter::new(Vec::<String>::new())
            .then_fail(BootstrapError::Terminal("not a tty".to_string()));

        let err = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "terminal");
        assert_eq!(prompter.asked().len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_aborts_immediately() {
        let fake = FakeCouch::guarded("ops", "s3cret");
        let store = FailingStore::default();
        let prompter = ScriptedPrompter::new(["ops", "s3cret"]);

        let err = ensure_verified_credentials(&client(&fake), &store, &prompter, &policy(true, 3))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "persistence");
        assert_eq!(prompter.asked().len(), 2);
    }
}
