// In-memory CouchDB stand-in for deterministic tests.
//
// Models just enough of the server: root health, admin party vs. guarded auth, the
// `_config/admins` section, database creation (412 when it exists), `_security`, and
// create-only document writes (409 on conflict). Every request is recorded.

use crate::couch::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use crate::error::{BootstrapError, BootstrapResult};
use crate::models::state::{AdminCredentials, ServerEndpoint};
use crate::security::credential_store::CredentialStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub(crate) const FAKE_BASE_URL: &str = "http://couch.test:5984/";

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDb {
    pub security: Option<Value>,
    pub docs: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub user: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    /// Root requests that fail with a connection error before the server "comes up".
    down_for: u32,
    never_up: bool,
    admins: HashMap<String, String>,
    databases: BTreeMap<String, FakeDb>,
    overrides: HashMap<(&'static str, String), u16>,
    requests: Vec<RecordedRequest>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeCouch {
    state: Mutex<FakeState>,
}

impl FakeCouch {
    /// Fresh server with no admins configured.
    pub fn party() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Server that already has one admin.
    pub fn guarded(username: &str, password: &str) -> Arc<Self> {
        let fake = Self::default();
        fake.lock()
            .admins
            .insert(username.to_string(), password.to_string());
        Arc::new(fake)
    }

    pub fn endpoint() -> ServerEndpoint {
        ServerEndpoint::parse(FAKE_BASE_URL).unwrap()
    }

    pub fn down_for(self: &Arc<Self>, attempts: u32) -> Arc<Self> {
        self.lock().down_for = attempts;
        Arc::clone(self)
    }

    pub fn never_up(self: &Arc<Self>) -> Arc<Self> {
        self.lock().never_up = true;
        Arc::clone(self)
    }

    /// Answer `status` (with an error body) for `method path`, e.g. `(Method::Put, "/app")`.
    pub fn override_status(self: &Arc<Self>, method: Method, path: &str, status: u16) -> Arc<Self> {
        self.lock()
            .overrides
            .insert((method.as_str(), path.to_string()), status);
        Arc::clone(self)
    }

    pub fn add_database(self: &Arc<Self>, name: &str, db: FakeDb) -> Arc<Self> {
        self.lock().databases.insert(name.to_string(), db);
        Arc::clone(self)
    }

    pub fn admins(&self) -> HashMap<String, String> {
        self.lock().admins.clone()
    }

    pub fn database(&self, name: &str) -> Option<FakeDb> {
        self.lock().databases.get(name).cloned()
    }

    pub fn database_names(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    /// Whether `creds` would be accepted on an admin-only resource.
    pub fn accepts(&self, creds: &AdminCredentials) -> bool {
        self.lock().admins.get(&creds.username) == Some(&creds.password)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

fn reply(status: u16, body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status,
        body: Some(body),
    })
}

fn unauthorized() -> Result<HttpResponse, TransportError> {
    reply(
        401,
        json!({"error": "unauthorized", "reason": "You are not a server admin."}),
    )
}

#[async_trait]
impl HttpTransport for FakeCouch {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut st = self.lock();
        let path = request.url.path().to_string();
        st.requests.push(RecordedRequest {
            method: request.method,
            path: path.clone(),
            user: request.auth.as_ref().map(|a| a.username.clone()),
        });

        let is_root = path == "/" || path.is_empty();
        if st.never_up || (is_root && st.down_for > 0) {
            if is_root && st.down_for > 0 {
                st.down_for -= 1;
            }
            return Err(TransportError {
                user_message: "Unable to connect to CouchDB.".to_string(),
                internal_details: "connection refused".to_string(),
            });
        }

        if let Some(status) = st.overrides.get(&(request.method.as_str(), path.clone())) {
            return reply(
                *status,
                json!({"error": "injected", "reason": format!("injected status {}", status)}),
            );
        }

        let authorized = match &request.auth {
            Some(c) => st.admins.get(&c.username) == Some(&c.password),
            None => st.admins.is_empty(),
        };

        let segments: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

        match (request.method, segs.as_slice()) {
            (Method::Get, []) => reply(200, json!({"couchdb": "Welcome", "version": "fake"})),

            (Method::Head, ["_users", "_all_docs"]) => {
                if authorized {
                    Ok(HttpResponse {
                        status: 200,
                        body: None,
                    })
                } else {
                    Ok(HttpResponse {
                        status: 401,
                        body: None,
                    })
                }
            }

            (Method::Put, ["_config", "admins", name]) => {
                if !authorized {
                    return unauthorized();
                }
                let Some(Value::String(password)) = request.body.clone() else {
                    return reply(400, json!({"error": "bad_request", "reason": "expected a JSON string"}));
                };
                let previous = st
                    .admins
                    .insert((*name).to_string(), password)
                    .unwrap_or_default();
                reply(200, Value::String(previous))
            }

            (Method::Put, [db]) => {
                if !authorized {
                    return unauthorized();
                }
                if st.databases.contains_key(*db) {
                    return reply(
                        412,
                        json!({"error": "file_exists", "reason": "The database could not be created, the file already exists."}),
                    );
                }
                st.databases.insert((*db).to_string(), FakeDb::default());
                reply(201, json!({"ok": true}))
            }

            (Method::Put, [db, "_security"]) => {
                if !authorized {
                    return unauthorized();
                }
                let body = request.body.clone().unwrap_or(Value::Null);
                match st.databases.get_mut(*db) {
                    Some(fake_db) => {
                        fake_db.security = Some(body);
                        reply(200, json!({"ok": true}))
                    }
                    None => reply(404, json!({"error": "not_found", "reason": "Database does not exist."})),
                }
            }

            (Method::Put, [db, doc_id]) => {
                if !authorized {
                    return unauthorized();
                }
                let body = request.body.clone().unwrap_or(Value::Null);
                match st.databases.get_mut(*db) {
                    Some(fake_db) => {
                        if fake_db.docs.contains_key(*doc_id) {
                            return reply(
                                409,
                                json!({"error": "conflict", "reason": "Document update conflict."}),
                            );
                        }
                        fake_db.docs.insert((*doc_id).to_string(), body);
                        reply(201, json!({"ok": true, "id": doc_id, "rev": "1-fake"}))
                    }
                    None => reply(404, json!({"error": "not_found", "reason": "Database does not exist."})),
                }
            }

            _ => reply(404, json!({"error": "not_found", "reason": "missing"})),
        }
    }
}

/// Credential store that reads fine but refuses every write.
#[derive(Debug, Default)]
pub(crate) struct FailingStore {
    pub stored: Option<AdminCredentials>,
}

#[async_trait]
impl CredentialStore for FailingStore {
    async fn get(&self) -> BootstrapResult<Option<AdminCredentials>> {
        Ok(self.stored.clone())
    }

    async fn set(&self, _credentials: &AdminCredentials) -> BootstrapResult<()> {
        Err(BootstrapError::Persistence(
            "credentials file is read-only".to_string(),
        ))
    }
}
