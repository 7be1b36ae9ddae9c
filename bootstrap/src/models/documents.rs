// Documents written to the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// CouchDB's built-in server administrator role.
pub const ADMIN_ROLE: &str = "_admin";

/// Fixed id of the application config document inside the `app` database.
pub const APP_CONFIG_DOC_ID: &str = "config";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMembers {
    pub names: Vec<String>,
    pub roles: Vec<String>,
}

/// Per-database access control record (`/{db}/_security`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDocument {
    pub admins: SecurityMembers,
    pub members: SecurityMembers,
}

impl SecurityDocument {
    /// Administration and membership restricted to server admins; no user names, ever.
    pub fn admin_only() -> Self {
        let admin_role = || SecurityMembers {
            names: Vec::new(),
            roles: vec![ADMIN_ROLE.to_string()],
        };
        Self {
            admins: admin_role(),
            members: admin_role(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub config: Map<String, Value>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppConfigDocument {
    pub fn new(app_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: APP_CONFIG_DOC_ID.to_string(),
            config: Map::new(),
            name: app_name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
