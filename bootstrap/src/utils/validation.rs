// Input validation utilities

use anyhow::Result;
use regex::Regex;
use url::Url;

/// Longest database name CouchDB accepts.
const MAX_DB_NAME_LEN: usize = 238;

/// Validate the server base URL. Only absolute http(s) URLs with a host are accepted.
pub fn validate_couch_url(raw: &str) -> Result<Url> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("CouchDB URL cannot be empty"));
    }

    let url = Url::parse(s).map_err(|e| anyhow::anyhow!("CouchDB URL is invalid: {}", e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow::anyhow!(
            "CouchDB URL must use http or https, got '{}'",
            url.scheme()
        ));
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(anyhow::anyhow!("CouchDB URL must include a host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(anyhow::anyhow!(
            "CouchDB URL must not carry a query string or fragment"
        ));
    }
    Ok(url)
}

/// Validate a database name against CouchDB's naming rules: a lowercase letter first, then
/// lowercase letters, digits and any of `_$()+-/`.
pub fn validate_couch_db_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("Database name cannot be empty"));
    }

    if name.len() > MAX_DB_NAME_LEN {
        return Err(anyhow::anyhow!(
            "Database name cannot exceed {} characters",
            MAX_DB_NAME_LEN
        ));
    }

    let re = Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").map_err(|e| {
        anyhow::anyhow!("Internal error: failed to compile database name regex: {}", e)
    })?;
    if !re.is_match(name) {
        return Err(anyhow::anyhow!(
            "Database name '{}' must start with a lowercase letter and contain only lowercase letters, digits and _$()+-/",
            name
        ));
    }

    Ok(())
}

/// Prompted or configured secret: must be non-empty and not only whitespace.
pub fn validate_password(password: &str) -> Result<()> {
    if password.trim().is_empty() {
        return Err(anyhow::anyhow!("Password cannot be empty"));
    }
    Ok(())
}

/// Usernames end up in a URL path segment and a basic-auth header; ':' would break the latter.
pub fn validate_username(username: &str) -> Result<()> {
    let u = username.trim();
    if u.is_empty() {
        return Err(anyhow::anyhow!("Username cannot be empty"));
    }
    if u.contains(':') {
        return Err(anyhow::anyhow!("Username cannot contain ':'"));
    }
    Ok(())
}
