// HTTP transport seam
//
// Every request the bootstrap makes goes through `HttpTransport`. Production code uses
// `ReqwestTransport`; tests use the in-memory fake server in `couch::fake`.

use crate::error::BootstrapError;
use crate::models::state::AdminCredentials;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    /// Sent as HTTP basic auth when present.
    pub auth: Option<AdminCredentials>,
    /// Serialized as JSON with `Content-Type: application/json`.
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            auth: None,
            body: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<&AdminCredentials>) -> Self {
        self.auth = auth.cloned();
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body; `None` for HEAD, empty or non-JSON bodies.
    pub body: Option<Value>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// CouchDB's `reason` (or `error`) field, for diagnostics.
    pub fn reason(&self) -> String {
        self.body
            .as_ref()
            .and_then(|b| {
                b.get("reason")
                    .or_else(|| b.get("error"))
                    .and_then(Value::as_str)
            })
            .map(str::to_string)
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// Failure below HTTP: connection refused, DNS, timeout, unreadable response.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// User-friendly message (safe to show)
    pub user_message: String,
    /// Internal details for logging (never contains credentials)
    pub internal_details: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for BootstrapError {
    fn from(e: TransportError) -> Self {
        BootstrapError::Transport(format!("{} ({})", e.user_message, e.internal_details))
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self
            .client
            .request(method, request.url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(auth) = &request.auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(classify_reqwest_error)?;
        let status = resp.status().as_u16();

        if request.method == Method::Head {
            return Ok(HttpResponse { status, body: None });
        }

        let bytes = resp.bytes().await.map_err(classify_reqwest_error)?;
        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    let user_message = if e.is_timeout() {
        "Request to CouchDB timed out."
    } else if e.is_connect() {
        "Unable to connect to CouchDB. Verify the URL and that the server is running."
    } else {
        "Request to CouchDB failed."
    };
    TransportError {
        user_message: user_message.to_string(),
        // the URL may carry userinfo; drop it from the details
        internal_details: e.without_url().to_string(),
    }
}
