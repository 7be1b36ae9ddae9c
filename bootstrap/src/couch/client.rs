// Thin CouchDB client: endpoint + transport, one method per verb the bootstrap needs.

use crate::couch::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use crate::error::BootstrapResult;
use crate::models::state::{AdminCredentials, ServerEndpoint};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct CouchClient {
    endpoint: ServerEndpoint,
    transport: Arc<dyn HttpTransport>,
}

impl CouchClient {
    pub fn new(endpoint: ServerEndpoint, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Same transport, updated endpoint state (e.g. after the prober saw it answer).
    pub fn with_endpoint(&self, endpoint: ServerEndpoint) -> Self {
        Self {
            endpoint,
            transport: Arc::clone(&self.transport),
        }
    }

    /// `GET /` without credentials. Transport failures are returned raw so the prober can
    /// treat them as "not yet".
    pub async fn get_root(&self) -> Result<HttpResponse, TransportError> {
        let url = self.endpoint.base().clone();
        self.transport.send(HttpRequest::new(Method::Get, url)).await
    }

    pub async fn head(
        &self,
        segments: &[&str],
        auth: Option<&AdminCredentials>,
    ) -> BootstrapResult<HttpResponse> {
        let url = self.endpoint.url_for(segments)?;
        let req = HttpRequest::new(Method::Head, url).with_auth(auth);
        Ok(self.transport.send(req).await?)
    }

    pub async fn put(
        &self,
        segments: &[&str],
        auth: Option<&AdminCredentials>,
        body: Option<Value>,
    ) -> BootstrapResult<HttpResponse> {
        let url = self.endpoint.url_for(segments)?;
        let mut req = HttpRequest::new(Method::Put, url).with_auth(auth);
        if let Some(body) = body {
            req = req.with_body(body);
        }
        Ok(self.transport.send(req).await?)
    }
}
