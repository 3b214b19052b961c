//! Shared HTTP plumbing under every dialect.

use std::borrow::Cow;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Method, Proxy};
use tracing::trace;

/// Connection details for one cluster endpoint.
#[derive(Debug, Clone)]
pub(crate) struct EsEndpoint {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Wins over basic auth when both are configured.
    pub api_key: Option<String>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// A thin reqwest wrapper bound to one endpoint. Cheap to clone; clones
/// share the inner connection pool, which is how the scroll slices and bulk
/// workers all talk to the same cluster without handshaking again.
#[derive(Debug, Clone)]
pub(crate) struct EsClient {
    http: reqwest::Client,
    endpoint: EsEndpoint,
}

/// A fully drained HTTP exchange: status plus the whole body. Draining on
/// every path keeps connections reusable and server scroll contexts honest.
#[derive(Debug)]
pub(crate) struct EsResponse {
    pub status: u16,
    pub body: String,
}

impl EsResponse {
    /// 2xx passes the body through; anything else becomes a protocol error
    /// carrying the server's own explanation.
    pub(crate) fn into_body(self) -> Result<String> {
        if (200..300).contains(&self.status) {
            Ok(self.body)
        } else {
            bail!("HTTP {}: {}", self.status, truncate(&self.body));
        }
    }
}

impl EsClient {
    pub(crate) fn new(endpoint: EsEndpoint) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(endpoint.timeout);
        if let Some(proxy) = &endpoint.proxy {
            builder = builder
                .proxy(Proxy::all(proxy).with_context(|| format!("invalid proxy url '{proxy}'"))?);
        }
        let http = builder.build().context("failed to build the HTTP client")?;
        Ok(Self { http, endpoint })
    }

    pub(crate) fn base_url(&self) -> &str {
        self.endpoint.url.trim_end_matches('/')
    }

    fn full_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url(), path.trim_start_matches('/'))
    }

    /// One request, fully drained. Transport failures surface as errors;
    /// protocol status codes come back to the caller for classification.
    async fn exchange(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Option<String>,
    ) -> Result<EsResponse> {
        let url = self.full_url(path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(api_key) = &self.endpoint.api_key {
            request = request.header("Authorization", format!("ApiKey {api_key}"));
        } else if let Some(username) = &self.endpoint.username {
            request = request.basic_auth(username, self.endpoint.password.as_deref());
        }
        if let Some(content_type) = content_type {
            request = request.header("Content-Type", content_type);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("{method} {url} never reached the cluster"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("{method} {url}: response body cut short"))?;
        trace!(%method, url, status, "cluster exchange");
        Ok(EsResponse { status, body })
    }

    pub(crate) async fn get(&self, path: &str) -> Result<EsResponse> {
        self.exchange(Method::GET, path, None, None).await
    }

    pub(crate) async fn delete(&self, path: &str) -> Result<EsResponse> {
        self.exchange(Method::DELETE, path, None, None).await
    }

    pub(crate) async fn post(&self, path: &str) -> Result<EsResponse> {
        self.exchange(Method::POST, path, None, None).await
    }

    pub(crate) async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<EsResponse> {
        let body = serde_json::to_string(body)?;
        self.exchange(Method::POST, path, Some("application/json"), Some(body))
            .await
    }

    pub(crate) async fn put_json(&self, path: &str, body: &serde_json::Value) -> Result<EsResponse> {
        let body = serde_json::to_string(body)?;
        self.exchange(Method::PUT, path, Some("application/json"), Some(body))
            .await
    }

    /// Bulk bodies are NDJSON; the cluster rejects `application/json` here.
    pub(crate) async fn post_ndjson(&self, path: &str, body: String) -> Result<EsResponse> {
        self.exchange(Method::POST, path, Some("application/x-ndjson"), Some(body))
            .await
    }

    /// Pre-5 scroll advances post the bare scroll id as the request body.
    pub(crate) async fn post_text(&self, path: &str, body: String) -> Result<EsResponse> {
        self.exchange(Method::POST, path, Some("text/plain"), Some(body))
            .await
    }
}

/// Cluster error bodies can be enormous; logs get the head and the size.
fn truncate(body: &str) -> Cow<'_, str> {
    const MAX: usize = 2048;
    if body.len() <= MAX {
        return Cow::Borrowed(body);
    }
    let mut cut = MAX;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    Cow::Owned(format!("{} [... {} bytes total]", &body[..cut], body.len()))
}
