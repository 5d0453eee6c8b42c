use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::AuthError;
use crate::handshake::AuthResolver;

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    /// Single file sent as a multipart form part.
    File {
        field: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    #[must_use]
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn get() -> Self {
        Self::new(HttpMethod::Get)
    }

    #[must_use]
    pub fn post_json(body: serde_json::Value) -> Self {
        Self {
            body: Some(RequestBody::Json(body)),
            ..Self::new(HttpMethod::Post)
        }
    }

    #[must_use]
    pub fn upload(
        field: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            body: Some(RequestBody::File {
                field: field.into(),
                file_name: file_name.into(),
                content_type: content_type.into(),
                bytes,
            }),
            ..Self::new(HttpMethod::Post)
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Replaces any caller-supplied authorization header with the bearer token.
    #[must_use]
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("authorization"));
        self.headers
            .push(("authorization".to_string(), format!("Bearer {token}")));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn error_for_status(self) -> Result<Self, HttpStatusError> {
        if self.is_success() {
            return Ok(self);
        }
        let body = self.text().trim().to_string();
        Err(HttpStatusError {
            status: self.status,
            body: if body.is_empty() {
                "<empty>".to_string()
            } else {
                body
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("http_{status}:{body}")]
pub struct HttpStatusError {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, url: &str, request: &RequestConfig)
    -> Result<HttpResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    default_timeout: Duration,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            default_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        url: &str,
        request: &RequestConfig,
    ) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.to_reqwest(), url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            None => builder,
            Some(RequestBody::Json(body)) => builder.json(body),
            Some(RequestBody::File {
                field,
                file_name,
                content_type,
                bytes,
            }) => {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(content_type)
                    .map_err(|error| TransportError::new(error.to_string()))?;
                builder.multipart(reqwest::multipart::Form::new().part(field.clone(), part))
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::new(error.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|error| TransportError::new(error.to_string()))?;
        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Sends requests on behalf of the signed-in user.
///
/// The host's own request capability is preferred; direct bearer attachment
/// is the fallback when the host has none or its delegation fails.
#[derive(Clone)]
pub struct AuthenticatedClient {
    resolver: AuthResolver,
    transport: Arc<dyn HttpTransport>,
}

impl AuthenticatedClient {
    #[must_use]
    pub fn new(resolver: AuthResolver) -> Self {
        Self::with_transport(resolver, Arc::new(ReqwestTransport::default()))
    }

    #[must_use]
    pub fn with_transport(resolver: AuthResolver, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            resolver,
            transport,
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &AuthResolver {
        &self.resolver
    }

    pub async fn send(
        &self,
        target: &str,
        request: RequestConfig,
    ) -> Result<HttpResponse, AuthError> {
        let Some(token) = self.resolver.access_token() else {
            tracing::debug!(target_url = target, "refusing request without access token");
            return Err(AuthError::NoCredential);
        };

        let host = self.resolver.host();
        if host.supports_request() {
            match host.request(target, &request).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    tracing::warn!(target_url = target, %error, "host request delegation failed; sending directly");
                }
            }
        }

        let request = request.with_bearer(&token);
        self.transport
            .send(target, &request)
            .await
            .map_err(|error| AuthError::Request(error.message))
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
