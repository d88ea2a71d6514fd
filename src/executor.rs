//! Request executor: one logical API call from a client.
//!
//! Resolves the target (see [`crate::resolver`]), attaches the stored bearer
//! token, performs the call and, when a direct call fails at the network
//! level, retries once through the relay. HTTP error statuses are never
//! retried.

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    config::ClientConfig,
    credentials::{CredentialStore, StoreError},
    resolver::{is_relay_path, relay_path, resolve, RequestPlan, Target},
    transport::{CredentialsMode, HttpRequest, HttpResponse, HttpTransport, TransportError},
    validation::sanitize_url_for_logging,
};

/// Parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Text(String),
}

impl Payload {
    /// JSON bodies are parsed only when the content type says so; a body
    /// that fails to parse is kept as text.
    pub fn parse(content_type: &str, body: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(body);
        if raw.trim().is_empty() {
            return Payload::Empty;
        }
        if content_type.to_ascii_lowercase().contains("application/json") {
            if let Ok(value) = serde_json::from_str(&raw) {
                return Payload::Json(value);
            }
        }
        Payload::Text(raw.into_owned())
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Empty => Value::Null,
            Payload::Json(value) => value,
            Payload::Text(text) => Value::String(text),
        }
    }

    /// Top-level `message` string of a JSON body
    pub fn message(&self) -> Option<&str> {
        match self {
            Payload::Json(value) => value.get("message").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/419: the stored credential has been cleared
    #[error("Authentication required")]
    AuthRequired { status: StatusCode },
    #[error("{message}")]
    RequestFailed {
        status: StatusCode,
        message: String,
        body: Payload,
    },
    #[error(transparent)]
    Network(#[from] TransportError),
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
    /// The credential slot could not be written or cleared
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::AuthRequired { status } | ApiError::RequestFailed { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Per-call options, the counterpart of a fetch init object
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsMode,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsMode::Include,
        }
    }
}

impl CallOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// JSON request with a serialized body
    pub fn json<T: Serialize>(method: Method, body: &T) -> Result<Self, ApiError> {
        let mut options = Self::new(method);
        options
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        options.body = Some(Bytes::from(serde_json::to_vec(body)?));
        Ok(options)
    }

    pub fn header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn credentials(mut self, mode: CredentialsMode) -> Self {
        self.credentials = mode;
        self
    }
}

/// Client-side API caller
#[derive(Clone)]
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            transport,
            credentials,
        }
    }

    /// Plan for a relative path or, for absolute URLs, a direct call with no
    /// relay fallback.
    pub fn plan(&self, path_or_url: &str) -> RequestPlan {
        if Url::parse(path_or_url).is_ok() {
            return RequestPlan {
                target: Target::Absolute(path_or_url.to_string()),
                normalized_path: String::new(),
                used_proxy: false,
            };
        }
        resolve(
            self.config.api_base.as_deref(),
            path_or_url,
            self.config.origin.as_ref(),
        )
    }

    /// Perform a call and deserialize the body. Empty bodies deserialize
    /// from JSON null, so `()` and `Option<T>` accept them.
    pub async fn call<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
        options: CallOptions,
    ) -> Result<T, ApiError> {
        let payload = self.call_payload(path_or_url, options).await?;
        Ok(serde_json::from_value(payload.into_value())?)
    }

    /// Same as [`ApiClient::call`]; kept separate for write operations
    pub async fn mutate<T: DeserializeOwned>(
        &self,
        path_or_url: &str,
        options: CallOptions,
    ) -> Result<T, ApiError> {
        self.call(path_or_url, options).await
    }

    pub async fn call_payload(
        &self,
        path_or_url: &str,
        options: CallOptions,
    ) -> Result<Payload, ApiError> {
        let plan = self.plan(path_or_url);

        let mut headers = options.headers;
        if !headers.contains_key(AUTHORIZATION) {
            if let Some(token) = self.credentials.get() {
                match HeaderValue::from_str(&format!("Bearer {}", token)) {
                    Ok(value) => {
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(_) => warn!("Stored credential is not a valid header value; sending without it"),
                }
            }
        }

        let request = HttpRequest {
            method: options.method,
            url: plan.target.as_str().to_string(),
            headers,
            body: options.body,
            credentials: options.credentials,
        };

        let response = match self.transport.send(request.clone()).await {
            Ok(response) => response,
            Err(err) if self.can_fall_back(&plan) => {
                let fallback = relay_path(&plan.normalized_path);
                info!(
                    url = %sanitize_url_for_logging(plan.target.as_str()),
                    fallback = %fallback,
                    error = %err,
                    "Direct call failed, retrying through relay"
                );
                let retry = HttpRequest {
                    url: fallback,
                    ..request
                };
                // The relay's own failure is less useful than the original one
                self.transport.send(retry).await.map_err(|_| err)?
            }
            Err(err) => return Err(err.into()),
        };

        self.classify(response)
    }

    /// Persist a credential obtained from a login response
    pub fn store_token(&self, token: &str) -> Result<(), StoreError> {
        self.credentials.set(token)
    }

    /// Drop the stored credential
    pub fn logout(&self) -> Result<(), StoreError> {
        self.credentials.clear()
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.get()
    }

    fn can_fall_back(&self, plan: &RequestPlan) -> bool {
        self.config.origin.is_some()
            && self.config.api_base.is_some()
            && !plan.used_proxy
            && !plan.normalized_path.is_empty()
            && !is_relay_path(&plan.normalized_path)
            && matches!(plan.target, Target::Relative(_))
    }

    fn classify(&self, response: HttpResponse) -> Result<Payload, ApiError> {
        let status = response.status;

        if status == StatusCode::UNAUTHORIZED || status.as_u16() == 419 {
            debug!(status = status.as_u16(), "Credential rejected, clearing");
            // A rejected credential must not outlive this call
            if let Err(e) = self.logout() {
                error!(status = status.as_u16(), error = %e, "Failed to clear rejected credential");
                return Err(e.into());
            }
            return Err(ApiError::AuthRequired { status });
        }

        let payload = Payload::parse(response.content_type(), &response.body);
        if !status.is_success() {
            let message = payload.message().unwrap_or("Request failed").to_string();
            return Err(ApiError::RequestFailed {
                status,
                message,
                body: payload,
            });
        }
        Ok(payload)
    }
}
