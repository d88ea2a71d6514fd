//! Raw HTTP call primitive shared by the request executor and diagnostics

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::{HeaderMap, CONTENT_TYPE, COOKIE, SET_COOKIE},
    Client, Method, StatusCode,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{error::classify_reqwest_error, validation::sanitize_url_for_logging};

/// Cookie policy for one call, mirroring fetch's `credentials` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Always send and store cookies
    #[default]
    Include,
    /// Only for targets on the client's own origin
    SameOrigin,
    /// Never send or store cookies
    Omit,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL, or a rooted path on the client's origin
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub credentials: CredentialsMode,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            credentials: CredentialsMode::Omit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn content_type(&self) -> &str {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Every individual Set-Cookie value, in arrival order
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }
}

/// The request never produced an HTTP response (refused, DNS, TLS, ...)
#[derive(Debug, Clone, Error)]
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
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with its own cookie store
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    origin: Option<Url>,
    cookies: Arc<Jar>,
}

impl ReqwestTransport {
    /// `origin` is used to resolve rooted paths such as `/relay/..`
    pub fn new(origin: Option<Url>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportError::new(format!("Failed to build client: {}", e)))?;
        Ok(Self::with_client(client, origin))
    }

    pub fn with_client(client: Client, origin: Option<Url>) -> Self {
        Self {
            client,
            origin,
            cookies: Arc::new(Jar::default()),
        }
    }

    fn absolute(&self, target: &str) -> Result<Url, TransportError> {
        match Url::parse(target) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .origin
                .as_ref()
                .ok_or_else(|| {
                    TransportError::new(format!("Cannot resolve '{}' without a client origin", target))
                })?
                .join(target)
                .map_err(|e| TransportError::new(format!("Invalid URL '{}': {}", target, e))),
            Err(e) => Err(TransportError::new(format!("Invalid URL '{}': {}", target, e))),
        }
    }

    fn uses_cookies(&self, mode: CredentialsMode, url: &Url) -> bool {
        match mode {
            CredentialsMode::Include => true,
            CredentialsMode::SameOrigin => self
                .origin
                .as_ref()
                .is_some_and(|o| o.origin() == url.origin()),
            CredentialsMode::Omit => false,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.absolute(&request.url)?;
        let with_cookies = self.uses_cookies(request.credentials, &url);

        let mut headers = request.headers;
        if with_cookies && !headers.contains_key(COOKIE) {
            if let Some(cookie) = self.cookies.cookies(&url) {
                headers.insert(COOKIE, cookie);
            }
        }

        debug!(
            url = %sanitize_url_for_logging(url.as_str()),
            method = %request.method,
            "Sending request"
        );

        let mut builder = self.client.request(request.method, url.clone()).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(classify_reqwest_error(&e)))?;

        if with_cookies {
            let mut set_cookies = response.headers().get_all(SET_COOKIE).iter();
            self.cookies.set_cookies(&mut set_cookies, &url);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(classify_reqwest_error(&e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
