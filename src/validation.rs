//! Backend URL validation and log sanitizing

use url::Url;

use crate::error::ProxyError;

/// Allowed URL schemes for backend targets
const ALLOWED_SCHEMES: &[&str] = &["http", "https"];

/// A validated absolute base URL for the real API, without trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    url: Url,
}

impl BackendTarget {
    /// Validate a configured or operator-supplied base URL.
    ///
    /// Checks:
    /// 1. Value is non-blank
    /// 2. URL parses as absolute
    /// 3. Scheme is http or https and a host is present
    pub fn parse(raw: &str) -> Result<Self, ProxyError> {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ProxyError::misconfigured("API base URL is not configured"));
        }

        let url = Url::parse(trimmed).map_err(|_| {
            ProxyError::misconfigured("API base URL must be an absolute URL, including protocol")
        })?;

        let scheme = url.scheme().to_lowercase();
        if !ALLOWED_SCHEMES.contains(&scheme.as_str()) {
            return Err(ProxyError::misconfigured(format!(
                "API base URL scheme '{}' not allowed. Only http and https are permitted.",
                scheme
            )));
        }
        if url.host_str().is_none() {
            return Err(ProxyError::misconfigured("API base URL must have a valid hostname."));
        }

        Ok(Self { url })
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Base URL as a string without trailing slash
    pub fn as_str(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Join a relative path onto the base, preventing duplicate slashes
    pub fn join(&self, path: &str) -> String {
        let normalized = path.trim_start_matches('/');
        if normalized.is_empty() {
            return self.as_str().to_string();
        }
        format!("{}/{}", self.as_str(), normalized)
    }

    /// Rewrite a captured relay path (and optional query) onto the base
    pub fn rewrite(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        let normalized = path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", base_path, normalized));
        url.set_query(query.filter(|q| !q.is_empty()));
        url
    }
}

/// Sanitize a URL for logging by removing credentials
pub fn sanitize_url_for_logging(url_str: &str) -> String {
    match Url::parse(url_str) {
        Ok(mut url) => {
            if !url.username().is_empty() || url.password().is_some() {
                let _ = url.set_username("***");
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        // Relative relay/same-origin targets carry no credentials
        Err(_) if url_str.starts_with('/') => url_str.to_string(),
        Err(_) => "[invalid URL]".to_string(),
    }
}
