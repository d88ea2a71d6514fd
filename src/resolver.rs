//! Per-call routing decision: direct backend URL, same-origin path or relay.
//!
//! Everything here is pure. Given the configured backend base, the requested
//! path and (in a page context) the current origin, [`resolve`] produces a
//! [`RequestPlan`] without touching the network.

use url::Url;

/// Mount point of the reverse proxy on the client's own origin
pub const RELAY_PREFIX: &str = "/relay";

/// Where one outbound call should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Path on the client's own origin (always starts with `/`)
    Relative(String),
    /// Fully-qualified backend URL
    Absolute(String),
}

impl Target {
    pub fn as_str(&self) -> &str {
        match self {
            Target::Relative(path) => path,
            Target::Absolute(url) => url,
        }
    }
}

/// Outcome of [`resolve`], computed once per outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub target: Target,
    /// Requested path without leading slashes; reused for the relay fallback
    pub normalized_path: String,
    pub used_proxy: bool,
}

/// Strip leading slashes from a requested path
pub fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Relay path for a normalized backend path
pub fn relay_path(normalized_path: &str) -> String {
    if normalized_path.is_empty() {
        return RELAY_PREFIX.to_string();
    }
    format!("{}/{}", RELAY_PREFIX, normalized_path)
}

/// Whether a normalized path already addresses the relay
pub fn is_relay_path(normalized_path: &str) -> bool {
    let prefix = RELAY_PREFIX.trim_start_matches('/');
    normalized_path == prefix
        || normalized_path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
}

/// Decide how to reach `path`.
///
/// `origin` is the page origin when running in a page context, `None` on the
/// server. Rules, first match wins:
/// 1. no base configured: the path is used verbatim (rooted)
/// 2. page context and the base is cross-origin: `/relay/<path>`
/// 3. page context and the base resolves same-origin: `<basePath>/<path>`
/// 4. otherwise: `<base>/<path>`
pub fn resolve(base: Option<&str>, path: &str, origin: Option<&Url>) -> RequestPlan {
    let normalized = normalize_path(path).to_string();

    let base = match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => base,
        None => {
            return RequestPlan {
                target: Target::Relative(rooted(path)),
                normalized_path: normalized,
                used_proxy: false,
            }
        }
    };

    if let Some(origin) = origin {
        if is_relay_path(&normalized) {
            // Already relay-addressed: keep it on our origin, never re-prefix
            return RequestPlan {
                target: Target::Relative(format!("/{}", normalized)),
                normalized_path: normalized,
                used_proxy: false,
            };
        }
        if !normalized.is_empty() && is_cross_origin(base, origin) {
            return RequestPlan {
                target: Target::Relative(relay_path(&normalized)),
                normalized_path: normalized,
                used_proxy: true,
            };
        }
    }

    let trimmed_base = base.trim_end_matches('/');
    if let Some(same_origin) = origin.and_then(|o| collapse_same_origin(trimmed_base, &normalized, o)) {
        return RequestPlan {
            target: Target::Relative(same_origin),
            normalized_path: normalized,
            used_proxy: false,
        };
    }

    let target = if normalized.is_empty() {
        trimmed_base.to_string()
    } else {
        format!("{}/{}", trimmed_base, normalized)
    };
    let target = match Url::parse(&target) {
        Ok(_) => Target::Absolute(target),
        Err(_) => Target::Relative(rooted(&target)),
    };
    RequestPlan {
        target,
        normalized_path: normalized,
        used_proxy: false,
    }
}

/// Compare the base's origin with the page origin. A base that cannot be
/// parsed at all counts as cross-origin.
fn is_cross_origin(base: &str, origin: &Url) -> bool {
    match Url::parse(base) {
        // Opaque origins (data:, file:) never match anything
        Ok(url) => !url.origin().is_tuple() || url.origin() != origin.origin(),
        Err(url::ParseError::RelativeUrlWithoutBase) => match origin.join(base) {
            Ok(resolved) => resolved.origin() != origin.origin(),
            Err(_) => true,
        },
        Err(_) => true,
    }
}

fn collapse_same_origin(base: &str, normalized: &str, origin: &Url) -> Option<String> {
    let resolved = origin.join(base).ok()?;
    if resolved.origin() != origin.origin() {
        return None;
    }
    let base_path = resolved.path().trim_end_matches('/');
    let joined = if normalized.is_empty() {
        base_path.to_string()
    } else {
        format!("{}/{}", base_path, normalized)
    };
    Some(rooted(&joined))
}

fn rooted(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
