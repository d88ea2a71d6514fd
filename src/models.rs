//! Request and Response models for the relay API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /diagnostics/auth`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsRequest {
    /// Operator override of the backend base URL
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub register: Option<RegisterInput>,

    #[serde(default)]
    pub login: Option<LoginInput>,

    #[serde(default)]
    pub verification: Option<VerificationInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub name: String,
    /// May contain `{{timestamp}}`
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationInput {
    #[serde(default)]
    pub email: Option<String>,
}

/// Reachability of the backend base URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub base_url: String,
    pub host: Option<String>,
    pub ip: Option<String>,
    pub reachable: bool,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeId {
    Register,
    Login,
    Token,
    Verification,
}

impl ProbeId {
    pub fn display_name(&self) -> &'static str {
        match self {
            ProbeId::Register => "User registration",
            ProbeId::Login => "Login",
            ProbeId::Token => "Token generation",
            ProbeId::Verification => "Email verification dispatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Success,
    Error,
    Skipped,
}

/// Outcome of one stage of the diagnostics chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub id: ProbeId,
    pub name: String,
    pub status: ProbeStatus,
    pub duration_ms: u64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Values produced by one stage and read by later ones
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContext {
    pub registered_email: Option<String>,
    pub login_email: Option<String>,
    pub login_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub backend: BackendStatus,
    pub results: Vec<ProbeResult>,
    pub context: ReportContext,
}

impl DiagnosticsReport {
    pub fn result(&self, id: ProbeId) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,

    /// Service version
    pub version: &'static str,

    /// Whether a backend base URL is configured for the relay
    pub relay_configured: bool,
}

impl HealthResponse {
    pub fn new(relay_configured: bool) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            relay_configured,
        }
    }
}
