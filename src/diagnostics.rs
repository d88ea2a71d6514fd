//! Auth-flow diagnostics: a fixed chain of dependent probes against the
//! backend.
//!
//! The chain is `reachability -> register -> login -> token -> verification`
//! and always runs in that order because later stages read the cookie jar
//! and context values earlier ones produce. Failures never abort the run;
//! each is recorded as a [`ProbeResult`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE},
    Method, StatusCode,
};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    cookies::CookieJar,
    models::{
        BackendStatus, DiagnosticsReport, DiagnosticsRequest, LoginInput, ProbeId, ProbeResult,
        ProbeStatus, RegisterInput, ReportContext,
    },
    transport::{HttpRequest, HttpTransport},
    validation::{sanitize_url_for_logging, BackendTarget},
};

pub const REGISTER_PATH: &str = "auth/register";
pub const LOGIN_PATH: &str = "auth/login";
pub const VERIFICATION_PATH: &str = "email/verification-notification";

const TIMESTAMP_TOKEN: &str = "{{timestamp}}";

/// Keys checked for a human-readable message, in precedence order
const MESSAGE_KEYS: &[&str] = &[
    "message",
    "status",
    "notice",
    "verification_notice",
    "instructions",
];

/// Keys checked for a bearer token, in precedence order
const TOKEN_KEYS: &[&str] = &["token", "plainTextToken"];

/// Envelopes searched (recursively) when the top level has no match
const MESSAGE_ENVELOPES: &[&str] = &["data", "meta"];
const TOKEN_ENVELOPES: &[&str] = &["data"];

/// Replace every `{{timestamp}}` in an email with `now_ms`
pub fn apply_email_template(template: &str, now_ms: i64) -> String {
    template.replace(TIMESTAMP_TOKEN, &now_ms.to_string())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// First non-blank string under [`MESSAGE_KEYS`], then inside `data`, then `meta`
pub fn extract_message(payload: &Value) -> Option<String> {
    find_string(payload, MESSAGE_KEYS, MESSAGE_ENVELOPES, true)
}

/// Token at the root or nested under `data`
pub fn extract_token(payload: &Value) -> Option<String> {
    find_string(payload, TOKEN_KEYS, TOKEN_ENVELOPES, false)
}

fn find_string(payload: &Value, keys: &[&str], envelopes: &[&str], skip_blank: bool) -> Option<String> {
    let object = payload.as_object()?;
    for key in keys {
        if let Some(value) = object.get(*key).and_then(Value::as_str) {
            if !skip_blank || !value.trim().is_empty() {
                return Some(value.to_string());
            }
        }
    }
    envelopes
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(|nested| find_string(nested, keys, envelopes, skip_blank))
}

/// Best-effort hostname to address resolution for the report
#[async_trait]
pub trait HostLookup: Send + Sync {
    async fn lookup(&self, host: &str) -> Option<String>;
}

/// Uses the operating system resolver
pub struct SystemLookup;

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> Option<String> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(mut addrs) => addrs.next().map(|addr| addr.ip().to_string()),
            Err(e) => {
                debug!(host = %host, error = %e, "Host lookup failed");
                None
            }
        }
    }
}

/// Failure of one stage, with the HTTP status and body when there was one
#[derive(Debug)]
struct ProbeError {
    message: String,
    status: Option<StatusCode>,
    body: Option<Value>,
}

struct StageSuccess {
    message: String,
    details: Value,
}

/// One diagnostics run. Each run owns its jar and report.
pub struct ProbeSequencer<'a> {
    target: BackendTarget,
    transport: &'a dyn HttpTransport,
    lookup: Option<&'a dyn HostLookup>,
    jar: CookieJar,
    results: Vec<ProbeResult>,
    context: ReportContext,
}

impl<'a> ProbeSequencer<'a> {
    pub fn new(target: BackendTarget, transport: &'a dyn HttpTransport) -> Self {
        Self {
            target,
            transport,
            lookup: None,
            jar: CookieJar::new(),
            results: Vec::new(),
            context: ReportContext::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: &'a dyn HostLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Seed the jar from the operator's own `Cookie` header
    pub fn with_cookies(mut self, header: &str) -> Self {
        self.jar = CookieJar::from_header(header);
        self
    }

    pub async fn run(mut self, request: &DiagnosticsRequest) -> DiagnosticsReport {
        self.context.login_email = request.login.as_ref().map(|l| l.email.clone());

        let backend = self.check_backend().await;

        match &request.register {
            Some(input) => {
                let started = Instant::now();
                let outcome = self.register(input).await;
                self.record(ProbeId::Register, started, outcome);
            }
            None => self.skip(ProbeId::Register, "Test not configured"),
        }

        match &request.login {
            Some(input) => {
                let started = Instant::now();
                let outcome = self.login(input).await;
                self.record(ProbeId::Login, started, outcome);
            }
            None => self.skip(ProbeId::Login, "Test not configured"),
        }

        match self.context.login_token.clone() {
            Some(token) => {
                let started = Instant::now();
                let outcome = Ok(StageSuccess {
                    message: "Authentication token captured successfully".to_string(),
                    details: json!({ "token": token }),
                });
                self.record(ProbeId::Token, started, outcome);
            }
            None => self.skip(ProbeId::Token, "No token returned by login"),
        }

        match self.verification_email(request) {
            Some(email) => {
                let started = Instant::now();
                let outcome = self.verification(&email).await;
                self.record(ProbeId::Verification, started, outcome);
            }
            None => self.skip(ProbeId::Verification, "Test not configured"),
        }

        DiagnosticsReport {
            backend,
            results: self.results,
            context: self.context,
        }
    }

    /// HEAD the base, falling back to GET when HEAD fails outright
    async fn check_backend(&self) -> BackendStatus {
        let base_url = self.target.as_str().to_string();
        let mut reachable = false;
        let mut status = None;
        let mut message = String::from("Unable to reach backend");

        for method in [Method::HEAD, Method::GET] {
            match self
                .transport
                .send(HttpRequest::new(method.clone(), base_url.clone()))
                .await
            {
                Ok(response) => {
                    reachable = true;
                    status = Some(response.status.as_u16());
                    message = if response.status.is_success() {
                        "Backend reachable".to_string()
                    } else {
                        format!("Backend responded with status {}", response.status.as_u16())
                    };
                    break;
                }
                Err(e) => {
                    debug!(method = %method, error = %e, "Reachability probe failed");
                    message = e.message;
                }
            }
        }

        let host = self.target.host().map(str::to_string);
        let ip = match (&host, self.lookup) {
            (Some(host), Some(lookup)) => lookup.lookup(host).await,
            _ => None,
        };

        info!(
            url = %sanitize_url_for_logging(&base_url),
            reachable = reachable,
            status = ?status,
            "Backend reachability checked"
        );

        BackendStatus {
            base_url,
            host,
            ip,
            reachable,
            status,
            message,
        }
    }

    async fn register(&mut self, input: &RegisterInput) -> Result<StageSuccess, ProbeError> {
        let email = apply_email_template(&input.email, now_ms());
        let body = json!({
            "name": input.name,
            "email": email,
            "password": input.password,
        });
        let (status, data) = self.send_json(REGISTER_PATH, body).await?;
        self.context.registered_email = Some(email);
        Ok(StageSuccess {
            message: extract_message(&data).unwrap_or_else(|| {
                format!("Registration succeeded with status {}", status.as_u16())
            }),
            details: json!({ "status": status.as_u16(), "data": data }),
        })
    }

    async fn login(&mut self, input: &LoginInput) -> Result<StageSuccess, ProbeError> {
        let body = json!({
            "email": input.email,
            "password": input.password,
            "remember": input.remember.unwrap_or(true),
        });
        let (status, data) = self.send_json(LOGIN_PATH, body).await?;
        if let Some(token) = extract_token(&data) {
            self.context.login_token = Some(token);
        }
        Ok(StageSuccess {
            message: extract_message(&data)
                .unwrap_or_else(|| format!("Login succeeded with status {}", status.as_u16())),
            details: json!({ "status": status.as_u16(), "data": data }),
        })
    }

    async fn verification(&mut self, email: &str) -> Result<StageSuccess, ProbeError> {
        let (status, data) = self
            .send_json(VERIFICATION_PATH, json!({ "email": email }))
            .await?;
        Ok(StageSuccess {
            message: extract_message(&data).unwrap_or_else(|| {
                format!(
                    "Verification notification accepted with status {}",
                    status.as_u16()
                )
            }),
            details: json!({ "status": status.as_u16(), "data": data, "email": email }),
        })
    }

    /// Verification needs its own input; the address is the explicit one,
    /// else the registered one, else the login one.
    fn verification_email(&self, request: &DiagnosticsRequest) -> Option<String> {
        let input = request.verification.as_ref()?;
        input
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(|e| apply_email_template(e, now_ms()))
            .or_else(|| self.context.registered_email.clone())
            .or_else(|| self.context.login_email.clone())
    }

    /// POST a JSON body with the jar's cookies, then merge any Set-Cookie
    /// values back into the jar (also on error responses).
    async fn send_json(&mut self, path: &str, body: Value) -> Result<(StatusCode, Value), ProbeError> {
        let url = self.target.join(path);
        let mut request = HttpRequest::new(Method::POST, url.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !self.jar.is_empty() {
            match HeaderValue::from_str(&self.jar.to_header()) {
                Ok(cookie) => {
                    request.headers.insert(COOKIE, cookie);
                }
                Err(_) => warn!("Cookie jar holds a value that cannot be sent as a header"),
            }
        }
        request.body = Some(Bytes::from(body.to_string()));

        let response = self.transport.send(request).await.map_err(|e| ProbeError {
            message: e.message,
            status: None,
            body: None,
        })?;

        self.jar.merge_set_cookies(response.set_cookies());

        let data = read_body(&response.body);
        if !response.status.is_success() {
            let message = extract_message(&data).unwrap_or_else(|| {
                format!(
                    "Request to {} failed with status {}",
                    sanitize_url_for_logging(&url),
                    response.status.as_u16()
                )
            });
            return Err(ProbeError {
                message,
                status: Some(response.status),
                body: Some(data),
            });
        }
        Ok((response.status, data))
    }

    fn record(&mut self, id: ProbeId, started: Instant, outcome: Result<StageSuccess, ProbeError>) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(success) => ProbeResult {
                id,
                name: id.display_name().to_string(),
                status: ProbeStatus::Success,
                duration_ms,
                message: success.message,
                details: Some(success.details),
            },
            Err(err) => ProbeResult {
                id,
                name: id.display_name().to_string(),
                status: ProbeStatus::Error,
                duration_ms,
                message: err.message,
                details: Some(json!({
                    "status": err.status.map(|s| s.as_u16()),
                    "body": err.body,
                })),
            },
        };
        info!(
            stage = ?id,
            status = ?result.status,
            elapsed_ms = duration_ms,
            "Probe finished"
        );
        self.results.push(result);
    }

    fn skip(&mut self, id: ProbeId, message: &str) {
        debug!(stage = ?id, "Probe skipped");
        self.results.push(ProbeResult {
            id,
            name: id.display_name().to_string(),
            status: ProbeStatus::Skipped,
            duration_ms: 0,
            message: message.to_string(),
            details: None,
        });
    }
}

/// Empty body is null, JSON is parsed, anything else is kept as text
fn read_body(body: &[u8]) -> Value {
    let raw = String::from_utf8_lossy(body);
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::VerificationInput,
        transport::{ReqwestTransport, TransportError},
    };
    use httpmock::prelude::*;

    struct FixedLookup;

    #[async_trait]
    impl HostLookup for FixedLookup {
        async fn lookup(&self, _host: &str) -> Option<String> {
            Some("10.0.0.7".to_string())
        }
    }

    fn register_input(email: &str) -> RegisterInput {
        RegisterInput {
            name: "Probe".into(),
            email: email.into(),
            password: "secret123".into(),
        }
    }

    fn login_input(email: &str) -> LoginInput {
        LoginInput {
            email: email.into(),
            password: "secret123".into(),
            remember: None,
        }
    }

    #[test]
    fn email_template_substitutes_timestamp() {
        assert_eq!(apply_email_template("x+{{timestamp}}@y.com", 100), "x+100@y.com");
        assert_eq!(apply_email_template("plain@y.com", 100), "plain@y.com");
    }

    #[test]
    fn message_lookup_follows_key_precedence() {
        assert_eq!(
            extract_message(&json!({"status": "queued", "message": "Created"})).as_deref(),
            Some("Created")
        );
        assert_eq!(
            extract_message(&json!({"message": "  ", "notice": "Check inbox"})).as_deref(),
            Some("Check inbox")
        );
        assert_eq!(
            extract_message(&json!({"data": {"instructions": "Verify"}})).as_deref(),
            Some("Verify")
        );
        assert_eq!(
            extract_message(&json!({"data": {"id": 1}, "meta": {"message": "From meta"}})).as_deref(),
            Some("From meta")
        );
        assert_eq!(extract_message(&json!("plain text")), None);
        assert_eq!(extract_message(&json!({"status": 200})), None);
    }

    #[test]
    fn token_lookup_accepts_nested_and_renamed() {
        assert_eq!(extract_token(&json!({"token": "a"})).as_deref(), Some("a"));
        assert_eq!(
            extract_token(&json!({"data": {"plainTextToken": "b"}})).as_deref(),
            Some("b")
        );
        assert_eq!(extract_token(&json!({"meta": {"token": "c"}})), None);
    }

    #[tokio::test]
    async fn full_chain_shares_session_cookies() {
        let server = MockServer::start_async().await;
        let register = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/register")
                    .header("cookie", "seed=1")
                    .header("content-type", "application/json");
                then.status(201)
                    .header("content-type", "application/json")
                    .header("set-cookie", "session=reg; Path=/; HttpOnly")
                    .json_body(json!({"message": "Registered"}));
            })
            .await;
        let login = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/auth/login")
                    .header("cookie", "seed=1; session=reg")
                    .json_body(json!({"email": "ops@example.com", "password": "secret123", "remember": true}));
                then.status(200)
                    .header("content-type", "application/json")
                    .header("set-cookie", "session=auth; Path=/")
                    .json_body(json!({"data": {"token": "tok-9"}}));
            })
            .await;
        let verify = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/email/verification-notification")
                    .header("cookie", "seed=1; session=auth");
                then.status(202)
                    .header("content-type", "application/json")
                    .json_body(json!({"status": "verification-link-sent"}));
            })
            .await;

        let transport = ReqwestTransport::new(None).unwrap();
        let target = BackendTarget::parse(&server.url("/api")).unwrap();
        let request = DiagnosticsRequest {
            base_url: None,
            register: Some(register_input("probe+{{timestamp}}@example.com")),
            login: Some(login_input("ops@example.com")),
            verification: Some(VerificationInput::default()),
        };

        let report = ProbeSequencer::new(target, &transport)
            .with_lookup(&FixedLookup)
            .with_cookies("seed=1")
            .run(&request)
            .await;

        register.assert_async().await;
        login.assert_async().await;
        verify.assert_async().await;

        assert!(report.backend.reachable);
        assert_eq!(report.backend.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(report.backend.ip.as_deref(), Some("10.0.0.7"));

        let ids: Vec<ProbeId> = report.results.iter().map(|r| r.id).collect();
        assert_eq!(
            ids,
            vec![ProbeId::Register, ProbeId::Login, ProbeId::Token, ProbeId::Verification]
        );
        assert!(report.results.iter().all(|r| r.status == ProbeStatus::Success));
        assert_eq!(report.result(ProbeId::Register).unwrap().message, "Registered");
        assert_eq!(
            report.result(ProbeId::Verification).unwrap().message,
            "verification-link-sent"
        );

        let registered = report.context.registered_email.clone().unwrap();
        assert!(registered.starts_with("probe+"));
        assert!(!registered.contains("{{timestamp}}"));
        assert_eq!(report.context.login_token.as_deref(), Some("tok-9"));
        // Registered address takes precedence over the login one
        assert_eq!(
            report.result(ProbeId::Verification).unwrap().details.as_ref().unwrap()["email"],
            registered.as_str()
        );
    }

    #[tokio::test]
    async fn register_only_skips_the_rest() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/register");
                then.status(201).json_body(json!({"id": 5}));
            })
            .await;

        let transport = ReqwestTransport::new(None).unwrap();
        let target = BackendTarget::parse(&server.base_url()).unwrap();
        let request = DiagnosticsRequest {
            register: Some(register_input("solo@example.com")),
            ..DiagnosticsRequest::default()
        };

        let report = ProbeSequencer::new(target, &transport).run(&request).await;

        let register = report.result(ProbeId::Register).unwrap();
        assert_eq!(register.status, ProbeStatus::Success);
        assert_eq!(register.message, "Registration succeeded with status 201");
        for id in [ProbeId::Login, ProbeId::Token, ProbeId::Verification] {
            let result = report.result(id).unwrap();
            assert_eq!(result.status, ProbeStatus::Skipped);
            assert_eq!(result.duration_ms, 0);
        }
    }

    #[tokio::test]
    async fn failed_stage_records_status_and_body_and_chain_continues() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/login");
                then.status(422)
                    .header("content-type", "application/json")
                    .json_body(json!({"message": "These credentials do not match our records."}));
            })
            .await;
        let verify = server
            .mock_async(|when, then| {
                when.method(POST).path("/email/verification-notification");
                then.status(204);
            })
            .await;

        let transport = ReqwestTransport::new(None).unwrap();
        let target = BackendTarget::parse(&server.base_url()).unwrap();
        let request = DiagnosticsRequest {
            login: Some(login_input("ops@example.com")),
            verification: Some(VerificationInput::default()),
            ..DiagnosticsRequest::default()
        };

        let report = ProbeSequencer::new(target, &transport).run(&request).await;

        let login = report.result(ProbeId::Login).unwrap();
        assert_eq!(login.status, ProbeStatus::Error);
        assert_eq!(login.message, "These credentials do not match our records.");
        let details = login.details.as_ref().unwrap();
        assert_eq!(details["status"], 422);
        assert_eq!(
            details["body"]["message"],
            "These credentials do not match our records."
        );

        assert_eq!(report.result(ProbeId::Token).unwrap().status, ProbeStatus::Skipped);

        // Falls back to the login address when nothing was registered
        verify.assert_async().await;
        let verification = report.result(ProbeId::Verification).unwrap();
        assert_eq!(verification.status, ProbeStatus::Success);
        assert_eq!(
            verification.message,
            "Verification notification accepted with status 204"
        );
    }

    /// HEAD is refused at the transport level, GET answers
    struct HeadRefusingTransport;

    #[async_trait]
    impl HttpTransport for HeadRefusingTransport {
        async fn send(
            &self,
            request: HttpRequest,
        ) -> Result<crate::transport::HttpResponse, TransportError> {
            if request.method == Method::HEAD {
                return Err(TransportError::new("HEAD not supported"));
            }
            Ok(crate::transport::HttpResponse {
                status: StatusCode::METHOD_NOT_ALLOWED,
                headers: Default::default(),
                body: Bytes::new(),
            })
        }
    }

    #[tokio::test]
    async fn reachability_falls_back_to_get() {
        let target = BackendTarget::parse("http://backend.internal:8000/api").unwrap();
        let report = ProbeSequencer::new(target, &HeadRefusingTransport)
            .run(&DiagnosticsRequest::default())
            .await;

        assert!(report.backend.reachable);
        assert_eq!(report.backend.status, Some(405));
        assert_eq!(report.backend.message, "Backend responded with status 405");
        assert_eq!(report.backend.ip, None);
        assert!(report.results.iter().all(|r| r.status == ProbeStatus::Skipped));
    }

    #[tokio::test]
    async fn unreachable_backend_is_reported_per_stage() {
        let transport = ReqwestTransport::new(None).unwrap();
        let target = BackendTarget::parse("http://127.0.0.1:1").unwrap();
        let request = DiagnosticsRequest {
            register: Some(register_input("down@example.com")),
            ..DiagnosticsRequest::default()
        };

        let report = ProbeSequencer::new(target, &transport).run(&request).await;

        assert!(!report.backend.reachable);
        assert_eq!(report.backend.status, None);
        let register = report.result(ProbeId::Register).unwrap();
        assert_eq!(register.status, ProbeStatus::Error);
        assert_eq!(register.details.as_ref().unwrap()["status"], Value::Null);
        assert_eq!(report.context.registered_email, None);
    }
}
