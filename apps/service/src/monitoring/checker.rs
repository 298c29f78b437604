use anyhow::Result;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use super::types::{CheckSpec, CheckType, ProbeDetail, ProbeErrorKind};

/// Characters of the HTTP body kept for diagnostics
const BODY_PREVIEW_CHARS: usize = 1000;

const USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

/// A probe that reached a verdict of healthy
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub latency_ms: u64,
    pub status_code: Option<u16>,
    pub detail: Option<ProbeDetail>,
}

impl ProbeOutcome {
    pub fn new(latency_ms: u64) -> Self {
        Self { latency_ms, status_code: None, detail: None }
    }
}

/// An expected, classified probe failure
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub message: String,
    pub latency_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub detail: Option<ProbeDetail>,
}

impl ProbeFailure {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), latency_ms: None, status_code: None, detail: None }
    }

    fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    fn with_detail(mut self, detail: ProbeDetail) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Checker trait for different types of monitoring checks
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    /// Probe the target described by `spec`.
    ///
    /// Network level problems are returned as a [`ProbeFailure`], never as a panic.
    async fn check(&self, spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure>;
}

/// Classify a transport error from its rendered message chain
fn classify_error_text(text: &str, is_connect: bool) -> ProbeErrorKind {
    let text = text.to_lowercase();

    if text.contains("timed out") || text.contains("timeout") {
        ProbeErrorKind::TimedOut
    } else if text.contains("dns")
        || text.contains("failed to lookup address")
        || text.contains("name or service not known")
        || text.contains("no such host")
        || text.contains("nodename nor servname")
    {
        ProbeErrorKind::DnsFailure
    } else if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
        ProbeErrorKind::TlsFailure
    } else if text.contains("unreachable") {
        ProbeErrorKind::Unreachable
    } else if is_connect || text.contains("connection refused") {
        ProbeErrorKind::ConnectionRefused
    } else {
        ProbeErrorKind::Other
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}

fn classify_reqwest_error(error: &reqwest::Error) -> ProbeFailure {
    let text = error_chain(error);
    let kind = if error.is_timeout() {
        ProbeErrorKind::TimedOut
    } else {
        classify_error_text(&text, error.is_connect())
    };
    ProbeFailure::new(kind, format!("HTTP request failed: {}", text))
}

fn classify_io_error(error: &io::Error) -> ProbeErrorKind {
    match error.kind() {
        io::ErrorKind::TimedOut => ProbeErrorKind::TimedOut,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => ProbeErrorKind::ConnectionRefused,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => ProbeErrorKind::Unreachable,
        _ => classify_error_text(&error.to_string(), false),
    }
}

/// HTTP/HTTPS checker
pub struct HttpChecker {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
}

impl HttpChecker {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let no_redirect_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client, no_redirect_client })
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
        let options = &spec.http;
        let method = reqwest::Method::from_bytes(options.method.to_uppercase().as_bytes())
            .map_err(|_| ProbeFailure::new(ProbeErrorKind::Other, format!("Invalid HTTP method: {}", options.method)))?;

        let client = if options.follow_redirects { &self.client } else { &self.no_redirect_client };
        let mut request = client.request(method, &spec.target).timeout(Duration::from_secs(spec.timeout_seconds));
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }

        let start = Instant::now();
        let response = request.send().await.map_err(|e| classify_reqwest_error(&e))?;
        let latency = start.elapsed().as_millis() as u64;

        let status = response.status();
        let status_code = status.as_u16();
        let status_ok = match options.expected_status {
            Some(expected) => status_code == expected,
            // Consider 2xx and 3xx as success
            None => status.is_success() || status.is_redirection(),
        };

        if !status_ok {
            let message = match options.expected_status {
                Some(expected) => format!("Expected status code {}, got {}", expected, status_code),
                None => format!("HTTP check failed with status code: {}", status_code),
            };
            return Err(ProbeFailure::new(ProbeErrorKind::UnexpectedStatus, message)
                .with_latency(latency)
                .with_status_code(status_code));
        }

        let mut outcome = ProbeOutcome { latency_ms: latency, status_code: Some(status_code), detail: None };

        let Some(rule) = &options.keyword else {
            return Ok(outcome);
        };

        let body = response.text().await.map_err(|e| classify_reqwest_error(&e).with_status_code(status_code))?;
        let found = body.to_lowercase().contains(&rule.keyword.to_lowercase());
        let detail = ProbeDetail {
            body_preview: Some(body.chars().take(BODY_PREVIEW_CHARS).collect()),
            records: Vec::new(),
        };

        if found != rule.should_exist {
            let message = if rule.should_exist {
                format!("Keyword '{}' not found in response", rule.keyword)
            } else {
                format!("Keyword '{}' should not be present in response", rule.keyword)
            };
            return Err(ProbeFailure::new(ProbeErrorKind::KeywordMismatch, message)
                .with_latency(latency)
                .with_status_code(status_code)
                .with_detail(detail));
        }

        outcome.detail = Some(detail);
        Ok(outcome)
    }
}

/// TCP port checker
pub struct TcpChecker;

impl TcpChecker {
    /// `host:port`, taking the port from the `CheckSpec` when the target has none
    fn address(spec: &CheckSpec) -> Result<String, ProbeFailure> {
        let has_port = spec.target.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok());
        match (has_port, spec.tcp_port) {
            (true, _) => Ok(spec.target.clone()),
            (false, Some(port)) => Ok(format!("{}:{}", spec.target, port)),
            (false, None) => {
                Err(ProbeFailure::new(ProbeErrorKind::Other, "TCP target must be in format host:port"))
            }
        }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
        let address = Self::address(spec)?;
        let start = Instant::now();

        let connect = tokio::net::TcpStream::connect(&address);

        timeout(Duration::from_secs(spec.timeout_seconds), connect)
            .await
            .map_err(|_| ProbeFailure::new(ProbeErrorKind::TimedOut, "TCP connection timeout"))?
            .map_err(|e| ProbeFailure::new(classify_io_error(&e), format!("TCP connection failed: {}", e)))?;

        Ok(ProbeOutcome::new(start.elapsed().as_millis() as u64))
    }
}

/// ICMP ping through the system `ping` binary, which already holds the
/// privileges raw sockets need
pub struct PingChecker;

impl PingChecker {
    /// Round trip reported by ping, e.g. `time=12.3 ms`
    fn parse_round_trip(output: &str) -> Option<u64> {
        let (_, rest) = output.split_once("time=")?;
        let value: String = rest.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
        value.parse::<f64>().ok().map(|ms| ms.round() as u64)
    }
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
        let start = Instant::now();
        let output = tokio::process::Command::new("ping")
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(spec.timeout_seconds.max(1).to_string())
            .arg(&spec.target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeFailure::new(ProbeErrorKind::Other, format!("Failed to run ping: {}", e)))?;
        let elapsed = start.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            let latency = Self::parse_round_trip(&stdout).unwrap_or(elapsed);
            return Ok(ProbeOutcome::new(latency));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let kind = match classify_error_text(&stderr, false) {
            ProbeErrorKind::DnsFailure => ProbeErrorKind::DnsFailure,
            _ => ProbeErrorKind::Unreachable,
        };
        let reason = stderr.trim();
        let message = if reason.is_empty() {
            format!("Host {} did not answer ping", spec.target)
        } else {
            format!("Ping failed: {}", reason)
        };
        Err(ProbeFailure::new(kind, message).with_latency(elapsed))
    }
}

/// DNS resolution checker
pub struct DnsChecker;

#[async_trait::async_trait]
impl Checker for DnsChecker {
    async fn check(&self, spec: &CheckSpec) -> Result<ProbeOutcome, ProbeFailure> {
        let start = Instant::now();
        let addresses = tokio::net::lookup_host((spec.target.as_str(), 0))
            .await
            .map_err(|e| ProbeFailure::new(ProbeErrorKind::DnsFailure, format!("DNS lookup failed: {}", e)))?;
        let latency = start.elapsed().as_millis() as u64;

        let mut records: Vec<String> = addresses.map(|address| address.ip().to_string()).collect();
        records.sort();
        records.dedup();

        if records.is_empty() {
            return Err(ProbeFailure::new(ProbeErrorKind::DnsFailure, "No DNS records found").with_latency(latency));
        }

        let detail = ProbeDetail { body_preview: None, records };
        let matched = spec.expected_records.is_empty()
            || spec.expected_records.iter().any(|expected| detail.records.iter().any(|record| record == expected));

        if !matched {
            let message = format!(
                "None of the expected records [{}] were returned (got [{}])",
                spec.expected_records.join(", "),
                detail.records.join(", ")
            );
            return Err(ProbeFailure::new(ProbeErrorKind::DnsMismatch, message)
                .with_latency(latency)
                .with_detail(detail));
        }

        Ok(ProbeOutcome { latency_ms: latency, status_code: None, detail: Some(detail) })
    }
}

/// Checkers keyed by the check type they serve
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<CheckType, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTTP, TCP, ping and DNS checkers
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::empty();
        registry.register(CheckType::Http, Arc::new(HttpChecker::new()?));
        registry.register(CheckType::Tcp, Arc::new(TcpChecker));
        registry.register(CheckType::Ping, Arc::new(PingChecker));
        registry.register(CheckType::Dns, Arc::new(DnsChecker));
        Ok(registry)
    }

    pub fn register(&mut self, check_type: CheckType, checker: Arc<dyn Checker>) {
        self.checkers.insert(check_type, checker);
    }

    pub fn get(&self, check_type: CheckType) -> Option<Arc<dyn Checker>> {
        self.checkers.get(&check_type).cloned()
    }
}
