use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Type of probe to perform against a check target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Http,
    Tcp,
    Ping,
    Dns,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Http => write!(f, "http"),
            CheckType::Tcp => write!(f, "tcp"),
            CheckType::Ping => write!(f, "ping"),
            CheckType::Dns => write!(f, "dns"),
        }
    }
}

/// Keyword rule evaluated against an HTTP response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    /// `true`: the keyword must be present, `false`: it must be absent
    #[serde(default = "default_true")]
    pub should_exist: bool,
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// HTTP specific probe options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpOptions {
    #[serde(default = "default_method")]
    pub method: String,
    /// Exact status code to expect. `None` accepts any 2xx/3xx.
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub keyword: Option<KeywordRule>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            expected_status: None,
            keyword: None,
            headers: BTreeMap::new(),
            body: None,
            follow_redirects: true,
        }
    }
}

/// Everything a checker needs to probe a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub check_type: CheckType,
    pub target: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Port for TCP checks when the target does not carry one
    #[serde(default)]
    pub tcp_port: Option<u16>,
    #[serde(default)]
    pub http: HttpOptions,
    /// DNS values of which at least one must be present in the answer
    #[serde(default)]
    pub expected_records: Vec<String>,
    /// Successful probes slower than this are reported as degraded
    #[serde(default)]
    pub degraded_threshold_ms: Option<u64>,
}

impl CheckSpec {
    pub fn new(check_type: CheckType, target: impl Into<String>) -> Self {
        Self {
            check_type,
            target: target.into(),
            timeout_seconds: default_timeout(),
            tcp_port: None,
            http: HttpOptions::default(),
            expected_records: Vec::new(),
            degraded_threshold_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Classification of an expected probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    TimedOut,
    ConnectionRefused,
    DnsFailure,
    TlsFailure,
    UnexpectedStatus,
    KeywordMismatch,
    DnsMismatch,
    Unreachable,
    Other,
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeErrorKind::TimedOut => "timed_out",
            ProbeErrorKind::ConnectionRefused => "connection_refused",
            ProbeErrorKind::DnsFailure => "dns_failure",
            ProbeErrorKind::TlsFailure => "tls_failure",
            ProbeErrorKind::UnexpectedStatus => "unexpected_status",
            ProbeErrorKind::KeywordMismatch => "keyword_mismatch",
            ProbeErrorKind::DnsMismatch => "dns_mismatch",
            ProbeErrorKind::Unreachable => "unreachable",
            ProbeErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Extra diagnostic output of a probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDetail {
    /// First characters of the HTTP body, when it was read
    pub body_preview: Option<String>,
    /// Resolved DNS records
    pub records: Vec<String>,
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Resource that was probed
    pub resource_id: Uuid,

    /// URL or address that was probed
    pub target: String,

    /// When the probe completed
    pub timestamp: DateTime<Utc>,

    pub success: bool,

    /// Set on successful probes slower than the degraded threshold
    pub degraded: bool,

    /// Response time in milliseconds
    pub latency_ms: Option<u64>,

    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,

    pub error_kind: Option<ProbeErrorKind>,
    pub error_message: Option<String>,

    pub detail: Option<ProbeDetail>,
}

impl ProbeResult {
    /// Create a new, not yet classified probe result
    pub fn new(resource_id: Uuid, target: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            resource_id,
            target,
            timestamp,
            success: false,
            degraded: false,
            latency_ms: None,
            status_code: None,
            error_kind: None,
            error_message: None,
            detail: None,
        }
    }

    /// Mark the probe as successful
    pub fn success(mut self, latency_ms: u64, status_code: Option<u16>) -> Self {
        self.success = true;
        self.latency_ms = Some(latency_ms);
        self.status_code = status_code;
        self
    }

    /// Mark the probe as successful but slow
    pub fn degraded(mut self, latency_ms: u64, status_code: Option<u16>) -> Self {
        self = self.success(latency_ms, status_code);
        self.degraded = true;
        self
    }

    /// Mark the probe as failed with a classified error
    pub fn failure(mut self, kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self
    }

    pub fn with_latency(mut self, latency_ms: Option<u64>) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_status_code(mut self, status_code: Option<u16>) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn with_detail(mut self, detail: Option<ProbeDetail>) -> Self {
        self.detail = detail;
        self
    }
}
