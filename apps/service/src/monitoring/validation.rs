//! Check provisioning validation.
//!
//! Targets are validated per check type before a check is accepted into the
//! schedule, together with its interval and timeout bounds.

use std::net::IpAddr;
use url::Url;

use super::types::{CheckSpec, CheckType};
use crate::error::ValidationError;
use crate::models::MonitoredResource;

const MIN_INTERVAL: u64 = 10; // 10 seconds
const MAX_INTERVAL: u64 = 86400; // 24 hours
const MIN_TIMEOUT: u64 = 1;
const MAX_TIMEOUT: u64 = 300; // 5 minutes
pub const MIN_DOWN_THRESHOLD: u64 = 10;
pub const MAX_DOWN_THRESHOLD: u64 = 604_800; // 7 days

/// What provisioning accepts beyond well-formed targets
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPolicy {
    /// Refuse loopback/private targets and sensitive ports
    pub public_only: bool,
}

/// Validate a check resource: target, interval and timeout
pub fn validate_check(resource: &MonitoredResource, policy: ValidationPolicy) -> Result<(), ValidationError> {
    let spec = resource.check_spec().ok_or(ValidationError::NotACheck)?;
    validate_target(spec, policy)?;
    validate_check_interval(resource.interval_seconds)?;
    validate_timeout(spec.timeout_seconds)
}

/// Validate a host resource: its heartbeat silence threshold, when overridden
pub fn validate_host(resource: &MonitoredResource) -> Result<(), ValidationError> {
    match resource.host_spec().and_then(|spec| spec.down_threshold_seconds) {
        Some(seconds) => validate_down_threshold(seconds),
        None => Ok(()),
    }
}

/// Validates a check target based on its type
pub fn validate_target(spec: &CheckSpec, policy: ValidationPolicy) -> Result<(), ValidationError> {
    match spec.check_type {
        CheckType::Http => validate_http_target(&spec.target, policy),
        CheckType::Tcp => validate_tcp_target(&spec.target, spec.tcp_port, policy),
        CheckType::Ping | CheckType::Dns => validate_host_target(&spec.target, policy),
    }
}

fn validate_http_target(target: &str, policy: ValidationPolicy) -> Result<(), ValidationError> {
    let url = Url::parse(target).map_err(|e| ValidationError::InvalidTarget(format!("Invalid URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::InvalidTarget(format!("Invalid scheme for HTTP check: {}", other))),
    }

    let host = url.host_str().ok_or_else(|| ValidationError::InvalidTarget("URL has no host".into()))?;
    if policy.public_only && is_private_or_local(host) {
        return Err(ValidationError::PrivateAddress(host.to_string()));
    }

    if let Some(port) = url.port() {
        validate_port(port)?;
    }

    Ok(())
}

fn validate_tcp_target(target: &str, port_option: Option<u16>, policy: ValidationPolicy) -> Result<(), ValidationError> {
    // Expected format: host:port, or host plus the port option
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| ValidationError::InvalidTarget("Invalid port number".into()))?;
            (host, port)
        }
        None => {
            let port = port_option
                .ok_or_else(|| ValidationError::InvalidTarget("TCP target must be in format host:port".into()))?;
            (target, port)
        }
    };

    validate_host_target(host, policy)?;
    validate_port(port)?;

    if policy.public_only {
        validate_port_allowlist(port)?;
    }

    Ok(())
}

fn validate_host_target(host: &str, policy: ValidationPolicy) -> Result<(), ValidationError> {
    if host.is_empty() || host.contains(char::is_whitespace) || host.contains('/') {
        return Err(ValidationError::InvalidTarget(format!("Invalid host: '{}'", host)));
    }
    if policy.public_only && is_private_or_local(host) {
        return Err(ValidationError::PrivateAddress(host.to_string()));
    }
    Ok(())
}

/// Check if hostname/IP is private or localhost
fn is_private_or_local(host: &str) -> bool {
    if let Ok(ip) = host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(ipv4) => {
                ipv4.is_private()
                    || ipv4.is_loopback()
                    || ipv4.is_link_local()
                    || ipv4.is_broadcast()
                    || ipv4.is_documentation()
                    || ipv4.is_unspecified()
            }
            IpAddr::V6(ipv6) => ipv6.is_loopback() || ipv6.is_unspecified() || ipv6.is_multicast(),
        };
    }

    let host = host.to_ascii_lowercase();
    matches!(host.as_str(), "localhost" | "local" | "internal" | "private")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".localhost")
}

fn validate_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::InvalidTarget("Port 0 is not valid".into()));
    }
    Ok(())
}

/// Sensitive ports refused for public-only provisioning
fn validate_port_allowlist(port: u16) -> Result<(), ValidationError> {
    const BLOCKED_PORTS: [u16; 11] = [
        22,    // SSH
        23,    // Telnet
        25,    // SMTP
        110,   // POP3
        143,   // IMAP
        445,   // SMB
        3389,  // RDP
        5432,  // PostgreSQL
        5900,  // VNC
        6379,  // Redis
        27017, // MongoDB
    ];

    if BLOCKED_PORTS.contains(&port) {
        return Err(ValidationError::BlockedPort(port));
    }
    Ok(())
}

pub fn validate_check_interval(interval_seconds: u64) -> Result<(), ValidationError> {
    if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval_seconds) {
        return Err(ValidationError::Interval { value: interval_seconds, min: MIN_INTERVAL, max: MAX_INTERVAL });
    }
    Ok(())
}

pub fn validate_timeout(timeout_seconds: u64) -> Result<(), ValidationError> {
    if !(MIN_TIMEOUT..=MAX_TIMEOUT).contains(&timeout_seconds) {
        return Err(ValidationError::Timeout { value: timeout_seconds, min: MIN_TIMEOUT, max: MAX_TIMEOUT });
    }
    Ok(())
}

pub fn validate_down_threshold(seconds: u64) -> Result<(), ValidationError> {
    if !(MIN_DOWN_THRESHOLD..=MAX_DOWN_THRESHOLD).contains(&seconds) {
        return Err(ValidationError::DownThreshold {
            value: seconds,
            min: MIN_DOWN_THRESHOLD,
            max: MAX_DOWN_THRESHOLD,
        });
    }
    Ok(())
}
