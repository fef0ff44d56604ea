//! Egress source verification.
//!
//! The target echoes the caller's address as `RemoteAddr: ip:port`. A pod
//! routed through the gateway must appear from the egress subnet; a plain
//! pod must appear from the default subnet.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Where an observed source address lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceClass {
    EgressSubnet,
    DefaultSubnet,
    Other,
    /// No `RemoteAddr` line in the response.
    Unknown,
}

impl std::fmt::Display for SourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::EgressSubnet => "egress subnet",
            Self::DefaultSubnet => "default subnet",
            Self::Other => "outside both subnets",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What one pod looked like from the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub pod: String,
    pub source: Option<IpAddr>,
    pub class: SourceClass,
    /// Why the call itself failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    /// Classify a pod from the target's raw response.
    #[must_use]
    pub fn from_response(pod: &str, body: &str, egress: Ipv4Net, default: Ipv4Net) -> Self {
        let source = parse_remote_addr(body);
        let class = source.map_or(SourceClass::Unknown, |ip| classify(ip, egress, default));
        Self {
            pod: pod.to_string(),
            source,
            class,
            error: None,
        }
    }

    /// Attach the reason the call failed.
    #[must_use]
    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    fn describe(&self, expected: &str) -> String {
        let mut line = format!(
            "{} reached the target from {} ({}), expected the {expected}",
            self.pod,
            display_source(self.source),
            self.class
        );
        if let Some(ref error) = self.error {
            line.push_str(&format!("; call failed: {error}"));
        }
        line
    }
}

/// Result of the two-pod comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityReport {
    /// `ip:port` that was called.
    pub target: String,
    pub gateway_pod: Observation,
    pub plain_pod: Observation,
    pub checked_at: String,
}

impl ConnectivityReport {
    #[must_use]
    pub fn new(target: String, gateway_pod: Observation, plain_pod: Observation) -> Self {
        Self {
            target,
            gateway_pod,
            plain_pod,
            checked_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Human-readable reasons the check failed; empty on success.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if self.gateway_pod.class != SourceClass::EgressSubnet {
            failures.push(format!(
                "gateway pod {}",
                self.gateway_pod.describe("egress subnet")
            ));
        }
        if self.plain_pod.class != SourceClass::DefaultSubnet {
            failures.push(format!(
                "plain pod {}",
                self.plain_pod.describe("default subnet")
            ));
        }
        failures
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures().is_empty()
    }
}

fn display_source(source: Option<IpAddr>) -> String {
    source.map_or_else(|| "<none>".to_string(), |ip| ip.to_string())
}

/// Extract the caller address from a `whoami`-style response.
#[must_use]
pub fn parse_remote_addr(body: &str) -> Option<IpAddr> {
    body.lines().find_map(|line| {
        let value = line.trim().strip_prefix("RemoteAddr:")?.trim();
        value
            .parse::<SocketAddr>()
            .map(|addr| addr.ip())
            .or_else(|_| value.parse::<IpAddr>())
            .ok()
    })
}

/// Classify an address against the two cluster subnets.
#[must_use]
pub fn classify(ip: IpAddr, egress: Ipv4Net, default: Ipv4Net) -> SourceClass {
    let IpAddr::V4(v4) = ip else {
        return SourceClass::Other;
    };
    if egress.contains(&v4) {
        SourceClass::EgressSubnet
    } else if default.contains(&v4) {
        SourceClass::DefaultSubnet
    } else {
        SourceClass::Other
    }
}

/// Command run inside a test pod to call the target.
#[must_use]
pub fn curl_command(target: Ipv4Addr, port: u16) -> Vec<String> {
    vec![
        "curl".to_string(),
        "--silent".to_string(),
        "--show-error".to_string(),
        "--max-time".to_string(),
        "15".to_string(),
        format!("http://{target}:{port}/"),
    ]
}
