use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Where a host sits relative to the local network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    /// Local gateway (router); reachable even when the uplink is gone
    Gateway,
    /// Reference node on the far side of the ISP
    Remote,
}

impl std::fmt::Display for HostRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostRole::Gateway => write!(f, "gateway"),
            HostRole::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for HostRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gateway" | "local" => Ok(HostRole::Gateway),
            "remote" => Ok(HostRole::Remote),
            other => Err(format!("Unknown host role '{other}'. Must be gateway or remote")),
        }
    }
}

/// A validated host to probe each cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Unique display name; also the key of the persisted state
    pub name: String,

    /// IP address or hostname handed to the prober
    pub address: String,

    /// Consecutive failed probes before the host is considered down (>= 1)
    pub threshold: u32,

    pub role: HostRole,
}

impl HostTarget {
    pub fn new(name: impl Into<String>, address: impl Into<String>, role: HostRole, threshold: u32) -> Self {
        Self { name: name.into(), address: address.into(), threshold: threshold.max(1), role }
    }

    pub fn is_gateway(&self) -> bool {
        self.role == HostRole::Gateway
    }
}

/// Status of a monitored host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Up,
    Down,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Up => write!(f, "up"),
            HostStatus::Down => write!(f, "down"),
        }
    }
}

/// Raw answer from a single prober invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReply {
    pub reachable: bool,
    pub latency_ms: Option<f64>,
}

impl ProbeReply {
    pub fn reachable(latency_ms: Option<f64>) -> Self {
        Self { reachable: true, latency_ms }
    }

    pub fn unreachable() -> Self {
        Self { reachable: false, latency_ms: None }
    }
}

/// Result of probing one host during one cycle. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    /// Name of the host that was probed
    pub host: String,

    /// Address that was probed
    pub address: String,

    /// Whether the host answered within the timeout
    pub reachable: bool,

    /// When the probe completed (or was given up on)
    pub timestamp: NaiveDateTime,

    /// Round-trip time in milliseconds, when the prober reports one
    pub latency_ms: Option<f64>,
}

impl ProbeOutcome {
    pub fn from_reply(target: &HostTarget, reply: ProbeReply, timestamp: NaiveDateTime) -> Self {
        Self {
            host: target.name.clone(),
            address: target.address.clone(),
            reachable: reply.reachable,
            timestamp,
            latency_ms: reply.latency_ms,
        }
    }

    pub fn unreachable(target: &HostTarget, timestamp: NaiveDateTime) -> Self {
        Self::from_reply(target, ProbeReply::unreachable(), timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_accepts_local_alias() {
        assert_eq!("Gateway".parse::<HostRole>(), Ok(HostRole::Gateway));
        assert_eq!("local".parse::<HostRole>(), Ok(HostRole::Gateway));
        assert_eq!(" Remote ".parse::<HostRole>(), Ok(HostRole::Remote));
        assert!("upstream".parse::<HostRole>().is_err());
    }

    #[test]
    fn test_threshold_is_at_least_one() {
        let target = HostTarget::new("gw", "192.168.1.1", HostRole::Gateway, 0);
        assert_eq!(target.threshold, 1);
    }
}
