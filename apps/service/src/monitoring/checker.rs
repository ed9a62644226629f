use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use super::types::ProbeReply;
use crate::validation::validate_probe_address;

/// Faults that are not plain unreachability
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("permission denied while probing: {0}")]
    PermissionDenied(String),
    #[error("probe failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Method used to check reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    Icmp,
    Tcp,
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeMethod::Icmp => write!(f, "icmp"),
            ProbeMethod::Tcp => write!(f, "tcp"),
        }
    }
}

/// One reachability check against one host.
///
/// Unreachability is reported as `Ok` with `reachable == false`; `Err` is
/// reserved for malformed addresses and local faults.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<ProbeReply, ProbeError>;
}

/// ICMP echo through the system `ping` binary, which carries the raw-socket
/// privileges so this process does not need them.
#[derive(Debug, Default, Clone)]
pub struct PingProber;

impl PingProber {
    pub fn new() -> Self {
        Self
    }

    fn command(address: &str, wait: Duration) -> Command {
        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w"]).arg(wait.as_millis().max(1).to_string());
        } else {
            let secs = wait.as_millis().div_ceil(1000).max(1);
            cmd.args(["-c", "1", "-W"]).arg(secs.to_string());
        }
        cmd.arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str, wait: Duration) -> Result<ProbeReply, ProbeError> {
        if !validate_probe_address(address).is_valid {
            return Err(ProbeError::InvalidAddress(address.to_string()));
        }

        let output = match timeout(wait + Duration::from_millis(500), Self::command(address, wait).output()).await {
            Ok(result) => result.map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e.to_string()),
                _ => ProbeError::Io(e),
            })?,
            Err(_) => return Ok(ProbeReply::unreachable()),
        };

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(ProbeReply::reachable(parse_ping_latency(&stdout)))
        } else {
            Ok(ProbeReply::unreachable())
        }
    }
}

/// Extract the round-trip time from `ping` output (`time=12.3 ms`, `time<1ms`)
pub fn parse_ping_latency(output: &str) -> Option<f64> {
    let start = output.find("time=").or_else(|| output.find("time<"))? + "time=".len();
    let digits: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    digits.parse().ok()
}

/// TCP connect checker, for networks where ICMP is filtered.
///
/// A refused connection still proves the host answered, so it counts as
/// reachable.
pub struct TcpProber {
    default_port: u16,
}

impl TcpProber {
    pub fn new(default_port: u16) -> Self {
        Self { default_port }
    }

    fn endpoint(&self, address: &str) -> String {
        if address.parse::<SocketAddr>().is_ok() {
            return address.to_string();
        }
        if let Ok(ip) = address.parse::<IpAddr>() {
            return SocketAddr::new(ip, self.default_port).to_string();
        }
        match address.rsplit_once(':') {
            Some((_, port)) if port.parse::<u16>().is_ok() => address.to_string(),
            _ => format!("{}:{}", address, self.default_port),
        }
    }
}

#[async_trait::async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, wait: Duration) -> Result<ProbeReply, ProbeError> {
        let host = match address.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => address,
        };
        let valid = address.parse::<SocketAddr>().is_ok()
            || address.parse::<IpAddr>().is_ok()
            || validate_probe_address(host).is_valid;
        if !valid {
            return Err(ProbeError::InvalidAddress(address.to_string()));
        }

        let start = Instant::now();
        let connect = tokio::net::TcpStream::connect(self.endpoint(address));

        match timeout(wait, connect).await {
            Ok(Ok(_)) => Ok(ProbeReply::reachable(Some(start.elapsed().as_secs_f64() * 1000.0))),
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                Ok(ProbeReply::reachable(Some(start.elapsed().as_secs_f64() * 1000.0)))
            }
            Ok(Err(e)) if e.kind() == ErrorKind::PermissionDenied => {
                Err(ProbeError::PermissionDenied(e.to_string()))
            }
            Ok(Err(_)) | Err(_) => Ok(ProbeReply::unreachable()),
        }
    }
}
