//! Port selection by linear probe.
//!
//! A port counts as free when a local TCP connect to it is refused. Each
//! probe is bounded by [`PROBE_TIMEOUT`], so scanning a fully occupied range
//! always terminates.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::PortsConfig;
use crate::error::SupervisorError;

/// Upper bound for a single connect attempt.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }
}

impl From<&PortsConfig> for PortRange {
    fn from(config: &PortsConfig) -> Self {
        Self::new(config.start, config.end)
    }
}

/// Returns true when something accepts connections on `127.0.0.1:port`.
///
/// A connect that neither succeeds nor fails within [`PROBE_TIMEOUT`] is
/// treated as occupied: a filtered port is no place to start a server.
pub async fn is_port_in_use(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(_)) => false,
        Err(_) => true,
    }
}

/// Find the first free port in `range`.
pub async fn find_available_port(range: PortRange) -> Result<u16, SupervisorError> {
    if range.start <= range.end {
        for port in range.start..=range.end {
            if is_port_in_use(port).await {
                tracing::debug!("Port {} busy", port);
                continue;
            }
            tracing::debug!("Port {} available", port);
            return Ok(port);
        }
    }

    Err(SupervisorError::NoAvailablePort {
        start: range.start,
        end: range.end,
    })
}
