//! Range-probe discovery
//!
//! Fallback strategy for printers whose announcements are suppressed:
//! enumerate the host's private /24 subnets and TCP-probe the service
//! port on every address. A socket-level accept is enough; no protocol
//! handshake is attempted.

use chrono::Utc;
use gantry_core::{DiscoveredPrinter, DiscoveryMethod, GENERIC_MODEL, SERVICE_PORT};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Per-address connect timeout
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on concurrent connect attempts
const PROBE_BATCH: usize = 20;

/// Probe every local private /24 for printers.
///
/// Errors are logged, not propagated; an interface enumeration failure
/// yields an empty result.
pub async fn scan() -> Vec<DiscoveredPrinter> {
    scan_port(SERVICE_PORT).await
}

pub(crate) async fn scan_port(port: u16) -> Vec<DiscoveredPrinter> {
    let prefixes = match local_prefixes() {
        Ok(prefixes) => prefixes,
        Err(e) => {
            warn!(error = %e, "interface enumeration failed");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for prefix in prefixes {
        found.extend(scan_prefix(prefix, port).await);
    }
    found
}

/// Probe all 254 host addresses of one /24, in contiguous batches so
/// in-flight attempts stay bounded and scans walk the subnet in order.
async fn scan_prefix(prefix: [u8; 3], port: u16) -> Vec<DiscoveredPrinter> {
    debug!(
        subnet = %Ipv4Addr::new(prefix[0], prefix[1], prefix[2], 0),
        port,
        "probing subnet"
    );

    let hosts: Vec<u8> = (1..=254).collect();
    let mut found = Vec::new();
    for block in hosts.chunks(PROBE_BATCH) {
        let mut tasks = JoinSet::new();
        for &host in block {
            let ip = Ipv4Addr::new(prefix[0], prefix[1], prefix[2], host);
            tasks.spawn(async move {
                if probe_host(ip, port).await {
                    Some(ip)
                } else {
                    None
                }
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(ip)) = result {
                debug!(ip = %ip, "service port open");
                found.push(probed(IpAddr::V4(ip)));
            }
        }
    }
    found
}

pub(crate) async fn probe_host(ip: Ipv4Addr, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

fn probed(ip: IpAddr) -> DiscoveredPrinter {
    DiscoveredPrinter {
        ip,
        name: ip.to_string(),
        device_type: String::new(),
        serial: None,
        model: GENERIC_MODEL.to_string(),
        seen_at: Utc::now(),
        method: DiscoveryMethod::Probe,
    }
}

/// The /24 prefixes of every private address on a non-loopback
/// interface.
fn local_prefixes() -> Result<BTreeSet<[u8; 3]>, network_interface::Error> {
    let mut prefixes = BTreeSet::new();
    for iface in NetworkInterface::show()? {
        for addr in &iface.addr {
            let Addr::V4(v4) = addr else { continue };
            let ip = v4.ip;
            if ip.is_loopback() || !ip.is_private() {
                continue;
            }
            let octets = ip.octets();
            prefixes.insert([octets[0], octets[1], octets[2]]);
        }
    }
    Ok(prefixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_detects_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(probe_host(Ipv4Addr::LOCALHOST, port).await);
    }

    #[tokio::test]
    async fn test_probe_rejects_closed_port() {
        // Bind and drop to get a port that is known to be closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!probe_host(Ipv4Addr::LOCALHOST, port).await);
    }

    #[test]
    fn test_probed_record_shape() {
        let record = probed(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)));
        assert_eq!(record.method, DiscoveryMethod::Probe);
        assert_eq!(record.model, GENERIC_MODEL);
        assert!(record.serial.is_none());
    }
}
