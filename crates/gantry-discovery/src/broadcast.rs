//! Broadcast-listen discovery
//!
//! Printers announce themselves with SSDP-style NOTIFY datagrams on a
//! well-known multicast group. This strategy joins the group, listens
//! for a fixed window, and parses every datagram that carries a vendor
//! marker.

use chrono::Utc;
use gantry_core::{DiscoveredPrinter, DiscoveryMethod, GENERIC_MODEL};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Multicast group printers announce on
pub const ANNOUNCE_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// Substrings that identify a printer announcement, lowercase
const VENDOR_MARKERS: &[&str] = &["bambulab", "bambu"];

/// Model codes matched against announcement text, most specific first
const MODEL_CODES: &[(&str, &str)] = &[
    ("x1 carbon", "X1 Carbon"),
    ("x1c", "X1 Carbon"),
    ("x1e", "X1E"),
    ("x1", "X1"),
    ("p1p", "P1P"),
    ("p1s", "P1S"),
    ("a1 mini", "A1 mini"),
    ("a1mini", "A1 mini"),
    ("a1", "A1"),
];

/// Listen for announcements for the given window.
///
/// Strategy errors are logged, not propagated; the caller gets whatever
/// was heard before the failure.
pub async fn listen(window: Duration) -> Vec<DiscoveredPrinter> {
    match listen_inner(window).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "broadcast discovery failed");
            Vec::new()
        }
    }
}

async fn listen_inner(window: Duration) -> std::io::Result<Vec<DiscoveredPrinter>> {
    // Ephemeral local port; membership is what routes the group here.
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.join_multicast_v4(ANNOUNCE_GROUP, Ipv4Addr::UNSPECIFIED)?;

    let found = receive_loop(&socket, window).await;

    // Leave the group on every path; a failure here is not actionable.
    let _ = socket.leave_multicast_v4(ANNOUNCE_GROUP, Ipv4Addr::UNSPECIFIED);
    Ok(found)
}

async fn receive_loop(socket: &UdpSocket, window: Duration) -> Vec<DiscoveredPrinter> {
    let deadline = Instant::now() + window;
    let mut found = Vec::new();
    let mut buf = vec![0u8; 2048];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, socket.recv_from(&mut buf)).await {
            // Window elapsed with nothing pending; a timeout is the
            // normal way this loop ends.
            Err(_) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "announcement socket error");
                break;
            }
            Ok(Ok((len, sender))) => {
                let text = String::from_utf8_lossy(&buf[..len]);
                if let Some(printer) = parse_announcement(&text, sender.ip()) {
                    debug!(ip = %printer.ip, model = %printer.model, "printer announcement");
                    found.push(printer);
                }
            }
        }
    }

    found
}

/// Parse one announcement datagram.
///
/// Returns `None` unless the payload carries a vendor marker. Header
/// fields are line-oriented `NAME: value` pairs; `SERVER` supplies the
/// display name, `USN` the serial, `NT` the declared device type.
pub(crate) fn parse_announcement(text: &str, ip: IpAddr) -> Option<DiscoveredPrinter> {
    let lower = text.to_ascii_lowercase();
    if !VENDOR_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return None;
    }

    let mut name = String::new();
    let mut device_type = String::new();
    let mut serial = None;
    for line in text.lines() {
        if let Some(value) = header_value(line, "SERVER:") {
            name = value;
        } else if let Some(value) = header_value(line, "USN:") {
            serial = Some(value);
        } else if let Some(value) = header_value(line, "NT:") {
            device_type = value;
        }
    }

    let model = MODEL_CODES
        .iter()
        .find(|(code, _)| lower.contains(code))
        .map(|(_, model)| model.to_string())
        .unwrap_or_else(|| GENERIC_MODEL.to_string());

    Some(DiscoveredPrinter {
        ip,
        name,
        device_type,
        serial,
        model,
        seen_at: Utc::now(),
        method: DiscoveryMethod::Broadcast,
    })
}

fn header_value(line: &str, header: &str) -> Option<String> {
    let prefix = line.get(..header.len())?;
    if !prefix.eq_ignore_ascii_case(header) {
        return None;
    }
    Some(line[header.len()..].trim().to_string())
}
