//! Gantry Discovery - Finding printers on the local network
//!
//! Two independent strategies run concurrently:
//! - broadcast-listen: hear printers announce themselves on the
//!   multicast group. Fast and precise, but only works when the
//!   printer's announcements are enabled.
//! - range-probe: walk the local private /24 subnets and probe the
//!   service port. Slower, but works with announcements suppressed.
//!
//! Running both at once bounds total discovery latency to roughly the
//! slower of the two rather than their sum. Results are merged with
//! first-seen-wins deduplication per address.

pub mod broadcast;
pub mod probe;

use gantry_core::DiscoveredPrinter;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;

/// Default broadcast listen window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Run both strategies and merge their results.
pub async fn discover(window: Duration) -> Vec<DiscoveredPrinter> {
    let (announced, probed) = tokio::join!(broadcast::listen(window), probe::scan());
    let merged = merge(announced.into_iter().chain(probed));
    info!(count = merged.len(), "discovery finished");
    merged
}

/// Like [`discover`], but drops printers whose address the caller
/// already knows about.
pub async fn discover_excluding(
    window: Duration,
    known: &HashSet<IpAddr>,
) -> Vec<DiscoveredPrinter> {
    exclude(discover(window).await, known)
}

/// Deduplicate by network address, first occurrence wins.
fn merge(results: impl IntoIterator<Item = DiscoveredPrinter>) -> Vec<DiscoveredPrinter> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|printer| seen.insert(printer.ip))
        .collect()
}

fn exclude(results: Vec<DiscoveredPrinter>, known: &HashSet<IpAddr>) -> Vec<DiscoveredPrinter> {
    results
        .into_iter()
        .filter(|printer| !known.contains(&printer.ip))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gantry_core::DiscoveryMethod;
    use std::net::Ipv4Addr;

    fn record(ip: [u8; 4], method: DiscoveryMethod) -> DiscoveredPrinter {
        DiscoveredPrinter {
            ip: IpAddr::V4(Ipv4Addr::from(ip)),
            name: String::new(),
            device_type: String::new(),
            serial: None,
            model: String::new(),
            seen_at: Utc::now(),
            method,
        }
    }

    #[test]
    fn test_merge_keeps_first_seen_per_address() {
        let merged = merge([
            record([192, 168, 1, 40], DiscoveryMethod::Broadcast),
            record([192, 168, 1, 41], DiscoveryMethod::Probe),
            record([192, 168, 1, 40], DiscoveryMethod::Probe),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].method, DiscoveryMethod::Broadcast);
    }

    #[test]
    fn test_exclude_drops_known_addresses() {
        let known: HashSet<IpAddr> = [IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40))]
            .into_iter()
            .collect();
        let results = vec![
            record([192, 168, 1, 40], DiscoveryMethod::Broadcast),
            record([192, 168, 1, 41], DiscoveryMethod::Broadcast),
        ];
        let filtered = exclude(results, &known);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].ip, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 41)));
    }
}
