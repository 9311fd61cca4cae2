// ── Built-in collection methods ──
//
// Each method reads cumulative byte counters from one device table and
// turns them into rates through the shared `RateTracker`. Managed devices
// are queried directly; inferred clients through the router that saw them.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use super::TrafficCollector;
use super::rate::RateTracker;
use crate::channel::{CommandChannel, RawRecord, paths};
use crate::convert;
use crate::error::CoreError;
use crate::model::{Device, DeviceId, MethodKind, TrafficSample};

/// Counter-based collector for one `MethodKind`.
pub struct BuiltinCollector {
    kind: MethodKind,
    rates: Arc<RateTracker>,
}

impl BuiltinCollector {
    pub fn new(kind: MethodKind, rates: Arc<RateTracker>) -> Self {
        Self { kind, rates }
    }

    /// Cumulative `(download, upload)` byte totals for `device`.
    async fn totals(
        &self,
        device: &Device,
        channel: &dyn CommandChannel,
    ) -> Result<(u64, u64), CoreError> {
        let target = device.command_target();

        match self.kind {
            MethodKind::MetricsPoll => {
                interface_totals(&fetch(channel, target, paths::INTERFACES).await?)
            }
            MethodKind::FirewallPoll => {
                connection_totals(&fetch(channel, target, paths::CONNECTIONS).await?)
            }
            MethodKind::DhcpPoll => sum_pairs(
                &fetch(channel, target, paths::SIMPLE_QUEUES).await?,
                convert::queue_bytes,
            ),
            MethodKind::WirelessStatsPoll => sum_pairs(
                &fetch(channel, target, paths::WIRELESS_REGISTRATIONS).await?,
                convert::registration_bytes,
            ),
            MethodKind::CapsmanPoll => sum_pairs(
                &fetch(channel, target, paths::CAPSMAN_REGISTRATIONS).await?,
                convert::registration_bytes,
            ),
            MethodKind::ArpPresencePoll => {
                let arp = fetch(channel, target, paths::ARP).await?;
                if !arp_contains(&arp, device.address) {
                    return Err(absent(device, "not present in the ARP table"));
                }
                let queues = fetch(channel, target, paths::SIMPLE_QUEUES).await?;
                let queue = queues
                    .iter()
                    .find(|q| convert::queue_targets(q, device.address))
                    .ok_or_else(|| absent(device, "no queue targets this address"))?;
                convert::queue_bytes(queue)
            }
            MethodKind::TrafficEstimate => {
                let connections = fetch(channel, target, paths::CONNECTIONS).await?;
                client_connection_totals(&connections, device.address)
            }
        }
    }
}

#[async_trait]
impl TrafficCollector for BuiltinCollector {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    async fn collect(
        &self,
        device: &Device,
        channel: &dyn CommandChannel,
    ) -> Result<TrafficSample, CoreError> {
        let (download, upload) = self.totals(device, channel).await?;
        Ok(self.rates.observe(device.id, self.kind, download, upload))
    }
}

async fn fetch(
    channel: &dyn CommandChannel,
    target: DeviceId,
    path: &str,
) -> Result<Vec<RawRecord>, CoreError> {
    channel.execute_command(target, path, &[]).await
}

fn absent(device: &Device, reason: &str) -> CoreError {
    CoreError::Collection {
        device_id: device.id,
        reason: format!("{}: {reason}", device.address),
    }
}

// ── Counter extraction ─────────────────────────────────────────────

/// Receive and transmit totals over running interfaces.
fn interface_totals(records: &[RawRecord]) -> Result<(u64, u64), CoreError> {
    let mut totals = (0_u64, 0_u64);
    for record in records {
        let counters = convert::interface_counters(record)?;
        if counters.running {
            totals.0 = totals.0.saturating_add(counters.rx_bytes);
            totals.1 = totals.1.saturating_add(counters.tx_bytes);
        }
    }
    Ok(totals)
}

/// Reply bytes count as download, original-direction bytes as upload.
fn connection_totals(records: &[RawRecord]) -> Result<(u64, u64), CoreError> {
    let mut totals = (0_u64, 0_u64);
    for record in records {
        let (orig, repl) = convert::connection_bytes(record)?;
        totals.0 = totals.0.saturating_add(repl);
        totals.1 = totals.1.saturating_add(orig);
    }
    Ok(totals)
}

/// Bytes of connections where `address` is one of the endpoints, seen
/// from that address.
fn client_connection_totals(
    records: &[RawRecord],
    address: IpAddr,
) -> Result<(u64, u64), CoreError> {
    let mut totals = (0_u64, 0_u64);
    for record in records {
        let ((src, _), (dst, _)) = convert::connection_endpoints(record)?;
        let (orig, repl) = convert::connection_bytes(record)?;
        if src == address {
            totals.0 = totals.0.saturating_add(repl);
            totals.1 = totals.1.saturating_add(orig);
        } else if dst == address {
            totals.0 = totals.0.saturating_add(orig);
            totals.1 = totals.1.saturating_add(repl);
        }
    }
    Ok(totals)
}

fn sum_pairs(
    records: &[RawRecord],
    pair: fn(&RawRecord) -> Result<(u64, u64), CoreError>,
) -> Result<(u64, u64), CoreError> {
    records.iter().try_fold((0_u64, 0_u64), |acc, record| {
        let (down, up) = pair(record)?;
        Ok((acc.0.saturating_add(down), acc.1.saturating_add(up)))
    })
}

fn arp_contains(records: &[RawRecord], address: IpAddr) -> bool {
    records.iter().any(|r| {
        r.get("invalid").is_none_or(|v| v != "true")
            && r.get("address")
                .and_then(|a| a.parse::<IpAddr>().ok())
                .is_some_and(|a| a == address)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::raw_record;

    #[test]
    fn interface_totals_skip_down_links() {
        let records = vec![
            raw_record([("name", "ether1"), ("rx-byte", "100"), ("tx-byte", "10"), ("running", "true")]),
            raw_record([("name", "ether2"), ("rx-byte", "900"), ("tx-byte", "90"), ("running", "false")]),
        ];
        assert_eq!(interface_totals(&records).unwrap(), (100, 10));
    }

    #[test]
    fn interface_totals_fail_on_garbage() {
        let records = vec![raw_record([("name", "ether1"), ("tx-byte", "10")])];
        assert!(interface_totals(&records).is_err());
    }

    #[test]
    fn client_totals_take_client_perspective() {
        let records = vec![
            raw_record([
                ("src-address", "192.168.88.10:50000"),
                ("dst-address", "1.1.1.1:443"),
                ("orig-bytes", "100"),
                ("repl-bytes", "900"),
            ]),
            raw_record([
                ("src-address", "10.9.9.9:40000"),
                ("dst-address", "192.168.88.10:22"),
                ("orig-bytes", "30"),
                ("repl-bytes", "70"),
            ]),
            raw_record([
                ("src-address", "192.168.88.11:50000"),
                ("dst-address", "1.1.1.1:443"),
                ("orig-bytes", "5"),
                ("repl-bytes", "5"),
            ]),
        ];
        let totals = client_connection_totals(&records, "192.168.88.10".parse().unwrap()).unwrap();
        assert_eq!(totals, (930, 170));
        assert_eq!(connection_totals(&records).unwrap(), (975, 135));
    }

    #[test]
    fn arp_lookup_ignores_invalid_entries() {
        let records = vec![
            raw_record([("address", "10.0.0.5"), ("invalid", "true")]),
            raw_record([("address", "10.0.0.6")]),
        ];
        assert!(!arp_contains(&records, "10.0.0.5".parse().unwrap()));
        assert!(arp_contains(&records, "10.0.0.6".parse().unwrap()));
    }
}
