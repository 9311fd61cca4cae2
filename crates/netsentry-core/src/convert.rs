// ── Device-record conversions ──
//
// Bridges raw key-value rows returned by the command channel into typed
// model structures. Counters that a caller depends on are required: a
// missing or non-numeric field rejects the record with `CoreError::Parse`
// instead of letting a zero or NaN leak downstream. List observations are
// lenient per-row: a malformed neighbor is skipped, the table survives.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::channel::RawRecord;
use crate::error::CoreError;
use crate::model::{
    DeviceId, InterfaceCounters, MacAddress, NeighborObservation, ObservationSource, Protocol,
    TrafficFlow, WirelessClient,
};

// ── Helpers ────────────────────────────────────────────────────────

/// Trimmed, non-empty field value.
fn field<'a>(record: &'a RawRecord, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required<'a>(record: &'a RawRecord, key: &str, kind: &str) -> Result<&'a str, CoreError> {
    field(record, key).ok_or_else(|| CoreError::parse(kind, format!("missing field '{key}'")))
}

fn required_u64(record: &RawRecord, key: &str, kind: &str) -> Result<u64, CoreError> {
    let raw = required(record, key, kind)?;
    raw.parse()
        .map_err(|_| CoreError::parse(kind, format!("field '{key}' is not a counter: '{raw}'")))
}

/// Optional counter; present-but-garbage is still an error.
fn optional_u64(record: &RawRecord, key: &str, kind: &str) -> Result<u64, CoreError> {
    match field(record, key) {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| CoreError::parse(kind, format!("field '{key}' is not a counter: '{raw}'"))),
    }
}

fn flag(record: &RawRecord, key: &str) -> bool {
    matches!(field(record, key), Some("true" | "yes"))
}

fn parse_ip(raw: Option<&str>) -> Option<IpAddr> {
    raw.and_then(|s| s.split('/').next())
        .and_then(|s| s.trim().parse().ok())
}

/// Split a counter pair such as `"1200/3400"` or `"1200,3400"`.
pub fn parse_counter_pair(raw: &str, separator: char) -> Option<(u64, u64)> {
    let (a, b) = raw.split_once(separator)?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Parse an endpoint written as `addr:port`, `[v6]:port`, or a bare address.
pub fn parse_endpoint(raw: &str) -> Option<(IpAddr, u16)> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some((ip, 0));
    }
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        return Some((host.parse().ok()?, port.parse().ok()?));
    }
    let (host, port) = raw.rsplit_once(':')?;
    Some((host.parse().ok()?, port.parse().ok()?))
}

/// Parse a device duration string into milliseconds.
///
/// Accepts unit-suffixed forms (`1w2d3h4m5s`, `250ms`) and clock forms
/// (`01:02:03`, `02:03`).
pub fn parse_duration_ms(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.contains(':') {
        let mut total: u64 = 0;
        for part in raw.split(':') {
            let value: u64 = part.parse().ok()?;
            total = total.checked_mul(60)?.checked_add(value)?;
        }
        return total.checked_mul(1000);
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let value: u64 = digits.parse().ok()?;
        digits.clear();
        let unit_ms: u64 = match c {
            'w' => 604_800_000,
            'd' => 86_400_000,
            'h' => 3_600_000,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            'm' => 60_000,
            's' => 1_000,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit_ms)?)?;
    }
    if !digits.is_empty() {
        // A bare number is seconds.
        total = total.checked_add(digits.parse::<u64>().ok()?.checked_mul(1000)?)?;
    }
    Some(total)
}

/// Parse a link speed such as `1Gbps`, `100Mbps`, `10G-baseT` into bits/s.
pub fn parse_link_speed(raw: &str) -> Option<u64> {
    let lower = raw.trim().to_ascii_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(lower.len());
    let (number, unit) = lower.split_at(digits_end);
    let value: f64 = number.parse().ok()?;
    let multiplier = match unit.chars().next() {
        Some('g') => 1e9,
        Some('m') => 1e6,
        Some('k') => 1e3,
        _ => 1.0,
    };
    let bps = value * multiplier;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
    (bps.is_finite() && bps > 0.0).then_some(bps as u64)
}

/// Leading signed integer of a signal field such as `-65dBm@6Mbps`.
pub fn parse_signal_dbm(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(raw.len(), |(i, _)| i);
    raw.get(..end)?.parse().ok()
}

// ── Interfaces ─────────────────────────────────────────────────────

pub fn interface_counters(record: &RawRecord) -> Result<InterfaceCounters, CoreError> {
    const KIND: &str = "interface";
    Ok(InterfaceCounters {
        name: required(record, "name", KIND)?.to_owned(),
        running: flag(record, "running"),
        rx_bytes: required_u64(record, "rx-byte", KIND)?,
        tx_bytes: required_u64(record, "tx-byte", KIND)?,
        rx_packets: optional_u64(record, "rx-packet", KIND)?,
        tx_packets: optional_u64(record, "tx-packet", KIND)?,
        rx_errors: optional_u64(record, "rx-error", KIND)?,
        tx_errors: optional_u64(record, "tx-error", KIND)?,
        rx_drops: optional_u64(record, "rx-drop", KIND)?,
        tx_drops: optional_u64(record, "tx-drop", KIND)?,
        link_speed_bps: field(record, "link-speed")
            .or_else(|| field(record, "speed"))
            .and_then(parse_link_speed),
    })
}

// ── Connection tracking ────────────────────────────────────────────

/// Source and destination endpoints of a connection-tracking row.
pub fn connection_endpoints(
    record: &RawRecord,
) -> Result<((IpAddr, u16), (IpAddr, u16)), CoreError> {
    const KIND: &str = "connection";
    let src = required(record, "src-address", KIND)?;
    let dst = required(record, "dst-address", KIND)?;
    let source = parse_endpoint(src)
        .ok_or_else(|| CoreError::parse(KIND, format!("bad src-address '{src}'")))?;
    let dest = parse_endpoint(dst)
        .ok_or_else(|| CoreError::parse(KIND, format!("bad dst-address '{dst}'")))?;
    Ok((source, dest))
}

/// `(orig, repl)` byte counters of a connection-tracking row: the
/// initiator's direction and the reply's.
pub fn connection_bytes(record: &RawRecord) -> Result<(u64, u64), CoreError> {
    const KIND: &str = "connection";
    Ok((
        optional_u64(record, "orig-bytes", KIND)?,
        optional_u64(record, "repl-bytes", KIND)?,
    ))
}

/// Convert one connection-tracking row into a flow observed by `device_id`.
///
/// The flow carries the sum of both directions. Duration comes from an
/// explicit `duration` field when the exporter provides one, otherwise
/// from the tracker's remaining `timeout` (short for closing or
/// half-open connections).
pub fn connection_flow(
    record: &RawRecord,
    device_id: DeviceId,
    observed_at: DateTime<Utc>,
) -> Result<TrafficFlow, CoreError> {
    const KIND: &str = "connection";
    let ((source_addr, source_port), (dest_addr, dest_port)) = connection_endpoints(record)?;
    let protocol = Protocol::from_raw(required(record, "protocol", KIND)?);
    let (orig_bytes, repl_bytes) = connection_bytes(record)?;
    let orig_packets = optional_u64(record, "orig-packets", KIND)?;
    let repl_packets = optional_u64(record, "repl-packets", KIND)?;

    Ok(TrafficFlow {
        source_addr,
        dest_addr,
        source_port,
        dest_port,
        protocol,
        byte_count: orig_bytes.saturating_add(repl_bytes),
        packet_count: orig_packets.saturating_add(repl_packets),
        duration_ms: field(record, "duration")
            .or_else(|| field(record, "timeout"))
            .and_then(parse_duration_ms)
            .unwrap_or(0),
        timestamp: observed_at,
        device_id,
    })
}

/// Convert a whole connection table, skipping malformed rows.
pub fn connection_flows(
    records: &[RawRecord],
    device_id: DeviceId,
    observed_at: DateTime<Utc>,
) -> Vec<TrafficFlow> {
    records
        .iter()
        .filter_map(|r| match connection_flow(r, device_id, observed_at) {
            Ok(flow) => Some(flow),
            Err(e) => {
                debug!(device_id = %device_id, error = %e, "skipping connection row");
                None
            }
        })
        .collect()
}

// ── Counter pairs ──────────────────────────────────────────────────

/// `(download, upload)` from a wireless or CAPsMAN registration row,
/// whose `bytes` field is `tx,rx` from the radio's point of view.
pub fn registration_bytes(record: &RawRecord) -> Result<(u64, u64), CoreError> {
    const KIND: &str = "registration";
    let raw = required(record, "bytes", KIND)?;
    parse_counter_pair(raw, ',')
        .ok_or_else(|| CoreError::parse(KIND, format!("bad bytes pair '{raw}'")))
}

/// One station row from a wireless or CAPsMAN registration table.
pub fn registration_client(record: &RawRecord) -> Result<WirelessClient, CoreError> {
    const KIND: &str = "registration";
    let (download, upload) = registration_bytes(record)?;
    Ok(WirelessClient {
        mac: MacAddress::new(required(record, "mac-address", KIND)?),
        interface: field(record, "interface").map(str::to_owned),
        signal_dbm: field(record, "signal-strength").and_then(parse_signal_dbm),
        download,
        upload,
    })
}

/// `(download, upload)` from a simple-queue row, whose `bytes` field is
/// `upload/download` from the target's point of view.
pub fn queue_bytes(record: &RawRecord) -> Result<(u64, u64), CoreError> {
    const KIND: &str = "queue";
    let raw = required(record, "bytes", KIND)?;
    let (up, down) = parse_counter_pair(raw, '/')
        .ok_or_else(|| CoreError::parse(KIND, format!("bad bytes pair '{raw}'")))?;
    Ok((down, up))
}

/// Whether a simple queue's target list includes `address`.
pub fn queue_targets(record: &RawRecord, address: IpAddr) -> bool {
    field(record, "target").is_some_and(|targets| {
        targets
            .split(',')
            .any(|t| parse_ip(Some(t)) == Some(address))
    })
}

// ── Neighbor observations ──────────────────────────────────────────

fn observation(
    source: ObservationSource,
    address: Option<IpAddr>,
    record: &RawRecord,
    reported_by: DeviceId,
    observed_at: DateTime<Utc>,
) -> Option<NeighborObservation> {
    let Some(address) = address else {
        debug!(%source, reported_by = %reported_by, "skipping entry without address");
        return None;
    };
    Some(NeighborObservation {
        address,
        mac: field(record, "mac-address").map(MacAddress::new),
        hostname: None,
        source,
        platform: None,
        advertised_capabilities: Vec::new(),
        interface: field(record, "interface").map(str::to_owned),
        reported_by,
        observed_at,
    })
}

pub fn arp_observation(
    record: &RawRecord,
    reported_by: DeviceId,
    observed_at: DateTime<Utc>,
) -> Option<NeighborObservation> {
    if flag(record, "invalid") {
        return None;
    }
    let address = parse_ip(field(record, "address"));
    observation(ObservationSource::Arp, address, record, reported_by, observed_at)
}

pub fn dhcp_observation(
    record: &RawRecord,
    reported_by: DeviceId,
    observed_at: DateTime<Utc>,
) -> Option<NeighborObservation> {
    let address = parse_ip(field(record, "active-address").or_else(|| field(record, "address")));
    let mut obs = observation(ObservationSource::Dhcp, address, record, reported_by, observed_at)?;
    obs.hostname = field(record, "host-name").map(str::to_owned);
    if obs.mac.is_none() {
        obs.mac = field(record, "active-mac-address").map(MacAddress::new);
    }
    Some(obs)
}

pub fn neighbor_observation(
    record: &RawRecord,
    reported_by: DeviceId,
    observed_at: DateTime<Utc>,
) -> Option<NeighborObservation> {
    let address = parse_ip(field(record, "address4").or_else(|| field(record, "address")));
    let mut obs = observation(ObservationSource::Neighbor, address, record, reported_by, observed_at)?;
    obs.hostname = field(record, "identity").map(str::to_owned);
    obs.platform = field(record, "platform").map(str::to_owned);
    obs.advertised_capabilities = field(record, "system-caps-enabled")
        .or_else(|| field(record, "system-caps"))
        .map(|caps| {
            caps.split(',')
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();
    Some(obs)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::channel::raw_record;
    use pretty_assertions::assert_eq;

    #[test]
    fn interface_counters_require_byte_fields() {
        let rec = raw_record([("name", "ether1"), ("rx-byte", "100"), ("running", "true")]);
        let err = interface_counters(&rec).unwrap_err();
        assert!(err.to_string().contains("tx-byte"));

        let rec = raw_record([
            ("name", "ether1"),
            ("rx-byte", "100"),
            ("tx-byte", "50"),
            ("rx-error", "2"),
            ("running", "true"),
            ("speed", "1Gbps"),
        ]);
        let counters = interface_counters(&rec).unwrap();
        assert!(counters.running);
        assert_eq!(counters.total_bytes(), 150);
        assert_eq!(counters.rx_errors, 2);
        assert_eq!(counters.link_speed_bps, Some(1_000_000_000));
    }

    #[test]
    fn non_numeric_counter_fails_closed() {
        let rec = raw_record([("name", "ether1"), ("rx-byte", "NaN"), ("tx-byte", "1")]);
        assert!(matches!(
            interface_counters(&rec),
            Err(CoreError::Parse { .. })
        ));
    }

    #[test]
    fn endpoints_parse_all_forms() {
        assert_eq!(
            parse_endpoint("10.0.0.1:443"),
            Some(("10.0.0.1".parse().unwrap(), 443))
        );
        assert_eq!(
            parse_endpoint("[2001:db8::1]:22"),
            Some(("2001:db8::1".parse().unwrap(), 22))
        );
        assert_eq!(parse_endpoint("10.0.0.1"), Some(("10.0.0.1".parse().unwrap(), 0)));
        assert_eq!(parse_endpoint("not-an-ip:80"), None);
    }

    #[test]
    fn durations_parse_both_styles() {
        assert_eq!(parse_duration_ms("1h2m3s"), Some(3_723_000));
        assert_eq!(parse_duration_ms("250ms"), Some(250));
        assert_eq!(parse_duration_ms("1w"), Some(604_800_000));
        assert_eq!(parse_duration_ms("00:01:30"), Some(90_000));
        assert_eq!(parse_duration_ms("9"), Some(9_000));
        assert_eq!(parse_duration_ms("5x"), None);
    }

    #[test]
    fn connection_rows_become_flows() {
        let rec = raw_record([
            ("src-address", "192.168.88.20:51544"),
            ("dst-address", "1.1.1.1:443"),
            ("protocol", "tcp"),
            ("orig-bytes", "1000"),
            ("repl-bytes", "4000"),
            ("orig-packets", "10"),
            ("repl-packets", "12"),
            ("timeout", "23h59m58s"),
        ]);
        let flow = connection_flow(&rec, DeviceId::new(1), Utc::now()).unwrap();
        assert_eq!(flow.dest_port, 443);
        assert_eq!(flow.byte_count, 5000);
        assert_eq!(flow.packet_count, 22);
        assert_eq!(flow.protocol, Protocol::Tcp);
        assert_eq!(flow.duration_ms, 86_398_000);
    }

    #[test]
    fn malformed_connection_rows_are_skipped() {
        let good = raw_record([
            ("src-address", "10.0.0.2:1000"),
            ("dst-address", "10.0.0.1:22"),
            ("protocol", "tcp"),
        ]);
        let bad = raw_record([("src-address", "10.0.0.2:1000"), ("protocol", "tcp")]);
        let flows = connection_flows(&[good, bad], DeviceId::new(1), Utc::now());
        assert_eq!(flows.len(), 1);
    }

    #[test]
    fn counter_pairs_follow_perspective() {
        let reg = raw_record([("bytes", "5000,1200")]);
        assert_eq!(registration_bytes(&reg).unwrap(), (5000, 1200));
        let queue = raw_record([("bytes", "300/900"), ("target", "192.168.88.10/32")]);
        assert_eq!(queue_bytes(&queue).unwrap(), (900, 300));
        assert!(queue_targets(&queue, "192.168.88.10".parse().unwrap()));
        assert!(queue_bytes(&raw_record([("bytes", "300")])).is_err());
    }

    #[test]
    fn registration_rows_become_clients() {
        let rec = raw_record([
            ("mac-address", "AA:BB:CC:00:00:09"),
            ("interface", "wlan1"),
            ("signal-strength", "-58dBm@HT20-7"),
            ("bytes", "10,20"),
        ]);
        let client = registration_client(&rec).unwrap();
        assert_eq!(client.signal_dbm, Some(-58));
        assert_eq!((client.download, client.upload), (10, 20));
        assert!(registration_client(&raw_record([("bytes", "1,2")])).is_err());
    }

    #[test]
    fn signal_and_speed_parse() {
        assert_eq!(parse_signal_dbm("-65dBm@6Mbps"), Some(-65));
        assert_eq!(parse_signal_dbm("-71"), Some(-71));
        assert_eq!(parse_link_speed("100Mbps"), Some(100_000_000));
        assert_eq!(parse_link_speed("fast"), None);
    }

    #[test]
    fn neighbor_rows_carry_platform_hints() {
        let rec = raw_record([
            ("address", "10.0.0.2"),
            ("mac-address", "4C:5E:0C:00:00:02"),
            ("identity", "core-rtr"),
            ("platform", "MikroTik"),
            ("system-caps-enabled", "bridge,Router"),
        ]);
        let obs = neighbor_observation(&rec, DeviceId::new(1), Utc::now()).unwrap();
        assert_eq!(obs.hostname.as_deref(), Some("core-rtr"));
        assert_eq!(obs.advertised_capabilities, vec!["bridge", "router"]);
        assert_eq!(obs.mac.unwrap().as_str(), "4c:5e:0c:00:00:02");
    }

    #[test]
    fn invalid_arp_entries_are_dropped() {
        let rec = raw_record([("address", "10.0.0.3"), ("invalid", "true")]);
        assert!(arp_observation(&rec, DeviceId::new(1), Utc::now()).is_none());
        let rec = raw_record([("mac-address", "aa:bb:cc:dd:ee:ff")]);
        assert!(arp_observation(&rec, DeviceId::new(1), Utc::now()).is_none());
    }
}
