//! Live interface status: dump parsing and overlay
//!
//! `wg show <interface> dump` prints a tab-separated table: one header line
//! for the interface itself, then one line per active peer. Live status is
//! best-effort telemetry, not authoritative state: a field that fails to
//! parse degrades to absent, and a dump line for an unknown public key is
//! ignored rather than allowed to break the read path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::PeerView;

/// Column layout of a peer line in the dump output
const COL_PUBLIC_KEY: usize = 0;
const COL_HANDSHAKE: usize = 4;
const COL_RX: usize = 5;
const COL_TX: usize = 6;
const COL_KEEPALIVE: usize = 7;

/// Live link state for one peer; derived, never persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    /// Instant of the last completed handshake; `None` when the peer has
    /// never completed one
    pub latest_handshake_at: Option<DateTime<Utc>>,
    pub transfer_rx: Option<u64>,
    pub transfer_tx: Option<u64>,
    pub persistent_keepalive: Option<String>,
}

/// One parsed peer line from the dump output
#[derive(Debug, Clone, PartialEq)]
pub struct DumpRecord {
    pub public_key: String,
    pub status: PeerStatus,
}

/// Parse a status dump into per-peer records
///
/// The header line is discarded. A handshake timestamp of `0` means "no
/// handshake yet", not epoch time.
pub fn parse_dump(dump: &str) -> Vec<DumpRecord> {
    dump.lines()
        .skip(1)
        .filter_map(parse_peer_line)
        .collect()
}

fn parse_peer_line(line: &str) -> Option<DumpRecord> {
    let columns: Vec<&str> = line.split('\t').collect();
    let public_key = columns.get(COL_PUBLIC_KEY)?.trim();
    if public_key.is_empty() {
        return None;
    }

    let latest_handshake_at = columns
        .get(COL_HANDSHAKE)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|secs| *secs != 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    Some(DumpRecord {
        public_key: public_key.to_string(),
        status: PeerStatus {
            latest_handshake_at,
            transfer_rx: columns.get(COL_RX).and_then(|v| v.parse().ok()),
            transfer_tx: columns.get(COL_TX).and_then(|v| v.parse().ok()),
            persistent_keepalive: columns.get(COL_KEEPALIVE).map(|v| v.trim().to_string()),
        },
    })
}

/// Merge dump records into peer views by public key
///
/// Peers with no matching dump line keep their empty status; dump lines
/// with no matching peer are dropped.
pub fn overlay(peers: &mut [PeerView], records: &[DumpRecord]) {
    for peer in peers.iter_mut() {
        if let Some(record) = records.iter().find(|r| r.public_key == peer.public_key) {
            peer.status = record.status.clone();
        }
    }
}
