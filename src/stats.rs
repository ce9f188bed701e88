//! Rolling traffic counters and interval snapshots.
//!
//! The `Aggregator` owns all mutable counter state behind one mutex held
//! only for constant-time updates and the snapshot clone, so the periodic
//! reporting task never stalls the ingestion path. Counters are
//! monotonically non-decreasing within an interval; only `reset_interval`
//! clears them.

pub mod scan;

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Mutex, PoisonError},
    time::SystemTime,
};

use serde::Serialize;

use crate::{
    classify::{ProtocolLabel, TrafficRecord},
    stats::scan::{ScanConfig, ScanDetector},
};

/// Packet/byte totals for one counter key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    pub packets: u64,
    pub bytes: u64,
}

impl Counter {
    fn add(&mut self, bytes: u64) {
        self.packets += 1;
        self.bytes += bytes;
    }
}

/// Host pair key for per-conversation counters. Ports are deliberately not
/// part of the key; the pair identifies hosts, not flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PairKey {
    pub src: IpAddr,
    pub dst: IpAddr,
}

/// Read-only copy of the counters accumulated since the last interval reset.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStats {
    #[serde(skip)]
    pub interval_start: SystemTime,
    pub per_protocol: HashMap<ProtocolLabel, Counter>,
    /// Keyed by host pair; serialized as "src>dst" strings for JSON output.
    #[serde(serialize_with = "pair_keys_as_strings")]
    pub per_pair: HashMap<PairKey, Counter>,
    /// Event count per source address, for top-talker ranking.
    pub events_per_source: HashMap<IpAddr, u64>,
    /// Sources that exceeded the distinct-port limit inside the scan window.
    pub suspected_scanners: Vec<IpAddr>,
}

impl AggregateStats {
    fn new(interval_start: SystemTime) -> Self {
        Self {
            interval_start,
            per_protocol: HashMap::new(),
            per_pair: HashMap::new(),
            events_per_source: HashMap::new(),
            suspected_scanners: Vec::new(),
        }
    }

    pub fn total_packets(&self) -> u64 {
        self.per_protocol.values().map(|c| c.packets).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.per_protocol.values().map(|c| c.bytes).sum()
    }

    /// Source addresses ranked by event count, descending, ties broken by
    /// address for stable output.
    pub fn top_talkers(&self, n: usize) -> Vec<(IpAddr, u64)> {
        let mut ranked: Vec<(IpAddr, u64)> = self
            .events_per_source
            .iter()
            .map(|(addr, count)| (*addr, *count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(n);
        ranked
    }

    pub fn is_scanner(&self, addr: &IpAddr) -> bool {
        self.suspected_scanners.contains(addr)
    }
}

fn pair_keys_as_strings<S>(
    pairs: &HashMap<PairKey, Counter>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, counter) in pairs {
        map.serialize_entry(&format!("{}>{}", key.src, key.dst), counter)?;
    }
    map.end()
}

struct AggregateState {
    stats: AggregateStats,
    scan: ScanDetector,
}

/// Owner of all counter state. Cheap to share: `observe` takes `&self`.
pub struct Aggregator {
    inner: Mutex<AggregateState>,
}

impl Aggregator {
    pub fn new(scan_config: ScanConfig) -> Self {
        Self {
            inner: Mutex::new(AggregateState {
                stats: AggregateStats::new(SystemTime::now()),
                scan: ScanDetector::new(scan_config),
            }),
        }
    }

    /// Fold one record into the counters.
    pub fn observe(&self, record: &TrafficRecord) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let bytes = u64::from(record.wire_len);
        state
            .stats
            .per_protocol
            .entry(record.protocol)
            .or_default()
            .add(bytes);

        if let (Some(src), Some(dst)) = (record.src.addr, record.dst.addr) {
            state
                .stats
                .per_pair
                .entry(PairKey { src, dst })
                .or_default()
                .add(bytes);
            *state.stats.events_per_source.entry(src).or_default() += 1;

            if let Some(dst_port) = record.dst.port {
                state.scan.observe(record.timestamp, src, dst_port);
            }
        }
    }

    /// Consistent read-only copy. A half-applied update is never visible:
    /// `observe` holds the same lock for its whole mutation.
    pub fn snapshot(&self) -> AggregateStats {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats = state.stats.clone();
        stats.suspected_scanners = state.scan.flagged().copied().collect();
        stats
    }

    /// Snapshot and reset under one lock acquisition, so a record observed
    /// between the two can never vanish without appearing in a summary.
    pub fn snapshot_and_reset(&self) -> AggregateStats {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats = std::mem::replace(&mut state.stats, AggregateStats::new(SystemTime::now()));
        stats.suspected_scanners = state.scan.flagged().copied().collect();
        state.scan.clear();
        stats
    }

    /// Clear all counters and scan-window state for the next interval.
    pub fn reset_interval(&self) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.stats = AggregateStats::new(SystemTime::now());
        state.scan.clear();
    }
}
