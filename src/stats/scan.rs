//! Sliding-window port-scan detection.
//!
//! A source address touching more than `port_limit` distinct destination
//! ports within `window` is flagged until the next interval reset. Eviction
//! is exact: each window keeps a per-port refcount so a port only leaves
//! the distinct set when its last event ages out.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    net::IpAddr,
    time::{Duration, SystemTime},
};

#[derive(Debug, Clone, Copy)]
pub struct ScanConfig {
    /// Width of the sliding window.
    pub window: Duration,
    /// Distinct destination ports a source may touch inside the window
    /// before being flagged.
    pub port_limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            port_limit: 10,
        }
    }
}

#[derive(Debug, Default)]
struct SourceWindow {
    events: VecDeque<(SystemTime, u16)>,
    port_refs: HashMap<u16, usize>,
}

impl SourceWindow {
    fn push(&mut self, ts: SystemTime, port: u16) {
        self.events.push_back((ts, port));
        *self.port_refs.entry(port).or_default() += 1;
    }

    fn evict_older_than(&mut self, cutoff: SystemTime) {
        while let Some((ts, port)) = self.events.front().copied() {
            if ts >= cutoff {
                break;
            }
            self.events.pop_front();
            if let Some(refs) = self.port_refs.get_mut(&port) {
                *refs -= 1;
                if *refs == 0 {
                    self.port_refs.remove(&port);
                }
            }
        }
    }

    fn distinct_ports(&self) -> usize {
        self.port_refs.len()
    }
}

#[derive(Debug)]
pub struct ScanDetector {
    config: ScanConfig,
    by_source: HashMap<IpAddr, SourceWindow>,
    flagged: BTreeSet<IpAddr>,
}

impl ScanDetector {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            by_source: HashMap::new(),
            flagged: BTreeSet::new(),
        }
    }

    /// Record one destination-port touch for a source.
    pub fn observe(&mut self, ts: SystemTime, src: IpAddr, dst_port: u16) {
        if self.flagged.contains(&src) {
            // Already flagged for this interval; no need to track further.
            return;
        }

        let window = self.by_source.entry(src).or_default();
        if let Some(cutoff) = ts.checked_sub(self.config.window) {
            window.evict_older_than(cutoff);
        }
        window.push(ts, dst_port);

        if window.distinct_ports() > self.config.port_limit {
            self.flagged.insert(src);
            self.by_source.remove(&src);
        }
    }

    /// Sources flagged since the last clear, in address order.
    pub fn flagged(&self) -> impl Iterator<Item = &IpAddr> {
        self.flagged.iter()
    }

    pub fn clear(&mut self) {
        self.by_source.clear();
        self.flagged.clear();
    }
}
