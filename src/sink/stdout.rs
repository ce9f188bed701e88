//! Console renderer sink.

use std::str::FromStr;

use async_trait::async_trait;
use humantime::format_rfc3339_millis;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    classify::TrafficRecord,
    sink::Sink,
    stats::AggregateStats,
};

const TOP_TALKERS_SHOWN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-compact" => Ok(OutputFormat::JsonCompact),
            other => Err(format!("unknown output format `{other}`")),
        }
    }
}

pub struct StdoutSink {
    format: OutputFormat,
}

impl StdoutSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn emit(&self, record: &TrafficRecord) {
        match self.format {
            OutputFormat::Text => {
                println!(
                    "{} {} ({}B)",
                    format_rfc3339_millis(record.timestamp),
                    record.summary,
                    record.wire_len
                );
            }
            OutputFormat::Json => match serde_json::to_string_pretty(record) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(
                    event_name = "sink.serialize_failed",
                    error.message = %e,
                    "failed to serialize record"
                ),
            },
            OutputFormat::JsonCompact => match serde_json::to_string(record) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(
                    event_name = "sink.serialize_failed",
                    error.message = %e,
                    "failed to serialize record"
                ),
            },
        }
    }

    async fn emit_summary(&self, stats: &AggregateStats) {
        if self.format != OutputFormat::Text {
            match serde_json::to_string(stats) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(
                    event_name = "sink.serialize_failed",
                    error.message = %e,
                    "failed to serialize summary"
                ),
            }
            return;
        }

        println!(
            "--- summary since {} ---",
            format_rfc3339_millis(stats.interval_start)
        );
        println!(
            "total: {} packets, {} bytes",
            stats.total_packets(),
            stats.total_bytes()
        );

        let mut protocols: Vec<_> = stats.per_protocol.iter().collect();
        protocols.sort_by(|a, b| b.1.packets.cmp(&a.1.packets).then_with(|| a.0.cmp(b.0)));
        for (label, counter) in protocols {
            println!(
                "  {:<8} {:>8} packets {:>12} bytes",
                label.as_str(),
                counter.packets,
                counter.bytes
            );
        }

        let talkers = stats.top_talkers(TOP_TALKERS_SHOWN);
        if !talkers.is_empty() {
            println!("top talkers:");
            for (rank, (addr, events)) in talkers.iter().enumerate() {
                let flag = if stats.is_scanner(addr) {
                    "  [port-scan]"
                } else {
                    ""
                };
                println!("  {:>2}. {:<40} {:>6} events{}", rank + 1, addr, events, flag);
            }
        }
        if !stats.suspected_scanners.is_empty() {
            println!("suspected port scans:");
            for addr in &stats.suspected_scanners {
                println!("  {addr}");
            }
        }
    }
}
