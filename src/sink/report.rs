//! CSV per-source report.
//!
//! Rewritten wholesale on every interval summary so the file on disk always
//! reflects the latest complete interval. Per-record emission is a no-op.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{classify::TrafficRecord, sink::Sink, stats::AggregateStats};

pub struct ReportSink {
    path: PathBuf,
}

impl ReportSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn render(stats: &AggregateStats) -> String {
        let mut out = String::from("source,events,port_scan\n");
        let mut rows: Vec<_> = stats
            .events_per_source
            .iter()
            .map(|(addr, count)| (*addr, *count))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (addr, events) in rows {
            let scan = if stats.is_scanner(&addr) { "yes" } else { "no" };
            out.push_str(&format!("{addr},{events},{scan}\n"));
        }
        out
    }
}

#[async_trait]
impl Sink for ReportSink {
    async fn emit(&self, _record: &TrafficRecord) {}

    async fn emit_summary(&self, stats: &AggregateStats) {
        let body = Self::render(stats);
        match tokio::fs::write(&self.path, body).await {
            Ok(()) => debug!(
                event_name = "sink.report_written",
                path = %self.path.display(),
                sources = stats.events_per_source.len(),
                "report rewritten"
            ),
            Err(e) => warn!(
                event_name = "sink.report_write_failed",
                path = %self.path.display(),
                error.message = %e,
                "failed to write report"
            ),
        }
    }
}
