//! Output sinks for classified records and interval summaries.
//!
//! Sinks are best-effort: emission failures are logged, never propagated
//! back into the pipeline.
//!
//! - `stdout`: console renderer (text or JSON)
//! - `report`: CSV per-source report rewritten on every summary

pub mod report;
pub mod stdout;

use anyhow::Result;
use async_trait::async_trait;
use tracing::error;

use crate::{classify::TrafficRecord, stats::AggregateStats};

#[async_trait]
pub trait Sink: Send + Sync {
    /// Emit one classified record. Best-effort, non-blocking.
    async fn emit(&self, record: &TrafficRecord);

    /// Emit one interval summary. Best-effort, non-blocking.
    async fn emit_summary(&self, stats: &AggregateStats);

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Fans every record and summary out to all configured sinks.
pub struct SinkSet {
    sinks: Vec<Box<dyn Sink>>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub async fn emit(&self, record: &TrafficRecord) {
        let futures = self.sinks.iter().map(|sink| sink.emit(record));
        futures::future::join_all(futures).await;
    }

    pub async fn emit_summary(&self, stats: &AggregateStats) {
        let futures = self.sinks.iter().map(|sink| sink.emit_summary(stats));
        futures::future::join_all(futures).await;
    }

    pub async fn shutdown(&self) {
        let results =
            futures::future::join_all(self.sinks.iter().map(|sink| sink.shutdown())).await;
        for result in results {
            if let Err(e) = result {
                error!(
                    event_name = "sink.shutdown_failed",
                    error.message = %e,
                    "error during sink shutdown"
                );
            }
        }
    }
}
