//! Pipeline orchestration: source, decode, classify, filter, aggregate, emit.
//!
//! The ingest loop runs on a dedicated blocking task because frame sources
//! block. Everything downstream of the bounded record queue is async. Slow
//! sinks therefore never stall ingestion; the queue drops its oldest unsent
//! record instead and the drop shows up in the counters.
//!
//! Lifecycle: `Starting` -> `Running` -> `Stopping` -> `Stopped`. The stop
//! path is the same for source exhaustion and external cancellation: the
//! ingest loop ends, the queue closes, the emit task drains it, and one
//! final summary flushes the interval counters.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    classify::classify,
    config::Config,
    filter::FilterExpr,
    packet::parser::decode,
    pipes::ringbuf::RecordQueue,
    sink::SinkSet,
    source::FrameSource,
    stats::Aggregator,
};

/// How long the stop path waits for the sinks before abandoning queued
/// records. Keeps cancellation bounded even when a sink never returns.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Starting,
            1 => PipelineState::Running,
            2 => PipelineState::Stopping,
            _ => PipelineState::Stopped,
        }
    }
}

/// Monotonic counters covering every frame the pipeline saw.
/// `frames_seen == records_emitted + decode_drops + filtered_out +
/// queue_drops + in_flight` at any quiescent point.
#[derive(Default)]
pub struct PipelineCounters {
    pub frames_seen: AtomicU64,
    pub records_emitted: AtomicU64,
    pub decode_drops: AtomicU64,
    pub filtered_out: AtomicU64,
}

/// Point-in-time copy of the counters for logging.
#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub frames_seen: u64,
    pub records_emitted: u64,
    pub decode_drops: u64,
    pub filtered_out: u64,
    pub queue_drops: u64,
}

/// Cancellation handle, safe to clone into a signal handler.
#[derive(Clone)]
pub struct PipelineHandle {
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl PipelineHandle {
    /// Request an orderly stop. Takes effect before the next frame pull.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }
}

pub struct Pipeline {
    aggregator: Arc<Aggregator>,
    sinks: Arc<SinkSet>,
    queue: Arc<RecordQueue>,
    counters: Arc<PipelineCounters>,
    cancel: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    summary_interval: std::time::Duration,
}

impl Pipeline {
    pub fn new(conf: &Config, aggregator: Arc<Aggregator>, sinks: Arc<SinkSet>) -> Self {
        Self {
            aggregator,
            sinks,
            queue: Arc::new(RecordQueue::new(conf.queue_capacity)),
            counters: Arc::new(PipelineCounters::default()),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Arc::new(AtomicU8::new(PipelineState::Starting as u8)),
            summary_interval: conf.summary_interval,
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }

    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_seen: self.counters.frames_seen.load(Ordering::Relaxed),
            records_emitted: self.counters.records_emitted.load(Ordering::Relaxed),
            decode_drops: self.counters.decode_drops.load(Ordering::Relaxed),
            filtered_out: self.counters.filtered_out.load(Ordering::Relaxed),
            queue_drops: self.queue.dropped(),
        }
    }

    /// Run the pipeline to completion: until the source ends or the handle
    /// is cancelled. Consumes the source; the filter applies to every
    /// record before aggregation.
    pub async fn run(
        &self,
        mut source: Box<dyn FrameSource>,
        filter: Option<FilterExpr>,
    ) -> Result<()> {
        self.state
            .store(PipelineState::Running as u8, Ordering::Release);
        info!(event_name = "pipeline.started", "pipeline running");

        let mut emit_task = {
            let queue = self.queue.clone();
            let sinks = self.sinks.clone();
            let counters = self.counters.clone();
            tokio::spawn(async move {
                while let Some(record) = queue.pop().await {
                    sinks.emit(&record).await;
                    counters.records_emitted.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        // watch latches: the stop request is never lost even when it fires
        // before this task is first polled.
        let (summary_stop, mut summary_stop_rx) = watch::channel(false);
        let mut summary_task = {
            let aggregator = self.aggregator.clone();
            let sinks = self.sinks.clone();
            let period = self.summary_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately; skip it so the
                // first summary covers a full interval.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let snap = aggregator.snapshot_and_reset();
                            sinks.emit_summary(&snap).await;
                        }
                        _ = summary_stop_rx.changed() => break,
                    }
                }
            })
        };

        let ingest_task = {
            let queue = self.queue.clone();
            let aggregator = self.aggregator.clone();
            let counters = self.counters.clone();
            let cancel = self.cancel.clone();
            tokio::task::spawn_blocking(move || {
                while !cancel.load(Ordering::Acquire) {
                    let frame = match source.next_frame() {
                        Ok(frame) => frame,
                        Err(_) => break,
                    };
                    counters.frames_seen.fetch_add(1, Ordering::Relaxed);

                    let headers = match decode(&frame) {
                        Ok(headers) => headers,
                        Err(e) => {
                            counters.decode_drops.fetch_add(1, Ordering::Relaxed);
                            debug!(
                                event_name = "pipeline.frame_dropped",
                                layer = e.layer,
                                needed = e.needed,
                                captured = e.captured,
                                "truncated frame dropped"
                            );
                            continue;
                        }
                    };

                    let record = classify(&frame, &headers);
                    if let Some(expr) = &filter {
                        if !expr.matches(&record) {
                            counters.filtered_out.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                    }

                    aggregator.observe(&record);
                    queue.push(record);
                }
            })
        };

        ingest_task.await?;
        self.state
            .store(PipelineState::Stopping as u8, Ordering::Release);
        info!(event_name = "pipeline.stopping", "ingestion ended, draining");

        self.queue.close();
        match tokio::time::timeout(DRAIN_GRACE, &mut emit_task).await {
            Ok(join) => join?,
            Err(_) => {
                emit_task.abort();
                let _ = emit_task.await;
                let abandoned = self.queue.abandon();
                warn!(
                    event_name = "pipeline.drain_timed_out",
                    abandoned,
                    "sinks did not drain in time, abandoning queued records"
                );
            }
        }

        let _ = summary_stop.send(true);
        if tokio::time::timeout(DRAIN_GRACE, &mut summary_task).await.is_err() {
            // The summary task can only be stuck inside a sink emit.
            summary_task.abort();
            let _ = summary_task.await;
        }

        // Final summary so the last partial interval is never lost.
        let snap = self.aggregator.snapshot();
        let flush = async {
            self.sinks.emit_summary(&snap).await;
            self.sinks.shutdown().await;
        };
        if tokio::time::timeout(DRAIN_GRACE, flush).await.is_err() {
            warn!(
                event_name = "pipeline.flush_timed_out",
                "sinks did not accept the final summary in time"
            );
        }

        self.state
            .store(PipelineState::Stopped as u8, Ordering::Release);
        let counters = self.counters();
        info!(
            event_name = "pipeline.stopped",
            frames_seen = counters.frames_seen,
            records_emitted = counters.records_emitted,
            decode_drops = counters.decode_drops,
            filtered_out = counters.filtered_out,
            queue_drops = counters.queue_drops,
            "pipeline stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::{Duration, SystemTime},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        classify::TrafficRecord,
        filter,
        packet::types::RawFrame,
        sink::Sink,
        source::{EndOfStream, VecSource},
        stats::{AggregateStats, scan::ScanConfig},
    };

    struct CollectingSink {
        records: Mutex<Vec<TrafficRecord>>,
        summaries: Mutex<Vec<AggregateStats>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                summaries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Sink for Arc<CollectingSink> {
        async fn emit(&self, record: &TrafficRecord) {
            self.records.lock().unwrap().push(record.clone());
        }

        async fn emit_summary(&self, stats: &AggregateStats) {
            self.summaries.lock().unwrap().push(stats.clone());
        }
    }

    struct SlowSink;

    #[async_trait]
    impl Sink for SlowSink {
        async fn emit(&self, _record: &TrafficRecord) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        async fn emit_summary(&self, _stats: &AggregateStats) {}
    }

    /// A sink whose futures never resolve.
    struct StuckSink;

    #[async_trait]
    impl Sink for StuckSink {
        async fn emit(&self, _record: &TrafficRecord) {
            std::future::pending().await
        }

        async fn emit_summary(&self, _stats: &AggregateStats) {
            std::future::pending().await
        }
    }

    /// Never-ending source of the same frame, for cancellation tests.
    struct RepeatSource {
        frame: RawFrame,
    }

    impl crate::source::FrameSource for RepeatSource {
        fn next_frame(&mut self) -> Result<RawFrame, EndOfStream> {
            Ok(self.frame.clone())
        }
    }

    fn udp_frame(src_port: u16, dst_port: u16) -> RawFrame {
        let mut data = Vec::new();
        // Ethernet
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
        data.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
        data.extend_from_slice(&[0x08, 0x00]);
        // IPv4, protocol 17, 10.0.0.1 -> 10.0.0.2
        data.extend_from_slice(&[0x45, 0x00, 0x00, 0x1c]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x40, 17, 0x00, 0x00]);
        data.extend_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(&[10, 0, 0, 2]);
        // UDP
        data.extend_from_slice(&src_port.to_be_bytes());
        data.extend_from_slice(&dst_port.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x08, 0x00, 0x00]);

        let wire_len = data.len() as u32;
        RawFrame {
            data,
            timestamp: SystemTime::now(),
            wire_len,
        }
    }

    fn truncated_frame() -> RawFrame {
        RawFrame {
            data: vec![0x02, 0, 0, 0, 0, 1, 0x02],
            timestamp: SystemTime::now(),
            wire_len: 7,
        }
    }

    fn test_config(queue_capacity: usize) -> Config {
        Config {
            queue_capacity,
            summary_interval: Duration::from_secs(3600),
            ..Config::default()
        }
    }

    fn aggregator() -> Arc<Aggregator> {
        Arc::new(Aggregator::new(ScanConfig {
            window: Duration::from_secs(60),
            port_limit: 10,
        }))
    }

    #[tokio::test]
    async fn frames_flow_end_to_end() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let pipeline = Pipeline::new(&test_config(64), aggregator(), sinks);

        let frames: Vec<RawFrame> = (0..10).map(|i| udp_frame(40000 + i, 53)).collect();
        pipeline
            .run(Box::new(VecSource::new(frames)), None)
            .await
            .unwrap();

        assert_eq!(pipeline.handle().state(), PipelineState::Stopped);
        let counters = pipeline.counters();
        assert_eq!(counters.frames_seen, 10);
        assert_eq!(counters.records_emitted, 10);
        assert_eq!(counters.decode_drops, 0);
        assert_eq!(sink.records.lock().unwrap().len(), 10);
        // Final flush always produces at least one summary.
        assert!(!sink.summaries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_frames_are_counted_not_fatal() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let pipeline = Pipeline::new(&test_config(64), aggregator(), sinks);

        let frames = vec![udp_frame(40000, 53), truncated_frame(), udp_frame(40001, 53)];
        pipeline
            .run(Box::new(VecSource::new(frames)), None)
            .await
            .unwrap();

        let counters = pipeline.counters();
        assert_eq!(counters.frames_seen, 3);
        assert_eq!(counters.decode_drops, 1);
        assert_eq!(counters.records_emitted, 2);
    }

    #[tokio::test]
    async fn filter_rejections_are_counted() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let pipeline = Pipeline::new(&test_config(64), aggregator(), sinks);

        let frames = vec![
            udp_frame(40000, 53),
            udp_frame(40000, 123),
            udp_frame(40001, 53),
        ];
        let expr = filter::compile("dst_port == 53").unwrap();
        pipeline
            .run(Box::new(VecSource::new(frames)), Some(expr))
            .await
            .unwrap();

        let counters = pipeline.counters();
        assert_eq!(counters.frames_seen, 3);
        assert_eq!(counters.filtered_out, 1);
        assert_eq!(counters.records_emitted, 2);
        assert_eq!(sink.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn filtered_records_do_not_reach_aggregator() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let agg = aggregator();
        let pipeline = Pipeline::new(&test_config(64), agg.clone(), sinks);

        let frames = vec![udp_frame(40000, 53), udp_frame(40000, 9999)];
        let expr = filter::compile("dst_port == 53").unwrap();
        pipeline
            .run(Box::new(VecSource::new(frames)), Some(expr))
            .await
            .unwrap();

        let summaries = sink.summaries.lock().unwrap();
        let last = summaries.last().unwrap();
        assert_eq!(last.total_packets(), 1);
    }

    #[tokio::test]
    async fn slow_sink_drops_records_but_never_blocks_ingest() {
        let sinks = Arc::new(SinkSet::new(vec![Box::new(SlowSink)]));
        let pipeline = Pipeline::new(&test_config(4), aggregator(), sinks);

        let frames: Vec<RawFrame> = (0..200).map(|_| udp_frame(40000, 53)).collect();
        pipeline
            .run(Box::new(VecSource::new(frames)), None)
            .await
            .unwrap();

        let counters = pipeline.counters();
        assert_eq!(counters.frames_seen, 200);
        assert!(counters.queue_drops > 0);
        assert_eq!(
            counters.records_emitted + counters.queue_drops,
            200,
            "every frame is either emitted or counted as dropped"
        );
    }

    #[tokio::test]
    async fn run_completes_promptly_on_an_exhausted_source() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let pipeline = Pipeline::new(&test_config(8), aggregator(), sinks);

        // Exhaustion before the summary task is ever polled must still
        // reach a full stop.
        tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(Box::new(VecSource::new(Vec::new())), None),
        )
        .await
        .expect("run finishes after exhaustion")
        .unwrap();

        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.counters().frames_seen, 0);
    }

    #[tokio::test]
    async fn cancellation_completes_with_a_stuck_sink() {
        let sinks = Arc::new(SinkSet::new(vec![Box::new(StuckSink)]));
        let pipeline = Pipeline::new(&test_config(4), aggregator(), sinks);
        let handle = pipeline.handle();

        let source = RepeatSource {
            frame: udp_frame(40000, 53),
        };
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        tokio::time::timeout(
            Duration::from_secs(10),
            pipeline.run(Box::new(source), None),
        )
        .await
        .expect("cancellation completes within bounded time")
        .unwrap();

        let counters = pipeline.counters();
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(counters.records_emitted, 0);
        assert!(counters.queue_drops > 0, "abandoned records count as drops");
    }

    #[tokio::test]
    async fn cancel_stops_an_endless_source() {
        let sink = CollectingSink::new();
        let sinks = Arc::new(SinkSet::new(vec![Box::new(sink.clone())]));
        let pipeline = Pipeline::new(&test_config(64), aggregator(), sinks);
        let handle = pipeline.handle();

        let source = RepeatSource {
            frame: udp_frame(40000, 53),
        };

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(Box::new(source), None),
        )
        .await
        .expect("pipeline stops after cancel")
        .unwrap();
        canceller.await.unwrap();

        assert_eq!(pipeline.handle().state(), PipelineState::Stopped);
        assert!(pipeline.counters().frames_seen > 0);
    }
}
