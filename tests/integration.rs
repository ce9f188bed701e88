//! End-to-end pipeline tests driven by synthetic frames.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;

use fucarede::{
    classify::{ProtocolLabel, TrafficRecord},
    config::Config,
    filter,
    packet::types::RawFrame,
    pipeline::{Pipeline, PipelineState},
    sink::{Sink, SinkSet},
    source::VecSource,
    stats::{AggregateStats, Aggregator, scan::ScanConfig},
};

struct CaptureSink {
    records: Mutex<Vec<TrafficRecord>>,
    summaries: Mutex<Vec<AggregateStats>>,
}

impl CaptureSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            summaries: Mutex::new(Vec::new()),
        })
    }
}

/// Local handle so the sink trait can be implemented outside the crate.
#[derive(Clone)]
struct CaptureHandle(Arc<CaptureSink>);

#[async_trait]
impl Sink for CaptureHandle {
    async fn emit(&self, record: &TrafficRecord) {
        self.0.records.lock().unwrap().push(record.clone());
    }

    async fn emit_summary(&self, stats: &AggregateStats) {
        self.0.summaries.lock().unwrap().push(stats.clone());
    }
}

fn frame(data: Vec<u8>) -> RawFrame {
    let wire_len = data.len() as u32;
    RawFrame {
        data,
        timestamp: SystemTime::now(),
        wire_len,
    }
}

fn ethernet(ethertype: u16) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
    data.extend_from_slice(&[0x02, 0, 0, 0, 0, 2]);
    data.extend_from_slice(&ethertype.to_be_bytes());
    data
}

fn ipv4(protocol: u8, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut data = vec![0x45, 0x00, 0x00, 0x28];
    data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    data.extend_from_slice(&[0x40, protocol, 0x00, 0x00]);
    data.extend_from_slice(&src);
    data.extend_from_slice(&dst);
    data
}

fn udp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> RawFrame {
    let mut data = ethernet(0x0800);
    data.extend(ipv4(17, src, dst));
    data.extend_from_slice(&src_port.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&[0x00, 0x08, 0x00, 0x00]);
    frame(data)
}

fn tcp_frame(src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> RawFrame {
    let mut data = ethernet(0x0800);
    data.extend(ipv4(6, src, dst));
    data.extend_from_slice(&src_port.to_be_bytes());
    data.extend_from_slice(&dst_port.to_be_bytes());
    data.extend_from_slice(&[0, 0, 0, 1]);
    data.extend_from_slice(&[0, 0, 0, 0]);
    // data offset 5, SYN, then window, checksum, urgent pointer
    data.extend_from_slice(&[0x50, 0x02, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00]);
    frame(data)
}

fn arp_frame() -> RawFrame {
    let mut data = ethernet(0x0806);
    data.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 0x06, 0x04, 0x00, 0x01]);
    data.extend_from_slice(&[0x02, 0, 0, 0, 0, 1]);
    data.extend_from_slice(&[10, 0, 0, 1]);
    data.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    data.extend_from_slice(&[10, 0, 0, 2]);
    frame(data)
}

fn test_config() -> Config {
    Config {
        queue_capacity: 256,
        summary_interval: Duration::from_secs(3600),
        ..Config::default()
    }
}

fn aggregator(port_limit: usize) -> Arc<Aggregator> {
    Arc::new(Aggregator::new(ScanConfig {
        window: Duration::from_secs(60),
        port_limit,
    }))
}

async fn run(
    frames: Vec<RawFrame>,
    filter_text: Option<&str>,
    agg: Arc<Aggregator>,
) -> (Pipeline, Arc<CaptureSink>) {
    let sink = CaptureSink::new();
    let sinks = Arc::new(SinkSet::new(vec![Box::new(CaptureHandle(sink.clone()))]));
    let pipeline = Pipeline::new(&test_config(), agg, sinks);

    let expr = filter_text.map(|t| filter::compile(t).expect("filter compiles"));
    pipeline
        .run(Box::new(VecSource::new(frames)), expr)
        .await
        .expect("pipeline runs");
    (pipeline, sink)
}

#[tokio::test]
async fn mixed_traffic_is_classified_end_to_end() {
    let frames = vec![
        udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 40000, 53),
        tcp_frame([10, 0, 0, 1], [93, 184, 216, 34], 40001, 443),
        tcp_frame([10, 0, 0, 2], [93, 184, 216, 34], 40002, 9999),
        arp_frame(),
    ];

    let (pipeline, sink) = run(frames, None, aggregator(10)).await;

    assert_eq!(pipeline.handle().state(), PipelineState::Stopped);
    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 4);

    let labels: Vec<ProtocolLabel> = records.iter().map(|r| r.protocol).collect();
    assert!(labels.contains(&ProtocolLabel::Dns));
    assert!(labels.contains(&ProtocolLabel::Tls));
    assert!(labels.contains(&ProtocolLabel::Tcp));
    assert!(labels.contains(&ProtocolLabel::Arp));
}

#[tokio::test]
async fn filter_applies_before_aggregation_and_sinks() {
    let frames = vec![
        udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 40000, 53),
        tcp_frame([10, 0, 0, 1], [93, 184, 216, 34], 40001, 443),
        udp_frame([10, 0, 0, 2], [8, 8, 4, 4], 40002, 53),
    ];

    let (pipeline, sink) = run(
        frames,
        Some("protocol == \"DNS\" and port == 53"),
        aggregator(10),
    )
    .await;

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.protocol == ProtocolLabel::Dns));

    let counters = pipeline.counters();
    assert_eq!(counters.frames_seen, 3);
    assert_eq!(counters.filtered_out, 1);

    let summaries = sink.summaries.lock().unwrap();
    let last = summaries.last().expect("final summary emitted");
    assert_eq!(last.total_packets(), 2);
    assert!(!last.per_protocol.contains_key(&ProtocolLabel::Tls));
}

#[tokio::test]
async fn port_scan_is_flagged_in_the_final_summary() {
    let scanner = [172, 16, 0, 66];
    let mut frames: Vec<RawFrame> = (1000u16..1020)
        .map(|port| tcp_frame(scanner, [10, 0, 0, 1], 55555, port))
        .collect();
    frames.push(udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 40000, 53));

    let (_pipeline, sink) = run(frames, None, aggregator(10)).await;

    let summaries = sink.summaries.lock().unwrap();
    let last = summaries.last().expect("final summary emitted");
    assert!(last.is_scanner(&"172.16.0.66".parse().unwrap()));
    assert!(!last.is_scanner(&"10.0.0.1".parse().unwrap()));
}

#[tokio::test]
async fn truncated_frames_never_abort_the_run() {
    let frames = vec![
        frame(vec![0x02, 0, 0]),
        udp_frame([10, 0, 0, 1], [8, 8, 8, 8], 40000, 53),
        frame(ethernet(0x0800)),
    ];

    let (pipeline, sink) = run(frames, None, aggregator(10)).await;

    let counters = pipeline.counters();
    assert_eq!(counters.frames_seen, 3);
    assert_eq!(counters.decode_drops, 2);
    assert_eq!(sink.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn top_talkers_rank_sources_by_event_count() {
    let mut frames = Vec::new();
    for _ in 0..6 {
        frames.push(udp_frame([10, 0, 0, 9], [8, 8, 8, 8], 40000, 53));
    }
    for _ in 0..2 {
        frames.push(udp_frame([10, 0, 0, 3], [8, 8, 8, 8], 40001, 53));
    }

    let (_pipeline, sink) = run(frames, None, aggregator(10)).await;

    let summaries = sink.summaries.lock().unwrap();
    let last = summaries.last().expect("final summary emitted");
    let top = last.top_talkers(10);
    assert_eq!(top[0], ("10.0.0.9".parse().unwrap(), 6));
    assert_eq!(top[1], ("10.0.0.3".parse().unwrap(), 2));
}
