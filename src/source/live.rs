//! Live capture source backed by a pnet datalink channel.
//!
//! This is the external-collaborator side of the pipeline: it only adapts
//! the capture library's receiver to the `FrameSource` contract. The read
//! uses a short timeout so the stop flag is observed promptly even on a
//! silent interface.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use anyhow::{Context, anyhow};
use pnet::datalink::{self, Channel, DataLinkReceiver};
use tracing::{info, warn};

use crate::{
    packet::types::RawFrame,
    source::{EndOfStream, FrameSource},
};

const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct LiveSource {
    rx: Box<dyn DataLinkReceiver>,
    stop: Arc<AtomicBool>,
}

impl LiveSource {
    /// Open a capture channel on the named interface.
    pub fn open(interface: &str) -> anyhow::Result<Self> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == interface)
            .ok_or_else(|| anyhow!("no such interface: {interface}"))?;

        let config = datalink::Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };

        let channel = datalink::channel(&iface, config)
            .with_context(|| format!("failed to open capture channel on {interface}"))?;
        let rx = match channel {
            Channel::Ethernet(_tx, rx) => rx,
            _ => return Err(anyhow!("unsupported channel type on {interface}")),
        };

        info!(
            event_name = "source.attached",
            interface = %interface,
            "capture channel open"
        );

        Ok(Self {
            rx,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that makes the next `next_frame` call return end-of-stream.
    /// Shared with whatever handles the cancellation signal.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }
}

impl FrameSource for LiveSource {
    fn next_frame(&mut self) -> Result<RawFrame, EndOfStream> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(EndOfStream);
            }
            match self.rx.next() {
                Ok(bytes) => {
                    // The datalink channel hands back exactly the captured
                    // bytes; wire length and captured length coincide here.
                    return Ok(RawFrame {
                        data: bytes.to_vec(),
                        timestamp: SystemTime::now(),
                        wire_len: bytes.len() as u32,
                    });
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    continue;
                }
                Err(e) => {
                    warn!(
                        event_name = "source.read_failed",
                        error.message = %e,
                        "capture read failed, ending stream"
                    );
                    return Err(EndOfStream);
                }
            }
        }
    }
}
