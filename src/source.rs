//! Frame sources.
//!
//! The pipeline pulls raw frames from anything implementing `FrameSource`,
//! one frame per iteration, blocking until a frame arrives or the source
//! ends. End-of-stream is a normal stop condition, not an error.
//!
//! - `live`: capture from a host interface via a datalink channel

pub mod live;

use crate::packet::types::RawFrame;

/// The source has no more frames. Triggers an orderly pipeline stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfStream;

/// Supplier of raw link-layer frames.
pub trait FrameSource: Send {
    /// Block until the next frame arrives or the stream ends.
    /// Called once per pipeline iteration.
    fn next_frame(&mut self) -> Result<RawFrame, EndOfStream>;
}

/// In-memory source for tests and replay of synthetic traffic.
pub struct VecSource {
    frames: std::vec::IntoIter<RawFrame>,
}

impl VecSource {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<RawFrame, EndOfStream> {
        self.frames.next().ok_or(EndOfStream)
    }
}
