//! In-process plumbing between the ingestion path and the sink task.
//!
//! - `ringbuf`: bounded drop-oldest record queue with explicit drop
//!   accounting. Bounded memory takes priority over completeness.

pub mod ringbuf;
