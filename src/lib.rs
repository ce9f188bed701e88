//! Live traffic inspector: capture, decode, classify, filter, aggregate.
//!
//! The binary wires a capture interface into the [`pipeline::Pipeline`];
//! everything else is library code so tests can drive the same pipeline
//! with synthetic frames.

pub mod classify;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod packet;
pub mod pipeline;
pub mod pipes;
pub mod sink;
pub mod source;
pub mod stats;
