//! Frame decoding module: raw captured bytes into layered header structures.
//!
//! The decoder walks link → network → transport → application, validating
//! each layer's minimum length before reading any field. Every multi-byte
//! integer on the wire is big-endian; that is a fixed rule of the module,
//! not a knob.
//!
//! Two outcomes are possible for any frame:
//! - `Ok(DecodedHeaders)`, possibly partial: an unknown EtherType or IP
//!   protocol number ends the walk at that layer with `complete = false`;
//! - `Err(DecodeError)`, only when the captured bytes end inside a header
//!   the walk had to read.

pub mod parser;
pub mod types;
