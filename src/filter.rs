//! Filter expression engine.
//!
//! Expressions are compiled once at session start and evaluated per record.
//! Grammar, loosest to tightest binding:
//!
//! ```text
//! expr        := or
//! or          := and ("or" and)*
//! and         := unary ("and" unary)*
//! unary       := "not" unary | "(" expr ")" | comparison
//! comparison  := field op value
//! op          := "==" | "!=" | "<" | "<=" | ">" | ">=" | "contains"
//! field       := "protocol" | "proto" | "src" | "dst" | "host"
//!              | "port" | "src_port" | "dst_port" | "len"
//! value       := quoted string | bare word | decimal integer
//! ```
//!
//! Compilation errors are fatal to session start; evaluation is pure and
//! total. Comparisons against a field the record does not carry (port on
//! ICMP, address on a link-only record) evaluate to false, `!=` included.
//!
//! - `expr`: the predicate tree and its evaluation
//! - `parse`: lexer and recursive-descent parser

pub mod expr;
pub mod parse;

pub use expr::FilterExpr;
pub use parse::compile;
