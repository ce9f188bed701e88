//! Compiled predicate tree and its evaluation over traffic records.

use std::net::IpAddr;

use crate::classify::TrafficRecord;

/// Record fields a comparison can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Protocol,
    Src,
    Dst,
    /// Matches either endpoint address.
    Host,
    /// Matches either endpoint port.
    Port,
    SrcPort,
    DstPort,
    Len,
}

impl Field {
    /// Recognized spellings, lowercased. Unknown names are a compile error,
    /// never an evaluation one.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "protocol" | "proto" => Some(Field::Protocol),
            "src" => Some(Field::Src),
            "dst" => Some(Field::Dst),
            "host" => Some(Field::Host),
            "port" => Some(Field::Port),
            "src_port" => Some(Field::SrcPort),
            "dst_port" => Some(Field::DstPort),
            "len" => Some(Field::Len),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    Num(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub field: Field,
    pub op: CmpOp,
    pub value: Value,
}

/// A compiled filter expression. `not` binds tightest, then `and`, then `or`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Cmp(Comparison),
}

impl FilterExpr {
    /// Evaluate against a record. Pure and total.
    pub fn matches(&self, record: &TrafficRecord) -> bool {
        match self {
            FilterExpr::And(a, b) => a.matches(record) && b.matches(record),
            FilterExpr::Or(a, b) => a.matches(record) || b.matches(record),
            FilterExpr::Not(inner) => !inner.matches(record),
            FilterExpr::Cmp(cmp) => eval_comparison(cmp, record),
        }
    }
}

fn eval_comparison(cmp: &Comparison, record: &TrafficRecord) -> bool {
    match cmp.field {
        Field::Protocol => cmp_str(record.protocol.as_str(), cmp),
        Field::Src => cmp_addr(record.src.addr, cmp),
        Field::Dst => cmp_addr(record.dst.addr, cmp),
        Field::Host => cmp_addr(record.src.addr, cmp) || cmp_addr(record.dst.addr, cmp),
        Field::Port => {
            cmp_opt_num(record.src.port.map(u64::from), cmp)
                || cmp_opt_num(record.dst.port.map(u64::from), cmp)
        }
        Field::SrcPort => cmp_opt_num(record.src.port.map(u64::from), cmp),
        Field::DstPort => cmp_opt_num(record.dst.port.map(u64::from), cmp),
        Field::Len => cmp_num(u64::from(record.wire_len), cmp),
    }
}

fn cmp_str(actual: &str, cmp: &Comparison) -> bool {
    let expected = match &cmp.value {
        Value::Str(s) => s.as_str(),
        // A numeric literal never equals a string field.
        Value::Num(_) => return false,
    };
    match cmp.op {
        CmpOp::Eq => actual.eq_ignore_ascii_case(expected),
        CmpOp::Ne => !actual.eq_ignore_ascii_case(expected),
        CmpOp::Contains => actual
            .to_ascii_lowercase()
            .contains(&expected.to_ascii_lowercase()),
        // Ordering over labels is meaningless; fail closed.
        _ => false,
    }
}

/// Address comparisons go through the canonical string form, so `contains`
/// can match prefixes like "192.168.1.".
fn cmp_addr(addr: Option<IpAddr>, cmp: &Comparison) -> bool {
    let Some(addr) = addr else {
        return false;
    };
    cmp_str(&addr.to_string(), cmp)
}

fn cmp_opt_num(actual: Option<u64>, cmp: &Comparison) -> bool {
    match actual {
        Some(n) => cmp_num(n, cmp),
        None => false,
    }
}

fn cmp_num(actual: u64, cmp: &Comparison) -> bool {
    let expected = match &cmp.value {
        Value::Num(n) => *n,
        Value::Str(s) => match s.parse::<u64>() {
            Ok(n) => n,
            Err(_) => return false,
        },
    };
    match cmp.op {
        CmpOp::Eq => actual == expected,
        CmpOp::Ne => actual != expected,
        CmpOp::Lt => actual < expected,
        CmpOp::Le => actual <= expected,
        CmpOp::Gt => actual > expected,
        CmpOp::Ge => actual >= expected,
        CmpOp::Contains => false,
    }
}
