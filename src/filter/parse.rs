//! Lexer and recursive-descent parser for filter expression text.

use crate::{
    error::FilterError,
    filter::expr::{CmpOp, Comparison, Field, FilterExpr, Value},
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Num(u64),
    LParen,
    RParen,
    Op(CmpOp),
}

#[derive(Debug, Clone)]
struct Spanned {
    pos: usize,
    token: Token,
}

/// Compile filter expression text into a predicate tree.
pub fn compile(text: &str) -> Result<FilterExpr, FilterError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(FilterError::syntax(0, "empty filter expression"));
    }
    let mut parser = Parser {
        tokens,
        at: 0,
        end: text.len(),
    };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(FilterError::syntax(
            extra.pos,
            format!("unexpected trailing input `{}`", describe(&extra.token)),
        ));
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, FilterError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => i += 1,
            b'(' => {
                tokens.push(Spanned {
                    pos: i,
                    token: Token::LParen,
                });
                i += 1;
            }
            b')' => {
                tokens.push(Spanned {
                    pos: i,
                    token: Token::RParen,
                });
                i += 1;
            }
            b'=' => {
                if bytes.get(i + 1) != Some(&b'=') {
                    return Err(FilterError::syntax(i, "expected `==`"));
                }
                tokens.push(Spanned {
                    pos: i,
                    token: Token::Op(CmpOp::Eq),
                });
                i += 2;
            }
            b'!' => {
                if bytes.get(i + 1) != Some(&b'=') {
                    return Err(FilterError::syntax(i, "expected `!=`"));
                }
                tokens.push(Spanned {
                    pos: i,
                    token: Token::Op(CmpOp::Ne),
                });
                i += 2;
            }
            b'<' => {
                let (op, len) = if bytes.get(i + 1) == Some(&b'=') {
                    (CmpOp::Le, 2)
                } else {
                    (CmpOp::Lt, 1)
                };
                tokens.push(Spanned {
                    pos: i,
                    token: Token::Op(op),
                });
                i += len;
            }
            b'>' => {
                let (op, len) = if bytes.get(i + 1) == Some(&b'=') {
                    (CmpOp::Ge, 2)
                } else {
                    (CmpOp::Gt, 1)
                };
                tokens.push(Spanned {
                    pos: i,
                    token: Token::Op(op),
                });
                i += len;
            }
            b'"' | b'\'' => {
                let quote = b;
                let start = i;
                i += 1;
                let content_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i == bytes.len() {
                    return Err(FilterError::syntax(start, "unterminated string literal"));
                }
                let content = &text[content_start..i];
                tokens.push(Spanned {
                    pos: start,
                    token: Token::Str(content.to_string()),
                });
                i += 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let digits = &text[start..i];
                let value = digits.parse::<u64>().map_err(|_| {
                    FilterError::syntax(start, format!("number out of range `{digits}`"))
                })?;
                tokens.push(Spanned {
                    pos: start,
                    token: Token::Num(value),
                });
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.')
                {
                    i += 1;
                }
                tokens.push(Spanned {
                    pos: start,
                    token: Token::Ident(text[start..i].to_string()),
                });
            }
            _ => {
                return Err(FilterError::syntax(
                    i,
                    format!("unexpected character `{}`", char::from(b)),
                ));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    at: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.at)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Spanned { token: Token::Ident(w), .. }) if w.eq_ignore_ascii_case(word))
    }

    fn parse_or(&mut self) -> Result<FilterExpr, FilterError> {
        let mut left = self.parse_and()?;
        while self.keyword("or") {
            self.at += 1;
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, FilterError> {
        let mut left = self.parse_unary()?;
        while self.keyword("and") {
            self.at += 1;
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, FilterError> {
        if self.keyword("not") {
            self.at += 1;
            let inner = self.parse_unary()?;
            return Ok(FilterExpr::Not(Box::new(inner)));
        }

        if matches!(self.peek(), Some(Spanned { token: Token::LParen, .. })) {
            self.at += 1;
            let inner = self.parse_or()?;
            match self.next() {
                Some(Spanned {
                    token: Token::RParen,
                    ..
                }) => return Ok(inner),
                Some(other) => {
                    return Err(FilterError::syntax(
                        other.pos,
                        format!("expected `)`, found `{}`", describe(&other.token)),
                    ));
                }
                None => return Err(FilterError::syntax(self.end, "expected `)`")),
            }
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, FilterError> {
        let (field_pos, field_name) = match self.next() {
            Some(Spanned {
                pos,
                token: Token::Ident(name),
            }) => (pos, name),
            Some(other) => {
                return Err(FilterError::syntax(
                    other.pos,
                    format!("expected a field name, found `{}`", describe(&other.token)),
                ));
            }
            None => return Err(FilterError::syntax(self.end, "expected a field name")),
        };

        let field = Field::from_name(&field_name.to_ascii_lowercase())
            .ok_or(FilterError::UnknownField(field_name))?;

        let op = match self.next() {
            Some(Spanned {
                token: Token::Op(op),
                ..
            }) => op,
            Some(Spanned {
                token: Token::Ident(w),
                ..
            }) if w.eq_ignore_ascii_case("contains") => CmpOp::Contains,
            Some(other) => {
                return Err(FilterError::syntax(
                    other.pos,
                    format!(
                        "expected a comparison operator, found `{}`",
                        describe(&other.token)
                    ),
                ));
            }
            None => {
                return Err(FilterError::syntax(
                    field_pos,
                    "comparison is missing its operator",
                ));
            }
        };

        let value = match self.next() {
            Some(Spanned {
                token: Token::Str(s),
                ..
            }) => Value::Str(s),
            Some(Spanned {
                token: Token::Num(n),
                ..
            }) => Value::Num(n),
            // Bare words are accepted as string values: protocol == DNS
            Some(Spanned {
                token: Token::Ident(w),
                ..
            }) => Value::Str(w),
            Some(other) => {
                return Err(FilterError::syntax(
                    other.pos,
                    format!("expected a value, found `{}`", describe(&other.token)),
                ));
            }
            None => {
                return Err(FilterError::syntax(
                    field_pos,
                    "comparison is missing its value",
                ));
            }
        };

        Ok(FilterExpr::Cmp(Comparison { field, op, value }))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(w) => w.clone(),
        Token::Str(s) => format!("\"{s}\""),
        Token::Num(n) => n.to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::Op(op) => match op {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Contains => "contains",
        }
        .to_string(),
    }
}
