//! Structured event filters.
//!
//! Supported forms:
//!
//! ```text
//! *
//! *[System[Level=2 or (EventID>=1000 and EventID<2000)]]
//! *[System[Provider[@Name='Service Control Manager'] and band(Keywords, 0x80)]]
//! *[System[TimeCreated[timediff(@SystemTime) <= 86400000]]]
//! ```
//!
//! Comparable fields are `Level`, `EventID`, `Task`, `Opcode`, `Keywords`
//! and `EventRecordID`. Anything else is rejected as an invalid query.

use super::event::StoredEvent;
use super::{ProviderError, ProviderResult};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(u64),
    Str(String),
    Op(CmpOp),
    Star,
    At,
    Comma,
    LBracket,
    RBracket,
    LParen,
    RParen,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn apply(self, lhs: u64, rhs: u64) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Level,
    EventId,
    Task,
    Opcode,
    Keywords,
    RecordId,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Level" => Some(Field::Level),
            "EventID" => Some(Field::EventId),
            "Task" => Some(Field::Task),
            "Opcode" => Some(Field::Opcode),
            "Keywords" => Some(Field::Keywords),
            "EventRecordID" => Some(Field::RecordId),
            _ => None,
        }
    }

    fn value(self, event: &StoredEvent) -> u64 {
        let s = &event.system;
        match self {
            Field::Level => u64::from(s.level),
            Field::EventId => u64::from(s.event_id),
            Field::Task => u64::from(s.task),
            Field::Opcode => u64::from(s.opcode),
            Field::Keywords => s.keywords,
            Field::RecordId => event.record_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Compare(Field, CmpOp, u64),
    Provider(String),
    /// Age in milliseconds relative to evaluation time.
    Age(CmpOp, u64),
    KeywordMask(u64),
}

impl Expr {
    fn eval(&self, event: &StoredEvent, now_micros: i64) -> bool {
        match self {
            Expr::Or(terms) => terms.iter().any(|t| t.eval(event, now_micros)),
            Expr::And(terms) => terms.iter().all(|t| t.eval(event, now_micros)),
            Expr::Compare(field, op, value) => op.apply(field.value(event), *value),
            Expr::Provider(name) => event.system.provider_name == *name,
            Expr::Age(op, ms) => {
                let age = now_micros.saturating_sub(event.system.time_created).max(0) / 1000;
                op.apply(age as u64, *ms)
            }
            Expr::KeywordMask(mask) => event.system.keywords & mask != 0,
        }
    }
}

/// A parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    source: String,
    expr: Option<Expr>,
}

impl Filter {
    pub fn parse(source: &str) -> ProviderResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.query()?;
        if parser.pos != parser.tokens.len() {
            return Err(invalid(source, "trailing input"));
        }
        Ok(Filter {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether every event passes.
    pub fn matches_all(&self) -> bool {
        self.expr.is_none()
    }

    pub fn matches(&self, event: &StoredEvent, now_micros: i64) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => expr.eval(event, now_micros),
        }
    }
}

fn invalid(source: &str, detail: &str) -> ProviderError {
    tracing::debug!(filter = source, detail, "rejected filter");
    ProviderError::invalid_query("The specified query is invalid.")
}

fn tokenize(source: &str) -> ProviderResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' | '>' => {
                let or_equal = chars.get(i + 1) == Some(&'=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Ge,
                };
                tokens.push(Token::Op(op));
                i += if or_equal { 2 } else { 1 };
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .ok_or_else(|| invalid(source, "unterminated string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => text.parse::<u64>(),
                };
                let value = parsed.map_err(|_| invalid(source, "bad number"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(invalid(source, "unexpected character")),
        }
    }
    if tokens.is_empty() {
        return Err(invalid(source, "empty filter"));
    }
    Ok(tokens)
}

/// Maximum parenthesis nesting accepted by the parser.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, detail: &str) -> ProviderError {
        tracing::debug!(position = self.pos, detail, "filter parse error");
        ProviderError::invalid_query("The specified query is invalid.")
    }

    fn expect(&mut self, expected: Token) -> ProviderResult<()> {
        match self.bump() {
            Some(ref t) if *t == expected => Ok(()),
            _ => Err(self.error("unexpected token")),
        }
    }

    fn expect_ident(&mut self, name: &str) -> ProviderResult<()> {
        match self.bump() {
            Some(Token::Ident(ref ident)) if ident == name => Ok(()),
            _ => Err(self.error("unexpected identifier")),
        }
    }

    fn expect_number(&mut self) -> ProviderResult<u64> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            _ => Err(self.error("expected number")),
        }
    }

    fn expect_op(&mut self) -> ProviderResult<CmpOp> {
        match self.bump() {
            Some(Token::Op(op)) => Ok(op),
            _ => Err(self.error("expected comparison")),
        }
    }

    fn query(&mut self) -> ProviderResult<Option<Expr>> {
        match self.bump() {
            Some(Token::Star) => {}
            Some(Token::Ident(ref name)) if name == "Event" => {}
            _ => return Err(self.error("expected '*'")),
        }
        if self.peek().is_none() {
            return Ok(None);
        }
        self.expect(Token::LBracket)?;
        self.expect_ident("System")?;
        self.expect(Token::LBracket)?;
        let expr = self.or_expr()?;
        self.expect(Token::RBracket)?;
        self.expect(Token::RBracket)?;
        Ok(Some(expr))
    }

    fn or_expr(&mut self) -> ProviderResult<Expr> {
        let mut terms = vec![self.and_expr()?];
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "or") {
            self.pos += 1;
            terms.push(self.and_expr()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn and_expr(&mut self) -> ProviderResult<Expr> {
        let mut terms = vec![self.primary()?];
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "and") {
            self.pos += 1;
            terms.push(self.primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn primary(&mut self) -> ProviderResult<Expr> {
        match self.bump() {
            Some(Token::LParen) => {
                if self.depth >= MAX_NESTING {
                    return Err(self.error("nesting too deep"));
                }
                self.depth += 1;
                let expr = self.or_expr()?;
                self.depth -= 1;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "Provider" => {
                    self.expect(Token::LBracket)?;
                    self.expect(Token::At)?;
                    self.expect_ident("Name")?;
                    self.expect(Token::Op(CmpOp::Eq))?;
                    let provider = match self.bump() {
                        Some(Token::Str(s)) => s,
                        _ => return Err(self.error("expected provider name")),
                    };
                    self.expect(Token::RBracket)?;
                    Ok(Expr::Provider(provider))
                }
                "TimeCreated" => {
                    self.expect(Token::LBracket)?;
                    self.expect_ident("timediff")?;
                    self.expect(Token::LParen)?;
                    self.expect(Token::At)?;
                    self.expect_ident("SystemTime")?;
                    self.expect(Token::RParen)?;
                    let op = self.expect_op()?;
                    let ms = self.expect_number()?;
                    self.expect(Token::RBracket)?;
                    Ok(Expr::Age(op, ms))
                }
                "band" => {
                    self.expect(Token::LParen)?;
                    self.expect_ident("Keywords")?;
                    self.expect(Token::Comma)?;
                    let mask = self.expect_number()?;
                    self.expect(Token::RParen)?;
                    Ok(Expr::KeywordMask(mask))
                }
                other => {
                    let field = Field::from_name(other).ok_or_else(|| self.error("unknown field"))?;
                    let op = self.expect_op()?;
                    let value = self.expect_number()?;
                    Ok(Expr::Compare(field, op, value))
                }
            },
            _ => Err(self.error("expected condition")),
        }
    }
}
