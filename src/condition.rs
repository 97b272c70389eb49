//! Dependency conditions.
//!
//! A condition is a flat predicate of `key op value` clauses joined by `and`
//! or `or`, e.g. `feature == "socks" and os != 'windows'`. Parsing and then
//! printing yields the canonical spelling, which is what package identity
//! uses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Empty condition")]
    Empty,
    #[error("Malformed clause '{0}'")]
    MalformedClause(String),
    #[error("Unterminated quote in '{0}'")]
    UnterminatedQuote(String),
    #[error("Unexpected token '{0}'")]
    UnexpectedToken(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Joiner {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clause {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

/// Parsed condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    first: Clause,
    rest: Vec<(Joiner, Clause)>,
}

impl Condition {
    /// Single `key == "value"` clause.
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            first: Clause {
                key: key.into(),
                op: Operator::Eq,
                value: value.into(),
            },
            rest: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(text)?;
        let mut tokens = tokens.into_iter().peekable();

        let first = parse_clause(&mut tokens, text)?.ok_or(ConditionError::Empty)?;
        let mut rest = Vec::new();
        while let Some(token) = tokens.next() {
            let joiner = match token {
                Token::Word(w) if w.eq_ignore_ascii_case("and") => Joiner::And,
                Token::Word(w) if w.eq_ignore_ascii_case("or") => Joiner::Or,
                other => return Err(ConditionError::UnexpectedToken(other.to_string())),
            };
            let clause = parse_clause(&mut tokens, text)?
                .ok_or_else(|| ConditionError::MalformedClause(text.to_string()))?;
            rest.push((joiner, clause));
        }

        Ok(Self { first, rest })
    }

    /// Re-serializes `text` in canonical form.
    pub fn canonicalize(text: &str) -> Result<String, ConditionError> {
        Self::parse(text).map(|condition| condition.to_string())
    }

    pub fn clauses(&self) -> impl Iterator<Item = &Clause> {
        std::iter::once(&self.first).chain(self.rest.iter().map(|(_, clause)| clause))
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} \"{}\"", self.key, self.op.as_str(), self.value)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (joiner, clause) in &self.rest {
            let joiner = match joiner {
                Joiner::And => "and",
                Joiner::Or => "or",
            };
            write!(f, " {joiner} {clause}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Op(Operator),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(w) => f.write_str(w),
            Self::Quoted(q) => write!(f, "\"{q}\""),
            Self::Op(op) => f.write_str(op.as_str()),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => value.push(other),
                        None => return Err(ConditionError::UnterminatedQuote(text.to_string())),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            '=' | '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err(ConditionError::MalformedClause(text.to_string()));
                }
                tokens.push(Token::Op(if c == '=' { Operator::Eq } else { Operator::Ne }));
            }
            _ => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_whitespace() || matches!(w, '"' | '\'' | '=' | '!') {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

fn parse_clause<I>(tokens: &mut std::iter::Peekable<I>, text: &str) -> Result<Option<Clause>, ConditionError>
where
    I: Iterator<Item = Token>,
{
    let malformed = || ConditionError::MalformedClause(text.to_string());

    let key = match tokens.next() {
        None => return Ok(None),
        Some(Token::Word(key)) => key,
        Some(other) => return Err(ConditionError::UnexpectedToken(other.to_string())),
    };
    let op = match tokens.next() {
        Some(Token::Op(op)) => op,
        _ => return Err(malformed()),
    };
    let value = match tokens.next() {
        Some(Token::Word(value)) | Some(Token::Quoted(value)) => value,
        _ => return Err(malformed()),
    };

    Ok(Some(Clause { key, op, value }))
}
