//! IPv4 discovery patterns
//!
//! A pattern has four dot-separated parts. Each part is one of:
//!
//! - a literal octet (`10`)
//! - `*`, every octet from 0 to 255
//! - `(n-m)`, the inclusive range n..=m
//! - `[a;b;c]`, an explicit list
//!
//! Expansion yields the cartesian product with part 1 as the outermost loop
//! and part 4 as the innermost one.

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static LITERAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("valid regex"));

static RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(\s*(\S+?)\s*-\s*(\S+?)\s*\)$").expect("valid regex"));

static LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(.*)\]$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern '{pattern}' must have 4 dot-separated parts, found {found}")]
    PartCount { pattern: String, found: usize },

    #[error("part '{part}' of pattern '{pattern}' is malformed")]
    Malformed { pattern: String, part: String },

    #[error("'{token}' in pattern '{pattern}' is not an octet (0-255)")]
    NotAnOctet { pattern: String, token: String },

    #[error("range ({from}-{to}) in pattern '{pattern}' is empty")]
    EmptyRange { pattern: String, from: u8, to: u8 },
}

/// A parsed discovery pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    parts: [Vec<u8>; 4],
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let source = pattern.trim().to_string();
        let raw: Vec<&str> = source.split('.').map(str::trim).collect();

        if raw.len() != 4 {
            return Err(PatternError::PartCount {
                pattern: source.clone(),
                found: raw.len(),
            });
        }

        let mut parts: [Vec<u8>; 4] = Default::default();
        for (slot, part) in parts.iter_mut().zip(raw) {
            *slot = parse_part(&source, part)?;
        }

        Ok(Self { source, parts })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of addresses this pattern expands to
    pub fn len(&self) -> usize {
        self.parts.iter().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over all addresses in outer-to-inner part order
    pub fn addresses(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let [a, b, c, d] = &self.parts;
        a.iter().flat_map(move |&p1| {
            b.iter().flat_map(move |&p2| {
                c.iter()
                    .flat_map(move |&p3| d.iter().map(move |&p4| Ipv4Addr::new(p1, p2, p3, p4)))
            })
        })
    }
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pattern::parse(s)
    }
}

/// Expand a textual pattern into dotted-quad addresses
pub fn expand(pattern: &str) -> Result<Vec<Ipv4Addr>, PatternError> {
    Ok(Pattern::parse(pattern)?.addresses().collect())
}

fn parse_part(pattern: &str, part: &str) -> Result<Vec<u8>, PatternError> {
    if part == "*" {
        return Ok((0..=u8::MAX).collect());
    }

    if LITERAL.is_match(part) {
        return Ok(vec![octet(pattern, part)?]);
    }

    if let Some(captures) = RANGE.captures(part) {
        let from = octet(pattern, &captures[1])?;
        let to = octet(pattern, &captures[2])?;
        if from > to {
            return Err(PatternError::EmptyRange {
                pattern: pattern.to_string(),
                from,
                to,
            });
        }
        return Ok((from..=to).collect());
    }

    if let Some(captures) = LIST.captures(part) {
        let mut items = Vec::new();
        for token in captures[1].split(';').map(str::trim) {
            let value = octet(pattern, token)?;
            // duplicates would produce the same address twice
            if !items.contains(&value) {
                items.push(value);
            }
        }
        return Ok(items);
    }

    Err(PatternError::Malformed {
        pattern: pattern.to_string(),
        part: part.to_string(),
    })
}

fn octet(pattern: &str, token: &str) -> Result<u8, PatternError> {
    token.parse().map_err(|_| PatternError::NotAnOctet {
        pattern: pattern.to_string(),
        token: token.to_string(),
    })
}
