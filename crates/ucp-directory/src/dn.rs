//! Distinguished name parsing and comparison.
//!
//! Directory paths are compared case-insensitively everywhere in this crate, so
//! [`DistinguishedName`] implements `Eq` and `Hash` over its lower-cased canonical form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

use ucp_core::error::Error as CoreError;

/// Errors that can occur when parsing a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component was not of the form `attribute=value`.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component had nothing to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component had nothing to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The input ended inside an escape sequence.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
    /// Hex escapes decoded to bytes that are not valid UTF-8.
    #[error("distinguished name value is not valid UTF-8 after unescaping: {0}")]
    InvalidEscape(String),
}

impl From<DnError> for CoreError {
    fn from(err: DnError) -> Self {
        CoreError::InvalidRequest(err.to_string())
    }
}

/// A single `attribute=value` pair of a distinguished name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    attribute: String,
    value: String,
}

impl Rdn {
    /// Creates an RDN from an attribute name and an unescaped value.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute name (e.g. `uid`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn render(&self) -> String {
        format!("{}={}", self.attribute, escape_value(&self.value))
    }
}

/// Parsed distinguished name.
///
/// Keeps the canonical re-escaped string alongside its RDNs. Multi-valued RDNs (`a=b+c=d`)
/// are kept as one `Vec` per position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<Rdn>>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] if the input is empty or any component is malformed.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DnError> {
        let input = input.as_ref().trim();
        if input.is_empty() {
            return Err(DnError::Empty);
        }

        let rdns = split_unescaped(input, ',')?
            .into_iter()
            .map(|component| {
                split_unescaped(&component, '+')?
                    .iter()
                    .map(|pair| parse_pair(pair))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rdns(rdns))
    }

    /// Builds `attribute=value,<base>`, escaping `value` as needed.
    #[must_use]
    pub fn child(base: &DistinguishedName, attribute: &str, value: &str) -> Self {
        let mut rdns = Vec::with_capacity(base.rdns.len() + 1);
        rdns.push(vec![Rdn::new(attribute, value)]);
        rdns.extend(base.rdns.iter().cloned());
        Self::from_rdns(rdns)
    }

    fn from_rdns(rdns: Vec<Vec<Rdn>>) -> Self {
        let raw = rdns
            .iter()
            .map(|rdn| rdn.iter().map(Rdn::render).collect::<Vec<_>>().join("+"))
            .collect::<Vec<_>>()
            .join(",");
        Self { raw, rdns }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Lower-cased canonical form, the key used for case-insensitive comparison.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.raw.to_ascii_lowercase()
    }

    /// Value of the leading RDN when it uses `attribute` (e.g. the `uid` of a user entry).
    #[must_use]
    pub fn leading_value(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .first()
            .and_then(|rdn| rdn.first())
            .filter(|rdn| rdn.attribute.eq_ignore_ascii_case(attribute))
            .map(Rdn::value)
    }

    /// Returns the parent entry's dn, if any.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        (self.rdns.len() > 1).then(|| Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Returns true when `self` lives directly below `base`.
    #[must_use]
    pub fn is_child_of(&self, base: &DistinguishedName) -> bool {
        self.parent().is_some_and(|parent| &parent == base)
    }
}

impl PartialEq for DistinguishedName {
    fn eq(&self, other: &Self) -> bool {
        self.raw.eq_ignore_ascii_case(&other.raw)
    }
}

impl Eq for DistinguishedName {}

impl Hash for DistinguishedName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DistinguishedName {
    type Error = DnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

/// Splits on `delimiter` outside escape sequences, keeping escapes intact for the next pass.
fn split_unescaped(input: &str, delimiter: char) -> Result<Vec<String>, DnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let escaped = chars.next().ok_or(DnError::UnterminatedEscape)?;
                current.push('\\');
                current.push(escaped);
            }
            c if c == delimiter => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                Err(DnError::InvalidComponent(input.to_string()))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_pair(pair: &str) -> Result<Rdn, DnError> {
    let mut escaped = false;
    let split_at = pair.char_indices().find_map(|(idx, ch)| {
        if escaped {
            escaped = false;
            None
        } else if ch == '\\' {
            escaped = true;
            None
        } else {
            (ch == '=').then_some(idx)
        }
    });

    let idx = split_at.ok_or_else(|| DnError::InvalidComponent(pair.to_string()))?;
    let attribute = pair[..idx].trim();
    let value = pair[idx + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DnError::MissingAttribute(pair.to_string()));
    }
    if value.is_empty() {
        return Err(DnError::MissingValue(attribute.to_string()));
    }

    Ok(Rdn::new(attribute, unescape_value(value)?))
}

/// Resolves `\c` and RFC 4514 `\HH` escapes. Hex pairs may spell out a multi-byte UTF-8
/// sequence (`\C3\A4`), so decoding happens on bytes.
fn unescape_value(value: &str) -> Result<String, DnError> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] != b'\\' {
            decoded.push(bytes[idx]);
            idx += 1;
            continue;
        }
        let next = *bytes.get(idx + 1).ok_or(DnError::UnterminatedEscape)?;
        match (hex_digit(next), bytes.get(idx + 2).copied().and_then(hex_digit)) {
            (Some(high), Some(low)) => {
                decoded.push((high << 4) | low);
                idx += 3;
            }
            _ => {
                decoded.push(next);
                idx += 2;
            }
        }
    }
    String::from_utf8(decoded).map_err(|_| DnError::InvalidEscape(value.to_string()))
}

fn hex_digit(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).and_then(|digit| u8::try_from(digit).ok())
}

fn escape_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (idx, ch) in value.chars().enumerate() {
        let special = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (idx == 0 && matches!(ch, ' ' | '#'))
            || (idx == last && ch == ' ');
        if special {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
