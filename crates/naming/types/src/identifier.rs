//! Identifier variants and their syntactic validation.
//!
//! Identifiers are the human-typable names of the network. Three shapes exist:
//!
//! - **Host**: `core.example.net`
//! - **Internal**: `alice@example.net` (persons and types hosted on the network)
//! - **External**: `email:alice@example.com`, `mobile:+41791234567`
//!
//! All variants are normalized on parse and serialize as their string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

const MAX_HOST_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MAX_LOCAL_LEN: usize = 64;
const MOBILE_DIGITS: std::ops::RangeInclusive<usize> = 6..=15;

/// A DNS-style host name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostIdentifier(String);

impl HostIdentifier {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if normalized.len() > MAX_HOST_LEN {
            return Err(IdentifierError::InvalidHost(format!(
                "{} exceeds {} characters",
                normalized, MAX_HOST_LEN
            )));
        }

        let labels = normalized.split('.').collect::<Vec<_>>();
        if labels.len() < 2 {
            return Err(IdentifierError::InvalidHost(format!(
                "{} needs at least two labels",
                normalized
            )));
        }
        for label in labels {
            if !valid_label(label) {
                return Err(IdentifierError::InvalidHost(format!(
                    "{} has invalid label '{}'",
                    normalized, label
                )));
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LEN
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl fmt::Display for HostIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HostIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HostIdentifier> for String {
    fn from(value: HostIdentifier) -> Self {
        value.0
    }
}

/// An internal non-host address, `name@host`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InternalIdentifier {
    name: String,
    host: HostIdentifier,
}

impl InternalIdentifier {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let (name, host) = normalized
            .rsplit_once('@')
            .ok_or_else(|| IdentifierError::InvalidInternal(format!("{} lacks '@'", normalized)))?;

        let name_ok = !name.is_empty()
            && name.len() <= MAX_LOCAL_LEN
            && !name.starts_with('.')
            && !name.ends_with('.')
            && name.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
            });
        if !name_ok {
            return Err(IdentifierError::InvalidInternal(format!(
                "{} has an invalid name part",
                normalized
            )));
        }

        Ok(Self {
            name: name.to_string(),
            host: HostIdentifier::parse(host)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &HostIdentifier {
        &self.host
    }
}

impl fmt::Display for InternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.host)
    }
}

impl TryFrom<String> for InternalIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InternalIdentifier> for String {
    fn from(value: InternalIdentifier) -> Self {
        value.to_string()
    }
}

/// Scheme of an external identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalKind {
    Email,
    Mobile,
}

impl ExternalKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            ExternalKind::Email => "email",
            ExternalKind::Mobile => "mobile",
        }
    }
}

/// An address outside the network (email, mobile number).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalIdentifier {
    kind: ExternalKind,
    value: String,
}

impl ExternalIdentifier {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        let (scheme, rest) = trimmed
            .split_once(':')
            .ok_or_else(|| IdentifierError::UnknownScheme(trimmed.to_string()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "email" => Self::email(rest),
            "mobile" => Self::mobile(rest),
            other => Err(IdentifierError::UnknownScheme(other.to_string())),
        }
    }

    pub fn email(address: &str) -> Result<Self, IdentifierError> {
        let normalized = address.trim().to_ascii_lowercase();
        let (local, domain) = normalized
            .rsplit_once('@')
            .ok_or_else(|| IdentifierError::InvalidEmail(normalized.clone()))?;
        let local_ok = !local.is_empty()
            && local.len() <= MAX_LOCAL_LEN
            && local.chars().all(|c| c.is_ascii_graphic() && c != '@');
        if !local_ok {
            return Err(IdentifierError::InvalidEmail(normalized));
        }
        HostIdentifier::parse(domain)
            .map_err(|_| IdentifierError::InvalidEmail(normalized.clone()))?;

        Ok(Self {
            kind: ExternalKind::Email,
            value: normalized,
        })
    }

    pub fn mobile(number: &str) -> Result<Self, IdentifierError> {
        let trimmed = number.trim();
        let digits = trimmed
            .strip_prefix('+')
            .ok_or_else(|| IdentifierError::InvalidMobile(trimmed.to_string()))?;
        if !MOBILE_DIGITS.contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(IdentifierError::InvalidMobile(trimmed.to_string()));
        }

        Ok(Self {
            kind: ExternalKind::Mobile,
            value: trimmed.to_string(),
        })
    }

    pub fn kind(&self) -> ExternalKind {
        self.kind
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Mail domain for email addresses; mobile numbers have no host.
    pub fn host(&self) -> Option<HostIdentifier> {
        match self.kind {
            ExternalKind::Email => self
                .value
                .rsplit_once('@')
                .and_then(|(_, domain)| HostIdentifier::parse(domain).ok()),
            ExternalKind::Mobile => None,
        }
    }
}

impl fmt::Display for ExternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.scheme(), self.value)
    }
}

/// Any identifier of the network.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identifier {
    Host(HostIdentifier),
    Internal(InternalIdentifier),
    External(ExternalIdentifier),
}

impl Identifier {
    /// Parse any identifier. `:` selects external, `@` internal, otherwise host.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.contains(':') {
            ExternalIdentifier::parse(trimmed).map(Identifier::External)
        } else if trimmed.contains('@') {
            InternalIdentifier::parse(trimmed).map(Identifier::Internal)
        } else {
            HostIdentifier::parse(trimmed).map(Identifier::Host)
        }
    }

    /// The host an identity query for this identifier is sent to.
    pub fn host(&self) -> Option<HostIdentifier> {
        match self {
            Identifier::Host(host) => Some(host.clone()),
            Identifier::Internal(internal) => Some(internal.host().clone()),
            Identifier::External(external) => external.host(),
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            Identifier::Host(_) => "host",
            Identifier::Internal(_) => "internal",
            Identifier::External(_) => "external",
        }
    }

    pub fn as_internal(&self) -> Option<&InternalIdentifier> {
        match self {
            Identifier::Internal(internal) => Some(internal),
            _ => None,
        }
    }

    pub fn into_internal(self) -> Result<InternalIdentifier, IdentifierError> {
        match self {
            Identifier::Internal(internal) => Ok(internal),
            other => Err(IdentifierError::WrongVariant {
                expected: "internal",
                found: other.to_string(),
            }),
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Identifier::Host(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Host(host) => host.fmt(f),
            Identifier::Internal(internal) => internal.fmt(f),
            Identifier::External(external) => external.fmt(f),
        }
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identifier> for String {
    fn from(value: Identifier) -> Self {
        value.to_string()
    }
}

impl From<HostIdentifier> for Identifier {
    fn from(value: HostIdentifier) -> Self {
        Identifier::Host(value)
    }
}

impl From<InternalIdentifier> for Identifier {
    fn from(value: InternalIdentifier) -> Self {
        Identifier::Internal(value)
    }
}

impl From<ExternalIdentifier> for Identifier {
    fn from(value: ExternalIdentifier) -> Self {
        Identifier::External(value)
    }
}

impl PartialEq<InternalIdentifier> for Identifier {
    fn eq(&self, other: &InternalIdentifier) -> bool {
        self.as_internal() == Some(other)
    }
}
