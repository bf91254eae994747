//! Identities referenced from access-control attributes.
//!
//! `owner`, `manager` and `secretary` values are either real dns (a user or a group) or one of
//! the reserved sentinel strings. The sentinels only exist on the wire; in memory they are
//! variants of [`Identity`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dn::{DistinguishedName, DnError};

/// Placeholder member of an otherwise empty `uniqueMember` list.
///
/// The directory refuses empty multi-valued membership attributes. Never a valid user dn.
pub const EMPTY_LIST_IDENTIFIER: &str = "cn=empty";

/// Pseudo-dn matching every authenticated identity. Never a valid user dn.
pub const EVERYBODY_IDENTIFIER: &str = "cn=everybody";

/// Pseudo-dn matching an unauthenticated caller. Never a valid user dn.
pub const ANONYMOUS_IDENTIFIER: &str = "cn=anonymous";

/// An entry of an access-control list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identity {
    /// A user or group entry.
    Dn(DistinguishedName),
    /// Any authenticated user.
    Everybody,
    /// A caller without an authenticated identity.
    Anonymous,
}

impl Identity {
    /// Parses a wire value, recognising the sentinels case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`DnError`] when the value is neither a sentinel nor a valid dn.
    pub fn parse(value: &str) -> Result<Self, DnError> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case(EVERYBODY_IDENTIFIER) {
            Ok(Self::Everybody)
        } else if trimmed.eq_ignore_ascii_case(ANONYMOUS_IDENTIFIER) {
            Ok(Self::Anonymous)
        } else {
            DistinguishedName::parse(trimmed).map(Self::Dn)
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Dn(dn) => dn.as_str(),
            Self::Everybody => EVERYBODY_IDENTIFIER,
            Self::Anonymous => ANONYMOUS_IDENTIFIER,
        }
    }

    /// The dn behind this identity, if it is a real entry.
    #[must_use]
    pub fn dn(&self) -> Option<&DistinguishedName> {
        match self {
            Self::Dn(dn) => Some(dn),
            _ => None,
        }
    }

    /// Returns true when this identity names exactly `dn`.
    #[must_use]
    pub fn is_dn(&self, dn: &DistinguishedName) -> bool {
        self.dn() == Some(dn)
    }
}

impl From<DistinguishedName> for Identity {
    fn from(dn: DistinguishedName) -> Self {
        Self::Dn(dn)
    }
}

impl TryFrom<String> for Identity {
    type Error = DnError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.as_str().to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true when a raw `uniqueMember` value is the empty-list placeholder.
#[must_use]
pub fn is_empty_list_marker(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(EMPTY_LIST_IDENTIFIER)
}
