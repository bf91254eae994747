//! Administrative bind credentials.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};

/// Credentials used to bind the administrative directory session.
///
/// The password is held as a [`SecretString`]: it is never serialized and is redacted from
/// `Debug` output.
#[derive(Debug, Serialize, Deserialize)]
pub struct BindCredentials {
    /// Bind DN (Distinguished Name) of the administrative account
    pub bind_dn: String,

    /// Bind password
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    bind_password: SecretString,
}

impl BindCredentials {
    /// Create new bind credentials.
    ///
    /// # Arguments
    ///
    /// * `bind_dn` - The LDAP DN for the administrative account
    /// * `bind_password` - The administrative password
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, bind_password: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            bind_password: SecretString::from(bind_password.into()),
        }
    }

    /// Get the LDAP bind DN.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Get the LDAP bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.bind_password.expose_secret()
    }
}

impl Clone for BindCredentials {
    fn clone(&self) -> Self {
        Self::new(self.bind_dn.clone(), self.bind_password())
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}
