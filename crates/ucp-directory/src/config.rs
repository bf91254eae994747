//! Configuration types for directory access.

use crate::{dn::DistinguishedName, identity::Identity, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use ucp_core::{BindCredentials, Error};
use url::Url;
use validator::{Validate, ValidationError};

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// How external-mail changes are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailUpdateStrategy {
    /// One order-sensitive modify request.
    #[default]
    Atomic,
    /// First widen every mail attribute to old ∪ new plus a removal marker, then narrow it to
    /// the new values. For servers that reject a modify adding and deleting values of the same
    /// attribute; a failure in between leaves a superset that the second write can repair.
    WidenThenNarrow,
}

/// Configuration for connecting to the directory.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Server URL (`ldap://` or `ldaps://`).
    #[validate(url, custom(function = "validate_ldap_scheme"))]
    url: String,

    /// Administrative bind credentials.
    credentials: BindCredentials,

    /// Base below which user entries (`uid=...`) live.
    user_base_dn: DistinguishedName,

    /// Base below which group entries (`cn=...`) live.
    group_base_dn: DistinguishedName,

    /// Identity whose members may create groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    admin_dn: Option<Identity>,

    #[serde(default = "default_tls_verify")]
    tls_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    tls_ca_cert: Option<PathBuf>,

    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    connection_timeout_secs: u64,

    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_operation_timeout_secs")]
    operation_timeout_secs: u64,

    #[serde(default)]
    mail_update_strategy: MailUpdateStrategy,
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

fn validate_ldap_scheme(url: &str) -> std::result::Result<(), ValidationError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "ldap" | "ldaps" | "ldapi") => Ok(()),
        _ => Err(ValidationError::new("ldap_scheme")),
    }
}

impl DirectoryConfig {
    /// Creates a new directory configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or not an LDAP URL.
    pub fn new(
        url: impl Into<String>,
        credentials: BindCredentials,
        user_base_dn: DistinguishedName,
        group_base_dn: DistinguishedName,
    ) -> Result<Self> {
        let config = Self {
            url: url.into(),
            credentials,
            user_base_dn,
            group_base_dn,
            admin_dn: None,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            mail_update_strategy: MailUpdateStrategy::default(),
        };
        config.check()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for unparsable input and [`Error::ValidationError`] when
    /// a value is out of range.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the file cannot be read, otherwise as
    /// [`DirectoryConfig::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory configuration {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&json)
    }

    fn check(&self) -> Result<()> {
        self.validate()?;
        Ok(())
    }

    /// Returns the server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the administrative credentials.
    #[must_use]
    pub const fn credentials(&self) -> &BindCredentials {
        &self.credentials
    }

    /// Returns the user base distinguished name.
    #[must_use]
    pub const fn user_base_dn(&self) -> &DistinguishedName {
        &self.user_base_dn
    }

    /// Returns the group base distinguished name.
    #[must_use]
    pub const fn group_base_dn(&self) -> &DistinguishedName {
        &self.group_base_dn
    }

    /// Returns the identity allowed to create groups, if configured.
    #[must_use]
    pub const fn admin_dn(&self) -> Option<&Identity> {
        self.admin_dn.as_ref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Returns how external-mail changes are written.
    #[must_use]
    pub const fn mail_update_strategy(&self) -> MailUpdateStrategy {
        self.mail_update_strategy
    }

    /// Sets the identity allowed to create groups.
    #[must_use]
    pub fn with_admin_dn(mut self, admin: Identity) -> Self {
        self.admin_dn = Some(admin);
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] unless `seconds` is within 1..=300.
    pub fn with_connection_timeout_secs(mut self, seconds: u64) -> Result<Self> {
        self.connection_timeout_secs = seconds;
        self.check()?;
        Ok(self)
    }

    /// Overrides the operation timeout in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] unless `seconds` is within 1..=300.
    pub fn with_operation_timeout_secs(mut self, seconds: u64) -> Result<Self> {
        self.operation_timeout_secs = seconds;
        self.check()?;
        Ok(self)
    }

    /// Selects how external-mail changes are written.
    #[must_use]
    pub const fn with_mail_update_strategy(mut self, strategy: MailUpdateStrategy) -> Self {
        self.mail_update_strategy = strategy;
        self
    }
}
