//! Directory client: connection lifecycle and the raw operation set.
//!
//! [`DirectoryClient`] opens a fresh session for every logical operation, binds it as the
//! administrative identity, runs the operation under the configured timeout and unbinds again.
//! The transport sits behind the [`DirectoryConnector`] / [`DirectorySession`] traits; the
//! default connector speaks LDAP through `ldap3`.

use crate::{
    config::DirectoryConfig,
    diff::{Attributes, DirectoryModification},
    dn::DistinguishedName,
    Result,
};
use async_trait::async_trait;
use ldap3::{
    exop::PasswordModify, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry,
};
use native_tls::{Certificate, TlsConnector};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use ucp_core::error::Error;

/// Represents the search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
        }
    }
}

/// Directory entry as returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values keep the order the server returned).
    pub attributes: Attributes,
}

impl LdapEntry {
    /// Returns all values of the attribute, matching its name case-insensitively.
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns the first value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.first().map(String::as_str))
    }

    /// Copies the named attributes under their canonical spelling.
    #[must_use]
    pub fn select(&self, attributes: &[&str]) -> Attributes {
        attributes
            .iter()
            .filter_map(|name| {
                self.values(name)
                    .filter(|values| !values.is_empty())
                    .map(|values| ((*name).to_string(), values.to_vec()))
            })
            .collect()
    }
}

/// One connection to the directory.
///
/// Implementations report failed binds as [`Error::InvalidCredentials`], missing entries as
/// [`Error::NotFound`] and adds against existing entries as [`Error::AlreadyExists`].
#[async_trait]
pub trait DirectorySession: Send {
    /// Authenticates the session.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Searches below `base_dn`.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>>;

    /// Creates an entry.
    async fn add(&mut self, dn: &str, attributes: &Attributes) -> Result<()>;

    /// Applies modifications to an entry in one request.
    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()>;

    /// Deletes an entry.
    async fn delete(&mut self, dn: &str) -> Result<()>;

    /// Sets an entry's password (password modify extended operation).
    async fn set_password(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Closes the session.
    async fn unbind(&mut self) -> Result<()>;
}

/// Factory for fresh, unauthenticated sessions.
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens a new session.
    async fn connect(&self) -> Result<Box<dyn DirectorySession>>;
}

/// Directory client with a pluggable transport.
pub struct DirectoryClient {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn DirectoryConnector>,
}

impl DirectoryClient {
    /// Creates a client that uses the LDAP connector.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        let config = Arc::new(config);
        let connector: Box<dyn DirectoryConnector> = Box::new(LdapConnector::new(config.clone()));
        Self { config, connector }
    }

    /// Creates a client over a custom transport.
    #[must_use]
    pub fn with_connector(config: DirectoryConfig, connector: Box<dyn DirectoryConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Opens a session bound as the administrative identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unreachable`] or [`Error::Timeout`] when the server cannot be reached,
    /// and [`Error::InvalidCredentials`] when the configured credentials are rejected.
    pub async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
        let mut session = self
            .execute_with_timeout(self.connector.connect())
            .await?;
        let credentials = self.config.credentials();
        let bound = self
            .execute_with_timeout(
                session.simple_bind(credentials.bind_dn(), credentials.bind_password()),
            )
            .await;
        match bound {
            Ok(()) => Ok(session),
            Err(err) => {
                self.release(session).await;
                Err(err)
            }
        }
    }

    /// Searches below `base`.
    ///
    /// # Errors
    ///
    /// Propagates transport and directory failures.
    pub async fn search(
        &self,
        base: &DistinguishedName,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        debug!(base = %base, ?scope, filter, "directory search");
        let mut session = self.connect().await?;
        let result = self
            .execute_with_timeout(session.search(base.as_str(), scope, filter, attributes))
            .await;
        self.release(session).await;
        result
    }

    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] when `dn` is taken.
    pub async fn add(&self, dn: &DistinguishedName, attributes: &Attributes) -> Result<()> {
        debug!(dn = %dn, "directory add");
        let mut session = self.connect().await?;
        let result = self
            .execute_with_timeout(session.add(dn.as_str(), attributes))
            .await;
        self.release(session).await;
        result
    }

    /// Applies `modifications` to `dn` in a single request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing entry; propagates other failures.
    pub async fn modify(
        &self,
        dn: &DistinguishedName,
        modifications: &[DirectoryModification],
    ) -> Result<()> {
        debug!(dn = %dn, changes = modifications.len(), "directory modify");
        let mut session = self.connect().await?;
        let result = self
            .execute_with_timeout(session.modify(dn.as_str(), modifications))
            .await;
        self.release(session).await;
        result
    }

    /// Deletes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing entry; propagates other failures.
    pub async fn delete(&self, dn: &DistinguishedName) -> Result<()> {
        debug!(dn = %dn, "directory delete");
        let mut session = self.connect().await?;
        let result = self.execute_with_timeout(session.delete(dn.as_str())).await;
        self.release(session).await;
        result
    }

    /// Sets the password of `dn`.
    ///
    /// # Errors
    ///
    /// Propagates transport and directory failures.
    pub async fn set_password(&self, dn: &DistinguishedName, password: &str) -> Result<()> {
        debug!(dn = %dn, "directory password change");
        let mut session = self.connect().await?;
        let result = self
            .execute_with_timeout(session.set_password(dn.as_str(), password))
            .await;
        self.release(session).await;
        result
    }

    /// Checks credentials by binding a fresh session as `dn`.
    ///
    /// Returns `Ok(false)` when the bind is rejected. An empty password never binds, since LDAP
    /// servers treat it as an anonymous bind.
    ///
    /// # Errors
    ///
    /// Failures other than rejected credentials are propagated.
    pub async fn rebind(&self, dn: &DistinguishedName, password: &str) -> Result<bool> {
        if password.is_empty() {
            return Ok(false);
        }

        let mut session = self
            .execute_with_timeout(self.connector.connect())
            .await?;
        let result = self
            .execute_with_timeout(session.simple_bind(dn.as_str(), password))
            .await;
        self.release(session).await;

        match result {
            Ok(()) => Ok(true),
            Err(Error::InvalidCredentials(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn release(&self, mut session: Box<dyn DirectorySession>) {
        if let Err(err) = self.execute_with_timeout(session.unbind()).await {
            warn!("failed to unbind directory session: {err}");
        }
    }

    async fn execute_with_timeout<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        timeout(self.config.operation_timeout(), fut)
            .await
            .map_err(|_| Error::Timeout("directory operation timed out".to_string()))?
    }
}

/// LDAP connector backed by `ldap3`.
pub struct LdapConnector {
    config: Arc<DirectoryConfig>,
}

impl LdapConnector {
    /// Creates a new connector instance.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DirectoryConnector for LdapConnector {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
        let settings = build_ldap_settings(&self.config)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, self.config.url())
            .await
            .map_err(|err| Error::Unreachable(format!("{}: {err}", self.config.url())))?;
        ldap3::drive!(conn);
        Ok(Box::new(LdapSession {
            inner: ldap,
            operation_timeout: self.config.operation_timeout(),
        }))
    }
}

struct LdapSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let result = bounded(
            self.operation_timeout,
            "bind",
            self.inner.simple_bind(dn, password),
        )
        .await?;
        ensure_ldap_success(result)
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let result = bounded(
            self.operation_timeout,
            "search",
            self.inner
                .search(base_dn, scope.into(), filter, attributes.to_vec()),
        )
        .await?;
        let (entries, _) = result.success().map_err(map_ldap_error)?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| LdapEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn add(&mut self, dn: &str, attributes: &Attributes) -> Result<()> {
        let attrs = attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| {
                (
                    name.as_str(),
                    values.iter().map(String::as_str).collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();
        let result = bounded(self.operation_timeout, "add", self.inner.add(dn, attrs)).await?;
        ensure_ldap_success(result)
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mods = wire_modifications(modifications);

        let result =
            bounded(self.operation_timeout, "modify", self.inner.modify(dn, mods)).await?;
        ensure_ldap_success(result)
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        let result = bounded(self.operation_timeout, "delete", self.inner.delete(dn)).await?;
        ensure_ldap_success(result)
    }

    async fn set_password(&mut self, dn: &str, password: &str) -> Result<()> {
        let exop = PasswordModify {
            user_id: Some(dn),
            old_pass: None,
            new_pass: Some(password),
        };
        let result = bounded(
            self.operation_timeout,
            "password modify",
            self.inner.extended(exop),
        )
        .await?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn unbind(&mut self) -> Result<()> {
        bounded(self.operation_timeout, "unbind", self.inner.unbind()).await
    }
}

async fn bounded<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = ldap3::result::Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("directory {operation} timed out")))?
        .map_err(map_ldap_error)
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

/// Translates modifications into ldap3 changes that keep the requested value order.
///
/// A single `Mod` carries its values as a set, so ordered writes are spread over one `Mod` per
/// value: the first value replaces (or adds), every further value is appended by an `Add`.
/// The server applies the changes of one request in sequence.
fn wire_modifications(modifications: &[DirectoryModification]) -> Vec<Mod<&str>> {
    let mut mods = Vec::new();
    for modification in modifications {
        match modification {
            DirectoryModification::Add { attribute, values } => {
                mods.extend(
                    values
                        .iter()
                        .map(|value| Mod::Add(attribute.as_str(), HashSet::from([value.as_str()]))),
                );
            }
            DirectoryModification::Delete { attribute, values } => mods.push(Mod::Delete(
                attribute.as_str(),
                values.iter().map(String::as_str).collect(),
            )),
            DirectoryModification::Replace { attribute, values } => {
                let mut values = values.iter().map(String::as_str);
                match values.next() {
                    Some(first) => {
                        mods.push(Mod::Replace(attribute.as_str(), HashSet::from([first])));
                        mods.extend(
                            values.map(|value| Mod::Add(attribute.as_str(), HashSet::from([value]))),
                        );
                    }
                    None => mods.push(Mod::Replace(attribute.as_str(), HashSet::new())),
                }
            }
        }
    }
    mods
}

fn map_ldap_error(err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => Error::from_result_code(result.rc, result.text),
        LdapError::Io { source } => Error::Unreachable(source.to_string()),
        other => Error::Directory {
            code: 0,
            message: other.to_string(),
        },
    }
}

fn ensure_ldap_success(result: ldap3::LdapResult) -> Result<()> {
    if result.rc == 0 {
        Ok(())
    } else {
        Err(Error::from_result_code(result.rc, result.text))
    }
}

/// Escapes a value for use inside a search filter.
pub(crate) fn escape_filter_value(value: &str) -> String {
    value
        .chars()
        .flat_map(|ch| match ch {
            '*' => "\\2a".chars().collect::<Vec<_>>(),
            '(' => "\\28".chars().collect(),
            ')' => "\\29".chars().collect(),
            '\\' => "\\5c".chars().collect(),
            '\0' => "\\00".chars().collect(),
            _ => vec![ch],
        })
        .collect::<String>()
}
