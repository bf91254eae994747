//! Entry lookup and creation.

use secrecy::{ExposeSecret, SecretString};
use std::slice;
use tracing::{debug, info};
use ucp_core::{generate_password, Error, DEFAULT_PASSWORD_LENGTH};

use crate::{
    client::{escape_filter_value, DirectoryClient, LdapEntry, SearchScope},
    config::DirectoryConfig,
    diff::{AttributeDiff, Attributes},
    dn::DistinguishedName,
    group::{Group, NewGroup, GROUP_ATTRIBUTES},
    locks::{EntryGuard, EntryLocks},
    policy,
    user::{User, UNSET_SURNAME, USER_ATTRIBUTES},
    Result,
};

const ANY_OBJECT: &str = "(objectClass=*)";

/// Users below one base, groups below another.
///
/// Entities returned from here are snapshots; their mutators take the directory again.
pub struct Directory {
    client: DirectoryClient,
    locks: EntryLocks,
}

impl Directory {
    /// Connects lazily to the server in `config`.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_client(DirectoryClient::new(config))
    }

    /// Uses an existing client.
    #[must_use]
    pub fn with_client(client: DirectoryClient) -> Self {
        Self {
            client,
            locks: EntryLocks::default(),
        }
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &DirectoryClient {
        &self.client
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        self.client.config()
    }

    /// `uid=<uid>,<user base>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty uid.
    pub fn user_dn(&self, uid: &str) -> Result<DistinguishedName> {
        if uid.trim().is_empty() {
            return Err(Error::InvalidRequest("user name cannot be empty".to_string()));
        }
        Ok(DistinguishedName::child(
            self.config().user_base_dn(),
            "uid",
            uid,
        ))
    }

    /// `cn=<name>,<group base>`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty name.
    pub fn group_dn(&self, name: &str) -> Result<DistinguishedName> {
        if name.trim().is_empty() {
            return Err(Error::InvalidRequest("group name cannot be empty".to_string()));
        }
        Ok(DistinguishedName::child(
            self.config().group_base_dn(),
            "cn",
            name,
        ))
    }

    /// Loads a user by login name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when there is no such user.
    pub async fn get_user(&self, uid: &str) -> Result<User> {
        let dn = self.user_dn(uid)?;
        self.get_user_by_dn(&dn).await
    }

    /// Loads the single user owning `mail` in `mail`, `email` or `otherMailbox`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] unless exactly one user matches.
    pub async fn get_user_by_mail(&self, mail: &str) -> Result<User> {
        let entries = self.search_mail(mail).await?;
        match entries.as_slice() {
            [entry] => User::from_entry(entry),
            [] => Err(Error::NotFound(format!("no user with mail `{mail}`"))),
            _ => Err(Error::NotFound(format!(
                "mail `{mail}` is used by {} users",
                entries.len()
            ))),
        }
    }

    /// Returns true when any user lists `mail`.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn is_mail_in_use(&self, mail: &str) -> Result<bool> {
        Ok(!self.search_mail(mail).await?.is_empty())
    }

    async fn search_mail(&self, mail: &str) -> Result<Vec<LdapEntry>> {
        let escaped = escape_filter_value(mail);
        let filter = format!("(|(mail={escaped})(email={escaped})(otherMailbox={escaped}))");
        self.client
            .search(
                self.config().user_base_dn(),
                SearchScope::OneLevel,
                &filter,
                USER_ATTRIBUTES,
            )
            .await
    }

    /// Loads the user entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] unless exactly one entry is found.
    pub async fn get_user_by_dn(&self, dn: &DistinguishedName) -> Result<User> {
        let entry = self.read_entry(dn, USER_ATTRIBUTES).await?;
        User::from_entry(&entry)
    }

    /// Creates `uid` with `password`, recording `external_mail` as unverified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] when the uid is taken.
    pub async fn create_user(
        &self,
        uid: &str,
        password: &str,
        external_mail: &str,
    ) -> Result<User> {
        let dn = self.user_dn(uid)?;
        let mut attributes: Attributes = [
            (
                "objectClass",
                vec!["inetOrgPerson".to_string(), "extensibleObject".to_string()],
            ),
            ("uid", vec![uid.to_string()]),
            ("cn", vec![uid.to_string()]),
            ("sn", vec![UNSET_SURNAME.to_string()]),
            ("userPassword", vec![password.to_string()]),
        ]
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .collect();
        if !external_mail.is_empty() {
            attributes.insert("otherMailbox".to_string(), vec![external_mail.to_string()]);
        }

        self.client.add(&dn, &attributes).await?;
        info!(user = uid, "user created");
        self.get_user_by_dn(&dn).await
    }

    /// Creates `uid` with a generated password, returned for delivery.
    ///
    /// # Errors
    ///
    /// As [`Directory::create_user`].
    pub async fn register_user(
        &self,
        uid: &str,
        external_mail: &str,
    ) -> Result<(User, SecretString)> {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH);
        let user = self
            .create_user(uid, password.expose_secret(), external_mail)
            .await?;
        Ok((user, password))
    }

    /// Loads `uid` and checks `password`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] for an unknown user or a wrong password.
    pub async fn authenticate(&self, uid: &str, password: &str) -> Result<User> {
        let rejected = || Error::InvalidCredentials(format!("authentication failed for `{uid}`"));
        let user = match self.get_user(uid).await {
            Ok(user) => user,
            Err(Error::NotFound(_) | Error::InvalidRequest(_)) => return Err(rejected()),
            Err(err) => return Err(err),
        };
        if user.check_password(self, password).await? {
            Ok(user)
        } else {
            debug!(user = uid, "password rejected");
            Err(rejected())
        }
    }

    /// Loads a group by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when there is no such group.
    pub async fn get_group(&self, name: &str) -> Result<Group> {
        let dn = self.group_dn(name)?;
        self.get_group_by_dn(&dn).await
    }

    /// Loads the group entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] unless exactly one entry is found.
    pub async fn get_group_by_dn(&self, dn: &DistinguishedName) -> Result<Group> {
        let entry = self.read_entry(dn, GROUP_ATTRIBUTES).await?;
        Group::from_entry(&entry)
    }

    /// Loads every group.
    ///
    /// # Errors
    ///
    /// Propagates directory failures and malformed entries.
    pub async fn get_groups(&self) -> Result<Vec<Group>> {
        self.client
            .search(
                self.config().group_base_dn(),
                SearchScope::OneLevel,
                "(cn=*)",
                GROUP_ATTRIBUTES,
            )
            .await?
            .iter()
            .map(Group::from_entry)
            .collect()
    }

    /// Creates a group named after the display name of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] when the name is empty and [`Error::AlreadyExists`]
    /// when it is taken.
    pub async fn create_group(&self, group: NewGroup) -> Result<Group> {
        let name = group.name();
        let dn = self.group_dn(&name)?;
        self.client.add(&dn, &group.into_attributes()).await?;
        info!(group = %name, "group created");
        self.get_group_by_dn(&dn).await
    }

    /// Whether `user` may create groups: a member of the configured admin identity.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_create_group(&self, user: Option<&User>) -> Result<bool> {
        match self.config().admin_dn() {
            Some(admin) => policy::matches_any(self, slice::from_ref(admin), user).await,
            None => Ok(false),
        }
    }

    async fn read_entry(
        &self,
        dn: &DistinguishedName,
        attributes: &[&'static str],
    ) -> Result<LdapEntry> {
        let mut entries = self
            .client
            .search(dn, SearchScope::Base, ANY_OBJECT, attributes)
            .await?;
        if entries.len() == 1 {
            Ok(entries.remove(0))
        } else {
            Err(Error::NotFound(format!(
                "expected one entry at `{dn}`, found {}",
                entries.len()
            )))
        }
    }

    pub(crate) async fn lock_entry(&self, dn: &DistinguishedName) -> Result<EntryGuard> {
        self.locks.lock(dn).await
    }

    /// Writes the difference between `snapshot` and `desired` for the attributes named in
    /// `desired`, returning `snapshot` with those attributes replaced.
    pub(crate) async fn write_attributes(
        &self,
        dn: &DistinguishedName,
        snapshot: &Attributes,
        desired: &Attributes,
        diff: AttributeDiff,
    ) -> Result<Attributes> {
        let before: Attributes = desired
            .keys()
            .filter_map(|name| snapshot.get(name).map(|values| (name.clone(), values.clone())))
            .collect();
        let operation = diff.compute(&before, desired);
        if !operation.is_empty() {
            self.client.modify(dn, operation.modifications()).await?;
        }

        let mut updated = snapshot.clone();
        for (name, values) in desired {
            if values.is_empty() {
                updated.remove(name);
            } else {
                updated.insert(name.clone(), values.clone());
            }
        }
        Ok(updated)
    }
}
