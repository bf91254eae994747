//! User entries.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::slice;
use tracing::{info, warn};
use ucp_core::{generate_password, Error, DEFAULT_PASSWORD_LENGTH};

use crate::{
    client::{escape_filter_value, LdapEntry, SearchScope},
    config::MailUpdateStrategy,
    diff::{AttributeDiff, Attributes},
    directory::Directory,
    dn::DistinguishedName,
    group::Group,
    identity::Identity,
    policy, Result,
};

/// Attributes read for every user entry.
pub const USER_ATTRIBUTES: &[&str] = &[
    "uid",
    "cn",
    "sn",
    "givenName",
    "employeeNumber",
    "mail",
    "email",
    "otherMailbox",
];

/// Stored surname meaning "no surname"; `sn` is mandatory for `inetOrgPerson`.
pub(crate) const UNSET_SURNAME: &str = "-";

/// Extra value written during the widen phase of a mail update.
const REMOVAL_MARKER: &str = "_TOBEREMOVED";

const VERIFIED_MAIL_ATTRIBUTE: &str = "email";
const UNVERIFIED_MAIL_ATTRIBUTE: &str = "otherMailbox";

/// A mail address and whether the user has proven they own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMail {
    /// Whether ownership was confirmed.
    pub verified: bool,
    /// The address.
    pub mail: String,
}

impl ExternalMail {
    /// A confirmed address.
    #[must_use]
    pub fn verified(mail: impl Into<String>) -> Self {
        Self {
            verified: true,
            mail: mail.into(),
        }
    }

    /// An address waiting for confirmation.
    #[must_use]
    pub fn unverified(mail: impl Into<String>) -> Self {
        Self {
            verified: false,
            mail: mail.into(),
        }
    }
}

/// Login-check payload: who the user is and which groups they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    /// Login name.
    pub name: String,
    /// Display name.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Names of the groups the user is a direct member of.
    pub groups: Vec<String>,
}

/// Snapshot of a user entry.
///
/// Mutations lock the entry, re-read it, write the difference and refresh this snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// Distinguished name of the entry.
    pub dn: DistinguishedName,
    /// Login name (`uid`).
    pub name: String,
    /// Preferred display name (`cn`).
    pub display_name: String,
    /// Given name, empty when unset.
    pub given_name: String,
    /// Surname, empty when unset.
    pub surname: String,
    /// Common name.
    pub common_name: String,
    /// Address from the `mail` attribute.
    pub mail: Option<String>,
    /// Address mail should be sent to: `mail`, or else the first verified external address.
    pub primary_mail: Option<String>,
    /// External addresses; unverified from `otherMailbox`, verified from `email`.
    pub external_mails: Vec<ExternalMail>,
    /// External membership number (`employeeNumber`).
    pub member_id: Option<String>,
    #[serde(skip)]
    attributes: Attributes,
}

impl User {
    /// Parses a search result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when `uid`, `cn` or `sn` is missing and
    /// [`Error::InvalidRequest`] for an unparsable dn.
    pub fn from_entry(entry: &LdapEntry) -> Result<Self> {
        let dn = DistinguishedName::parse(&entry.dn)?;
        Self::from_attributes(dn, entry.select(USER_ATTRIBUTES))
    }

    pub(crate) fn from_attributes(dn: DistinguishedName, attributes: Attributes) -> Result<Self> {
        let required = |name: &str| {
            first(&attributes, name)
                .map(str::to_string)
                .ok_or_else(|| Error::Malformed(format!("user `{dn}` has no `{name}`")))
        };
        let name = required("uid")?;
        let common_name = required("cn")?;
        let surname = required("sn")?;
        let surname = if surname == UNSET_SURNAME {
            String::new()
        } else {
            surname
        };

        // A marker left behind by an interrupted widen phase is not an address.
        let mails = |name| {
            values(&attributes, name)
                .iter()
                .filter(|value| value.as_str() != REMOVAL_MARKER)
        };
        let unverified = mails(UNVERIFIED_MAIL_ATTRIBUTE).map(ExternalMail::unverified);
        let verified = mails(VERIFIED_MAIL_ATTRIBUTE).map(ExternalMail::verified);
        let external_mails = unverified.chain(verified).collect();

        let mail = first(&attributes, "mail").map(str::to_string);
        let primary_mail = mail
            .clone()
            .or_else(|| mails(VERIFIED_MAIL_ATTRIBUTE).next().cloned());

        Ok(Self {
            display_name: common_name.clone(),
            given_name: first(&attributes, "givenName").unwrap_or_default().to_string(),
            member_id: first(&attributes, "employeeNumber").map(str::to_string),
            dn,
            name,
            surname,
            common_name,
            mail,
            primary_mail,
            external_mails,
            attributes,
        })
    }

    /// Checks `password` by binding as this user.
    ///
    /// # Errors
    ///
    /// Rejected credentials yield `Ok(false)`; connectivity failures are propagated.
    pub async fn check_password(&self, directory: &Directory, password: &str) -> Result<bool> {
        directory.client().rebind(&self.dn, password).await
    }

    /// Sets a new password. Not a diff: the password is write-only.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_password(&self, directory: &Directory, password: &str) -> Result<()> {
        directory.client().set_password(&self.dn, password).await?;
        info!(user = %self.name, "password changed");
        Ok(())
    }

    /// Replaces the password with a random one and returns it for delivery.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn reset_password(&self, directory: &Directory) -> Result<SecretString> {
        let password = generate_password(DEFAULT_PASSWORD_LENGTH);
        self.set_password(directory, password.expose_secret()).await?;
        Ok(password)
    }

    /// Updates given name, surname and common name. An empty surname is stored as `-`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty common name, otherwise propagates
    /// directory failures.
    pub async fn set_names(
        &mut self,
        directory: &Directory,
        given_name: &str,
        surname: &str,
        common_name: &str,
    ) -> Result<()> {
        if common_name.trim().is_empty() {
            return Err(Error::InvalidRequest(format!(
                "user `{}` needs a non-empty common name",
                self.dn
            )));
        }
        let _guard = directory.lock_entry(&self.dn).await?;
        let current = directory.get_user_by_dn(&self.dn).await?;

        let mut desired = Attributes::new();
        desired.insert("givenName".to_string(), non_empty(given_name));
        desired.insert(
            "sn".to_string(),
            vec![if surname.is_empty() {
                UNSET_SURNAME.to_string()
            } else {
                surname.to_string()
            }],
        );
        desired.insert("cn".to_string(), non_empty(common_name));

        let updated = directory
            .write_attributes(&self.dn, &current.attributes, &desired, AttributeDiff::new())
            .await?;
        *self = Self::from_attributes(current.dn, updated)?;
        Ok(())
    }

    /// Every address of the user, the `mail` address last and always verified.
    #[must_use]
    pub fn get_mails(&self, only_verified: bool) -> Vec<ExternalMail> {
        self.external_mails
            .iter()
            .cloned()
            .chain(self.mail.iter().cloned().map(ExternalMail::verified))
            .filter(|mail| mail.verified || !only_verified)
            .collect()
    }

    /// Every address a notification (e.g. a password reset) should go to.
    #[must_use]
    pub fn notification_mails(&self) -> Vec<String> {
        self.get_mails(false)
            .into_iter()
            .map(|mail| mail.mail)
            .collect()
    }

    /// Replaces the external addresses with `external_mails`, keeping their order.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_external_mails(
        &mut self,
        directory: &Directory,
        external_mails: Vec<ExternalMail>,
    ) -> Result<()> {
        self.update_external_mails(directory, |_| external_mails)
            .await
    }

    /// Moves `mail` to the front of the external addresses.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_primary_mail(&mut self, directory: &Directory, mail: &str) -> Result<()> {
        self.update_external_mails(directory, |current| {
            let (mut first, rest): (Vec<_>, Vec<_>) =
                current.iter().cloned().partition(|entry| entry.mail == mail);
            first.extend(rest);
            first
        })
        .await
    }

    /// Marks `mail` as verified.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn verify_external_mail(&mut self, directory: &Directory, mail: &str) -> Result<()> {
        self.update_external_mails(directory, |current| {
            current
                .iter()
                .cloned()
                .map(|mut entry| {
                    if entry.mail == mail {
                        entry.verified = true;
                    }
                    entry
                })
                .collect()
        })
        .await
    }

    /// Appends `mail` as unverified unless it is already known.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn add_external_mail(&mut self, directory: &Directory, mail: &str) -> Result<()> {
        self.update_external_mails(directory, |current| {
            let mut mails = current.to_vec();
            if !mails.iter().any(|entry| entry.mail == mail) {
                mails.push(ExternalMail::unverified(mail));
            }
            mails
        })
        .await
    }

    /// Removes `mail` from the external addresses.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn del_external_mail(&mut self, directory: &Directory, mail: &str) -> Result<()> {
        self.update_external_mails(directory, |current| {
            current
                .iter()
                .filter(|entry| entry.mail != mail)
                .cloned()
                .collect()
        })
        .await
    }

    async fn update_external_mails<F>(&mut self, directory: &Directory, change: F) -> Result<()>
    where
        F: FnOnce(&[ExternalMail]) -> Vec<ExternalMail>,
    {
        let _guard = directory.lock_entry(&self.dn).await?;
        let current = directory.get_user_by_dn(&self.dn).await?;
        let external_mails = change(&current.external_mails);
        let desired = mail_attributes(&external_mails);

        let snapshot = match directory.config().mail_update_strategy() {
            MailUpdateStrategy::Atomic => current.attributes.clone(),
            MailUpdateStrategy::WidenThenNarrow => {
                let widened = widen(&current.attributes, &desired);
                directory
                    .write_attributes(&self.dn, &current.attributes, &widened, AttributeDiff::new())
                    .await?
            }
        };

        let updated = directory
            .write_attributes(
                &self.dn,
                &snapshot,
                &desired,
                AttributeDiff::new().order_sensitive(true),
            )
            .await?;

        let mut refreshed = Self::from_attributes(current.dn, updated)?;
        refreshed.external_mails = external_mails;
        *self = refreshed;
        Ok(())
    }

    /// Lower-cased dns of the groups listing this user in `uniqueMember`.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn get_group_dns(&self, directory: &Directory) -> Result<Vec<DistinguishedName>> {
        let filter = format!("(uniqueMember={})", escape_filter_value(self.dn.as_str()));
        let entries = directory
            .client()
            .search(
                directory.config().group_base_dn(),
                SearchScope::OneLevel,
                &filter,
                &["cn"],
            )
            .await?;

        Ok(entries
            .iter()
            .filter_map(|entry| match DistinguishedName::parse(entry.dn.to_lowercase()) {
                Ok(dn) => Some(dn),
                Err(err) => {
                    warn!("Failed to parse group DN `{}`: {err}", entry.dn);
                    None
                }
            })
            .collect())
    }

    /// Loads the groups this user is a direct member of.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn get_groups(&self, directory: &Directory) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        for dn in self.get_group_dns(directory).await? {
            groups.push(directory.get_group_by_dn(&dn).await?);
        }
        Ok(groups)
    }

    /// Returns true when `identity` designates this user: everybody, the user's own dn, or a
    /// group the user is a member of.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn match_dn(&self, directory: &Directory, identity: &Identity) -> Result<bool> {
        policy::matches_any(directory, slice::from_ref(identity), Some(self)).await
    }

    /// Builds the login-check payload.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn summary(&self, directory: &Directory) -> Result<UserSummary> {
        let groups = self
            .get_groups(directory)
            .await?
            .into_iter()
            .map(|group| group.name)
            .collect();
        Ok(UserSummary {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            groups,
        })
    }
}

fn values<'a>(attributes: &'a Attributes, name: &str) -> &'a [String] {
    attributes.get(name).map(Vec::as_slice).unwrap_or_default()
}

fn first<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    values(attributes, name).first().map(String::as_str)
}

fn non_empty(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    }
}

fn mail_attributes(external_mails: &[ExternalMail]) -> Attributes {
    let collect = |verified: bool| {
        external_mails
            .iter()
            .filter(|entry| entry.verified == verified)
            .map(|entry| entry.mail.clone())
            .collect::<Vec<_>>()
    };
    let mut attributes = Attributes::new();
    attributes.insert(UNVERIFIED_MAIL_ATTRIBUTE.to_string(), collect(false));
    attributes.insert(VERIFIED_MAIL_ATTRIBUTE.to_string(), collect(true));
    attributes
}

/// Old ∪ new plus the removal marker, per mail attribute.
fn widen(current: &Attributes, desired: &Attributes) -> Attributes {
    desired
        .iter()
        .map(|(name, wanted)| {
            let mut values = values(current, name).to_vec();
            for value in wanted.iter().map(String::as_str).chain([REMOVAL_MARKER]) {
                if !values.iter().any(|existing| existing == value) {
                    values.push(value.to_string());
                }
            }
            (name.clone(), values)
        })
        .collect()
}
