//! Group entries and their access lists.

use serde::Serialize;
use tracing::{info, warn};
use ucp_core::Error;

use crate::{
    client::LdapEntry,
    diff::{AttributeDiff, Attributes},
    directory::Directory,
    dn::DistinguishedName,
    identity::{is_empty_list_marker, Identity, EMPTY_LIST_IDENTIFIER},
    policy,
    user::User,
    Result,
};

/// Attributes read for every group entry.
pub const GROUP_ATTRIBUTES: &[&str] = &[
    "cn",
    "displayName",
    "description",
    "mail",
    "uniqueMember",
    "owner",
    "manager",
    "secretary",
];

const MEMBER_ATTRIBUTE: &str = "uniqueMember";
const OWNER_ATTRIBUTE: &str = "owner";
const MANAGER_ATTRIBUTE: &str = "manager";
const SECRETARY_ATTRIBUTE: &str = "secretary";

/// Snapshot of a group entry.
///
/// * `owners` may join the group on their own.
/// * `managers` may edit the group, its members included.
/// * `secretary` may see the member list; unset means anybody may.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    /// Distinguished name of the entry.
    pub dn: DistinguishedName,
    /// Short name (`cn`), the slug of the display name.
    pub name: String,
    /// Human-readable name, falling back to `name`.
    pub display_name: String,
    /// Free-text description, empty when unset.
    pub description: String,
    /// Group mail address.
    pub mail: Option<String>,
    /// Direct members; the empty-list placeholder is never listed.
    pub members: Vec<DistinguishedName>,
    /// Identities allowed to join.
    pub owners: Vec<Identity>,
    /// Identities allowed to edit.
    pub managers: Vec<Identity>,
    /// Identities allowed to see the members.
    pub secretary: Vec<Identity>,
    #[serde(skip)]
    attributes: Attributes,
}

impl Group {
    /// Parses a search result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when `cn` or `uniqueMember` is missing.
    pub fn from_entry(entry: &LdapEntry) -> Result<Self> {
        let dn = DistinguishedName::parse(&entry.dn)?;
        Self::from_attributes(dn, entry.select(GROUP_ATTRIBUTES))
    }

    pub(crate) fn from_attributes(dn: DistinguishedName, attributes: Attributes) -> Result<Self> {
        let name = first(&attributes, "cn")
            .map(str::to_string)
            .ok_or_else(|| Error::Malformed(format!("group `{dn}` has no `cn`")))?;
        let raw_members = attributes.get(MEMBER_ATTRIBUTE).ok_or_else(|| {
            Error::Malformed(format!("group `{dn}` has no `{MEMBER_ATTRIBUTE}`"))
        })?;

        let members = raw_members
            .iter()
            .filter(|value| !is_empty_list_marker(value))
            .filter_map(|value| match DistinguishedName::parse(value) {
                Ok(member) => Some(member),
                Err(err) => {
                    warn!(group = %dn, "skipping invalid member `{value}`: {err}");
                    None
                }
            })
            .collect();

        let secretary = match attributes.get(SECRETARY_ATTRIBUTE) {
            Some(values) if !values.is_empty() => identities(&dn, values),
            _ => vec![Identity::Anonymous, Identity::Everybody],
        };

        Ok(Self {
            display_name: first(&attributes, "displayName").unwrap_or(&name).to_string(),
            description: first(&attributes, "description").unwrap_or_default().to_string(),
            mail: first(&attributes, "mail").map(str::to_string),
            owners: identities(&dn, values(&attributes, OWNER_ATTRIBUTE)),
            managers: identities(&dn, values(&attributes, MANAGER_ATTRIBUTE)),
            members,
            secretary,
            dn,
            name,
            attributes,
        })
    }

    /// Stored `uniqueMember` values, placeholder included.
    #[must_use]
    pub fn raw_members(&self) -> &[String] {
        values(&self.attributes, MEMBER_ATTRIBUTE)
    }

    /// Returns true when `user` is a direct member.
    #[must_use]
    pub fn is_member(&self, user: &User) -> bool {
        self.members.contains(&user.dn)
    }

    /// Loads every member entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when a listed member no longer exists.
    pub async fn get_members(&self, directory: &Directory) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(self.members.len());
        for dn in &self.members {
            users.push(directory.get_user_by_dn(dn).await?);
        }
        Ok(users)
    }

    /// Replaces the member list. An empty list is stored as the placeholder entry.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_members(
        &mut self,
        directory: &Directory,
        members: Vec<DistinguishedName>,
    ) -> Result<()> {
        self.rewrite(directory, |_| {
            attributes([(MEMBER_ATTRIBUTE, member_values(&members))])
        })
        .await
    }

    /// Adds `user` as a member and drops them from the owners in the same request.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn add_member(&mut self, directory: &Directory, user: &User) -> Result<()> {
        self.rewrite(directory, |current| {
            let mut members = current.members.clone();
            if !members.contains(&user.dn) {
                members.push(user.dn.clone());
            }
            let owners: Vec<Identity> = current
                .owners
                .iter()
                .filter(|owner| !owner.is_dn(&user.dn))
                .cloned()
                .collect();
            attributes([
                (MEMBER_ATTRIBUTE, member_values(&members)),
                (OWNER_ATTRIBUTE, identity_values(&owners)),
            ])
        })
        .await
    }

    /// Removes `user` from the members.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn del_member(&mut self, directory: &Directory, user: &User) -> Result<()> {
        self.rewrite(directory, |current| {
            let members: Vec<DistinguishedName> = current
                .members
                .iter()
                .filter(|member| **member != user.dn)
                .cloned()
                .collect();
            attributes([(MEMBER_ATTRIBUTE, member_values(&members))])
        })
        .await
    }

    /// Replaces the owners.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_owners(&mut self, directory: &Directory, owners: Vec<Identity>) -> Result<()> {
        self.rewrite(directory, |_| {
            attributes([(OWNER_ATTRIBUTE, identity_values(&owners))])
        })
        .await
    }

    /// Replaces the managers.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_managers(
        &mut self,
        directory: &Directory,
        managers: Vec<Identity>,
    ) -> Result<()> {
        self.rewrite(directory, |_| {
            attributes([(MANAGER_ATTRIBUTE, identity_values(&managers))])
        })
        .await
    }

    /// Adds `manager` unless already listed.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn add_manager(&mut self, directory: &Directory, manager: Identity) -> Result<()> {
        self.rewrite(directory, |current| {
            let mut managers = current.managers.clone();
            if !managers.contains(&manager) {
                managers.push(manager);
            }
            attributes([(MANAGER_ATTRIBUTE, identity_values(&managers))])
        })
        .await
    }

    /// Removes `manager`.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn del_manager(&mut self, directory: &Directory, manager: &Identity) -> Result<()> {
        self.rewrite(directory, |current| {
            let managers: Vec<Identity> = current
                .managers
                .iter()
                .filter(|existing| *existing != manager)
                .cloned()
                .collect();
            attributes([(MANAGER_ATTRIBUTE, identity_values(&managers))])
        })
        .await
    }

    /// Replaces the identities allowed to see the members. An empty list restores the default.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn set_secretary(
        &mut self,
        directory: &Directory,
        secretary: Vec<Identity>,
    ) -> Result<()> {
        self.rewrite(directory, |_| {
            attributes([(SECRETARY_ATTRIBUTE, identity_values(&secretary))])
        })
        .await
    }

    /// Deletes the group entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the group is already gone.
    pub async fn delete(self, directory: &Directory) -> Result<()> {
        let _guard = directory.lock_entry(&self.dn).await?;
        directory.client().delete(&self.dn).await?;
        info!(group = %self.name, "group deleted");
        Ok(())
    }

    /// Whether `user` may list the members.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_see(&self, directory: &Directory, user: Option<&User>) -> Result<bool> {
        policy::matches_any(directory, &self.secretary, user).await
    }

    /// Whether `user` may edit the group.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_edit(&self, directory: &Directory, user: Option<&User>) -> Result<bool> {
        policy::matches_any(directory, &self.managers, user).await
    }

    /// Whether `user` may join without a manager.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_join(&self, directory: &Directory, user: Option<&User>) -> Result<bool> {
        policy::matches_any(directory, &self.owners, user).await
    }

    /// Whether `actor` may add `target`: managers may add anyone, owners only themselves.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_add_member(
        &self,
        directory: &Directory,
        actor: Option<&User>,
        target: &User,
    ) -> Result<bool> {
        if self.may_edit(directory, actor).await? {
            return Ok(true);
        }
        match actor {
            Some(actor) if actor.dn == target.dn => self.may_join(directory, Some(actor)).await,
            _ => Ok(false),
        }
    }

    /// Whether `actor` may remove `target`: managers may remove anyone, members themselves.
    ///
    /// # Errors
    ///
    /// Propagates directory failures from the group lookup.
    pub async fn may_remove_member(
        &self,
        directory: &Directory,
        actor: Option<&User>,
        target: &User,
    ) -> Result<bool> {
        if self.may_edit(directory, actor).await? {
            return Ok(true);
        }
        Ok(actor.is_some_and(|actor| actor.dn == target.dn && self.is_member(target)))
    }

    /// Stored list values that parsing skipped. Rewriting the group would drop them.
    fn unreadable_values(&self) -> Vec<&str> {
        let members = values(&self.attributes, MEMBER_ATTRIBUTE)
            .iter()
            .filter(|value| {
                !is_empty_list_marker(value) && DistinguishedName::parse(value.as_str()).is_err()
            });
        let identities = [OWNER_ATTRIBUTE, MANAGER_ATTRIBUTE, SECRETARY_ATTRIBUTE]
            .into_iter()
            .flat_map(|name| values(&self.attributes, name))
            .filter(|value| Identity::parse(value.as_str()).is_err());
        members.chain(identities).map(String::as_str).collect()
    }

    async fn rewrite<F>(&mut self, directory: &Directory, change: F) -> Result<()>
    where
        F: FnOnce(&Group) -> Attributes,
    {
        let _guard = directory.lock_entry(&self.dn).await?;
        let current = directory.get_group_by_dn(&self.dn).await?;
        let unreadable = current.unreadable_values();
        if !unreadable.is_empty() {
            return Err(Error::Malformed(format!(
                "group `{}` holds unreadable values {unreadable:?}; refusing to rewrite it",
                current.dn
            )));
        }
        let desired = change(&current);
        let updated = directory
            .write_attributes(&self.dn, &current.attributes, &desired, AttributeDiff::new())
            .await?;
        *self = Self::from_attributes(current.dn, updated)?;
        Ok(())
    }
}

/// Input for [`Directory::create_group`].
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub(crate) display_name: String,
    pub(crate) description: String,
    pub(crate) members: Vec<DistinguishedName>,
    pub(crate) managers: Vec<Identity>,
    pub(crate) owners: Vec<Identity>,
}

impl NewGroup {
    /// Starts a group named after `display_name`.
    #[must_use]
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            description: String::new(),
            members: Vec::new(),
            managers: Vec::new(),
            owners: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Appends initial members.
    #[must_use]
    pub fn members<I>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = DistinguishedName>,
    {
        self.members.extend(members);
        self
    }

    /// Appends managers. Without any, the initial members manage the group.
    #[must_use]
    pub fn managers<I>(mut self, managers: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        self.managers.extend(managers);
        self
    }

    /// Appends owners.
    #[must_use]
    pub fn owners<I>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = Identity>,
    {
        self.owners.extend(owners);
        self
    }

    /// Short name derived from the display name.
    #[must_use]
    pub fn name(&self) -> String {
        group_name_for(&self.display_name)
    }

    pub(crate) fn into_attributes(self) -> Attributes {
        let managers = if self.managers.is_empty() {
            self.members.iter().cloned().map(Identity::Dn).collect()
        } else {
            self.managers
        };
        let mut attributes = attributes([
            (
                "objectClass",
                vec!["groupOfUniqueNames".to_string(), "extensibleObject".to_string()],
            ),
            ("cn", vec![group_name_for(&self.display_name)]),
            ("displayName", vec![self.display_name]),
            (MEMBER_ATTRIBUTE, member_values(&self.members)),
            (MANAGER_ATTRIBUTE, identity_values(&managers)),
            (OWNER_ATTRIBUTE, identity_values(&self.owners)),
        ]);
        if !self.description.is_empty() {
            attributes.insert("description".to_string(), vec![self.description]);
        }
        attributes.retain(|_, values| !values.is_empty());
        attributes
    }
}

/// Turns a display name into a group name: lower case, `/` as `-`, spaces as `_`.
#[must_use]
pub fn group_name_for(display_name: &str) -> String {
    display_name
        .trim()
        .to_lowercase()
        .replace('/', "-")
        .replace(' ', "_")
}

fn values<'a>(attributes: &'a Attributes, name: &str) -> &'a [String] {
    attributes.get(name).map(Vec::as_slice).unwrap_or_default()
}

fn first<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    values(attributes, name).first().map(String::as_str)
}

fn identities(group: &DistinguishedName, values: &[String]) -> Vec<Identity> {
    values
        .iter()
        .filter_map(|value| match Identity::parse(value) {
            Ok(identity) => Some(identity),
            Err(err) => {
                warn!(group = %group, "skipping invalid identity `{value}`: {err}");
                None
            }
        })
        .collect()
}

fn attributes<const N: usize>(pairs: [(&str, Vec<String>); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(name, values)| (name.to_string(), values))
        .collect()
}

fn member_values(members: &[DistinguishedName]) -> Vec<String> {
    if members.is_empty() {
        vec![EMPTY_LIST_IDENTIFIER.to_string()]
    } else {
        members.iter().map(|dn| dn.as_str().to_string()).collect()
    }
}

fn identity_values(identities: &[Identity]) -> Vec<String> {
    identities.iter().map(|id| id.as_str().to_string()).collect()
}
