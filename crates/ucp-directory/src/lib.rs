//! Users, groups and access policy over an LDAP directory.
//!
//! [`Directory`] looks entries up and creates them; [`User`] and [`Group`] are snapshots whose
//! mutators write only the attribute values that changed. Group access lists are evaluated with
//! [`matches_any`].

#![deny(missing_docs)]

mod client;
mod config;
mod diff;
mod directory;
mod dn;
mod group;
mod identity;
mod locks;
mod policy;
mod user;

pub use client::{
    DirectoryClient, DirectoryConnector, DirectorySession, LdapConnector, LdapEntry, SearchScope,
};
pub use config::{
    DirectoryConfig, MailUpdateStrategy, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_OPERATION_TIMEOUT_SECS,
};
pub use diff::{
    apply_modifications, diff, AttributeDiff, Attributes, DirectoryModification, ModifyOperation,
};
pub use directory::Directory;
pub use dn::{DistinguishedName, DnError, Rdn};
pub use group::{group_name_for, Group, NewGroup, GROUP_ATTRIBUTES};
pub use identity::{
    is_empty_list_marker, Identity, ANONYMOUS_IDENTIFIER, EMPTY_LIST_IDENTIFIER,
    EVERYBODY_IDENTIFIER,
};
pub use policy::{identity_matches, matches_any};
pub use user::{ExternalMail, User, UserSummary, USER_ATTRIBUTES};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = ucp_core::Result<T>;
