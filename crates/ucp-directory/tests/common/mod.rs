//! In-memory directory server shared by the integration tests.
//!
//! Behaves like a strict LDAP server for the operations the crate uses: adding an existing
//! value or deleting a missing one is rejected, as is a group left without `uniqueMember`.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use ucp_core::{BindCredentials, Error, Result};
use ucp_directory::{
    apply_modifications, Attributes, Directory, DirectoryClient, DirectoryConfig,
    DirectoryConnector, DirectoryModification, DirectorySession, DistinguishedName, Identity,
    LdapEntry, MailUpdateStrategy, SearchScope,
};

const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
const NO_SUCH_ATTRIBUTE: u32 = 16;
const OBJECT_CLASS_VIOLATION: u32 = 65;

pub const USER_BASE: &str = "ou=users,dc=example,dc=org";
pub const GROUP_BASE: &str = "ou=groups,dc=example,dc=org";
pub const ADMINS_GROUP: &str = "cn=admins,ou=groups,dc=example,dc=org";

#[derive(Debug, Deserialize)]
struct Seed {
    admin: SeedAdmin,
    entries: Vec<SeedEntry>,
}

#[derive(Debug, Deserialize)]
struct SeedAdmin {
    bind_dn: String,
    bind_password: String,
}

#[derive(Debug, Deserialize)]
struct SeedEntry {
    dn: String,
    attributes: Attributes,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    dn: String,
    attributes: Attributes,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, StoredEntry>,
    writes: Vec<(String, Vec<DirectoryModification>)>,
    open_sessions: usize,
    unreachable: bool,
    failing_modify: Option<usize>,
}

/// Shared handle on the in-memory server; clones see the same data.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
    admin_dn: String,
    admin_password: String,
}

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

fn key(dn: &str) -> String {
    DistinguishedName::parse(dn)
        .map(|dn| dn.normalized())
        .unwrap_or_else(|_| dn.to_ascii_lowercase())
}

impl MemoryDirectory {
    /// Loads `tests/fixtures/seed_directory.json`.
    pub fn seeded() -> Self {
        let path = fixtures_dir().join("seed_directory.json");
        let json = fs::read_to_string(&path).unwrap_or_else(|e| {
            panic!("Failed to read seed fixture at {}: {}", path.display(), e)
        });
        let seed: Seed = serde_json::from_str(&json)
            .unwrap_or_else(|e| panic!("Failed to parse seed fixture: {e}"));

        let entries = seed
            .entries
            .into_iter()
            .map(|entry| {
                (
                    key(&entry.dn),
                    StoredEntry {
                        dn: entry.dn,
                        attributes: entry.attributes,
                    },
                )
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(State {
                entries,
                ..State::default()
            })),
            admin_dn: seed.admin.bind_dn,
            admin_password: seed.admin.bind_password,
        }
    }

    /// Configuration pointing at this server.
    pub fn config(&self) -> DirectoryConfig {
        DirectoryConfig::new(
            "ldap://directory.test",
            BindCredentials::new(self.admin_dn.clone(), self.admin_password.clone()),
            DistinguishedName::parse(USER_BASE).unwrap(),
            DistinguishedName::parse(GROUP_BASE).unwrap(),
        )
        .unwrap()
        .with_admin_dn(Identity::parse(ADMINS_GROUP).unwrap())
    }

    /// A [`Directory`] talking to this server with `strategy` for mail updates.
    pub fn directory_with(&self, strategy: MailUpdateStrategy) -> Directory {
        let config = self.config().with_mail_update_strategy(strategy);
        Directory::with_client(DirectoryClient::with_connector(
            config,
            Box::new(self.clone()),
        ))
    }

    /// A [`Directory`] with the default configuration.
    pub fn directory(&self) -> Directory {
        self.directory_with(MailUpdateStrategy::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Stored values of `attribute` on `dn`, empty when absent.
    pub fn values(&self, dn: &str, attribute: &str) -> Vec<String> {
        self.lock()
            .entries
            .get(&key(dn))
            .and_then(|entry| entry.attributes.get(attribute).cloned())
            .unwrap_or_default()
    }

    /// Overwrites `attribute` on `dn` behind the client's back, as another tool would.
    pub fn put_values(&self, dn: &str, attribute: &str, values: &[&str]) {
        let mut state = self.lock();
        let entry = state.entries.get_mut(&key(dn)).unwrap();
        entry.attributes.insert(
            attribute.to_string(),
            values.iter().map(|v| (*v).to_string()).collect(),
        );
    }

    /// Returns true when an entry exists at `dn`.
    pub fn contains(&self, dn: &str) -> bool {
        self.lock().entries.contains_key(&key(dn))
    }

    /// Every modify request sent for `dn`, oldest first.
    pub fn writes(&self, dn: &str) -> Vec<Vec<DirectoryModification>> {
        let wanted = key(dn);
        self.lock()
            .writes
            .iter()
            .filter(|(dn, _)| *dn == wanted)
            .map(|(_, modifications)| modifications.clone())
            .collect()
    }

    /// Sessions connected but not yet unbound.
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    /// Makes every following connection attempt fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Rejects the `n`-th modify request from now on (1 = the next one).
    pub fn fail_modify(&self, n: usize) {
        self.lock().failing_modify = Some(n);
    }

    fn bind(&self, dn: &str, password: &str) -> Result<()> {
        if key(dn) == key(&self.admin_dn) && password == self.admin_password {
            return Ok(());
        }
        let state = self.lock();
        let stored = state
            .entries
            .get(&key(dn))
            .and_then(|entry| entry.attributes.get("userPassword"))
            .and_then(|values| values.first());
        match stored {
            Some(stored) if stored == password => Ok(()),
            _ => Err(Error::InvalidCredentials(format!("bind rejected for {dn}"))),
        }
    }

    fn search(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let filter = Filter::parse(filter)?;
        let state = self.lock();
        let base_key = key(base);
        if !state.entries.contains_key(&base_key) && scope == SearchScope::Base {
            return Err(Error::NotFound(format!("no such object: {base}")));
        }
        let base_dn = DistinguishedName::parse(base)?;

        Ok(state
            .entries
            .iter()
            .filter(|(entry_key, entry)| match scope {
                SearchScope::Base => **entry_key == base_key,
                SearchScope::OneLevel => DistinguishedName::parse(&entry.dn)
                    .is_ok_and(|dn| dn.is_child_of(&base_dn)),
            })
            .filter(|(_, entry)| filter.matches(&entry.attributes))
            .map(|(_, entry)| LdapEntry {
                dn: entry.dn.clone(),
                attributes: entry
                    .attributes
                    .iter()
                    .filter(|(name, _)| {
                        attributes.is_empty()
                            || attributes.iter().any(|wanted| wanted.eq_ignore_ascii_case(name))
                    })
                    .map(|(name, values)| (name.clone(), values.clone()))
                    .collect(),
            })
            .collect())
    }

    fn add(&self, dn: &str, attributes: &Attributes) -> Result<()> {
        let mut state = self.lock();
        let entry_key = key(dn);
        if state.entries.contains_key(&entry_key) {
            return Err(Error::AlreadyExists(format!("entry exists: {dn}")));
        }
        let attributes: Attributes = attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();
        check_schema(dn, &attributes)?;
        state.entries.insert(
            entry_key,
            StoredEntry {
                dn: dn.to_string(),
                attributes,
            },
        );
        Ok(())
    }

    fn modify(&self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        let mut state = self.lock();
        if let Some(remaining) = state.failing_modify {
            if remaining <= 1 {
                state.failing_modify = None;
                return Err(Error::Unreachable("connection reset".to_string()));
            }
            state.failing_modify = Some(remaining - 1);
        }

        let entry_key = key(dn);
        let entry = state
            .entries
            .get(&entry_key)
            .ok_or_else(|| Error::NotFound(format!("no such object: {dn}")))?;

        for modification in modifications {
            let current = entry.attributes.get(modification.attribute());
            match modification {
                DirectoryModification::Add { attribute, values } => {
                    if values
                        .iter()
                        .any(|value| current.is_some_and(|current| current.contains(value)))
                    {
                        return Err(Error::from_result_code(
                            ATTRIBUTE_OR_VALUE_EXISTS,
                            format!("{attribute}: value exists"),
                        ));
                    }
                }
                DirectoryModification::Delete { attribute, values } => {
                    let missing = match current {
                        None => true,
                        Some(current) => values.iter().any(|value| !current.contains(value)),
                    };
                    if missing {
                        return Err(Error::from_result_code(
                            NO_SUCH_ATTRIBUTE,
                            format!("{attribute}: no such value"),
                        ));
                    }
                }
                DirectoryModification::Replace { .. } => {}
            }
        }

        let mut attributes = entry.attributes.clone();
        apply_modifications(&mut attributes, modifications);
        check_schema(dn, &attributes)?;

        if let Some(entry) = state.entries.get_mut(&entry_key) {
            entry.attributes = attributes;
        }
        state.writes.push((entry_key, modifications.to_vec()));
        Ok(())
    }

    fn delete(&self, dn: &str) -> Result<()> {
        self.lock()
            .entries
            .remove(&key(dn))
            .map(drop)
            .ok_or_else(|| Error::NotFound(format!("no such object: {dn}")))
    }

    fn set_password(&self, dn: &str, password: &str) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(&key(dn))
            .ok_or_else(|| Error::NotFound(format!("no such object: {dn}")))?;
        entry
            .attributes
            .insert("userPassword".to_string(), vec![password.to_string()]);
        Ok(())
    }
}

fn check_schema(dn: &str, attributes: &Attributes) -> Result<()> {
    let is_group = attributes
        .get("objectClass")
        .is_some_and(|classes| classes.iter().any(|class| class == "groupOfUniqueNames"));
    if is_group && !attributes.contains_key("uniqueMember") {
        return Err(Error::from_result_code(
            OBJECT_CLASS_VIOLATION,
            format!("{dn}: uniqueMember required"),
        ));
    }
    Ok(())
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(&self) -> Result<Box<dyn DirectorySession>> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(Error::Unreachable("ldap://directory.test".to_string()));
        }
        state.open_sessions += 1;
        Ok(Box::new(MemorySession {
            server: self.clone(),
        }))
    }
}

struct MemorySession {
    server: MemoryDirectory,
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.server.bind(dn, password)
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        self.server.search(base_dn, scope, filter, attributes)
    }

    async fn add(&mut self, dn: &str, attributes: &Attributes) -> Result<()> {
        self.server.add(dn, attributes)
    }

    async fn modify(&mut self, dn: &str, modifications: &[DirectoryModification]) -> Result<()> {
        self.server.modify(dn, modifications)
    }

    async fn delete(&mut self, dn: &str) -> Result<()> {
        self.server.delete(dn)
    }

    async fn set_password(&mut self, dn: &str, password: &str) -> Result<()> {
        self.server.set_password(dn, password)
    }

    async fn unbind(&mut self) -> Result<()> {
        let mut state = self.server.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
        Ok(())
    }
}

/// The subset of RFC 4515 filters the crate sends.
#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Present(String),
    Equals(String, String),
}

impl Filter {
    fn parse(input: &str) -> Result<Self> {
        match Self::parse_one(input.trim()) {
            Some((filter, "")) => Ok(filter),
            _ => Err(Error::from_result_code(87, format!("bad filter: {input}"))),
        }
    }

    fn parse_one(input: &str) -> Option<(Self, &str)> {
        let body = input.strip_prefix('(')?;
        if let Some(rest) = body.strip_prefix('|') {
            let (items, rest) = Self::parse_list(rest)?;
            return Some((Self::Or(items), rest));
        }
        if let Some(rest) = body.strip_prefix('&') {
            let (items, rest) = Self::parse_list(rest)?;
            return Some((Self::And(items), rest));
        }
        let end = body.find(')')?;
        let (attribute, value) = body[..end].split_once('=')?;
        let filter = if value == "*" {
            Self::Present(attribute.to_string())
        } else {
            Self::Equals(attribute.to_string(), unescape(value)?)
        };
        Some((filter, &body[end + 1..]))
    }

    fn parse_list(mut input: &str) -> Option<(Vec<Self>, &str)> {
        let mut items = Vec::new();
        while !input.starts_with(')') {
            let (item, rest) = Self::parse_one(input)?;
            items.push(item);
            input = rest;
        }
        Some((items, &input[1..]))
    }

    fn matches(&self, attributes: &Attributes) -> bool {
        let lookup = |wanted: &str| {
            attributes
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
                .map(|(_, values)| values.as_slice())
                .unwrap_or_default()
        };
        match self {
            Self::And(items) => items.iter().all(|item| item.matches(attributes)),
            Self::Or(items) => items.iter().any(|item| item.matches(attributes)),
            Self::Present(attribute) => !lookup(attribute).is_empty(),
            Self::Equals(attribute, value) => lookup(attribute)
                .iter()
                .any(|stored| stored.eq_ignore_ascii_case(value)),
        }
    }
}

fn unescape(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'\\' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Loads a user that the seed guarantees to exist.
pub async fn user(directory: &Directory, uid: &str) -> ucp_directory::User {
    directory
        .get_user(uid)
        .await
        .unwrap_or_else(|e| panic!("seeded user {uid} missing: {e}"))
}

/// Loads a group that the seed guarantees to exist.
pub async fn group(directory: &Directory, name: &str) -> ucp_directory::Group {
    directory
        .get_group(name)
        .await
        .unwrap_or_else(|e| panic!("seeded group {name} missing: {e}"))
}
