//! Multi-valued attribute diffing.
//!
//! Every entity mutation computes the change between the attribute values it last read and the
//! values it wants, and sends only that change to the directory. An attribute missing on either
//! side counts as an empty list.

use std::collections::{BTreeSet, HashMap, HashSet};

/// Attribute name to values, as stored on a directory entry.
pub type Attributes = HashMap<String, Vec<String>>;

/// A single per-attribute change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete (empty removes the attribute).
        values: Vec<String>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values.
        values: Vec<String>,
    },
}

impl DirectoryModification {
    /// Name of the attribute this change touches.
    #[must_use]
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

/// The changes one modify request carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyOperation {
    modifications: Vec<DirectoryModification>,
}

impl ModifyOperation {
    /// Returns true when there is nothing to write.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// The individual changes, in attribute-name order.
    #[must_use]
    pub fn modifications(&self) -> &[DirectoryModification] {
        &self.modifications
    }

    /// Applies the changes to `attributes`, returning the resulting state.
    #[must_use]
    pub fn apply(&self, attributes: &Attributes) -> Attributes {
        let mut result = attributes.clone();
        apply_modifications(&mut result, &self.modifications);
        result
    }
}

/// Applies `modifications` in order, the way a directory server would.
///
/// Adding a value that is already present is a no-op; attributes left without values are
/// removed.
pub fn apply_modifications(attributes: &mut Attributes, modifications: &[DirectoryModification]) {
    for modification in modifications {
        match modification {
            DirectoryModification::Add { attribute, values } => {
                let current = attributes.entry(attribute.clone()).or_default();
                for value in values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
            }
            DirectoryModification::Delete { attribute, values } if values.is_empty() => {
                attributes.remove(attribute);
            }
            DirectoryModification::Delete { attribute, values } => {
                if let Some(current) = attributes.get_mut(attribute) {
                    current.retain(|value| !values.contains(value));
                }
            }
            DirectoryModification::Replace { attribute, values } => {
                attributes.insert(attribute.clone(), values.clone());
            }
        }
        let attribute = modification.attribute();
        if attributes.get(attribute).is_some_and(Vec::is_empty) {
            attributes.remove(attribute);
        }
    }
}

/// Computes modify operations between two attribute states.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeDiff {
    order_sensitive: bool,
}

impl AttributeDiff {
    /// Order-insensitive diff: values are compared as sets.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            order_sensitive: false,
        }
    }

    /// Makes the resulting value order significant: whenever an incremental change would not
    /// leave the values in the requested order, the attribute is written as a `Replace`.
    #[must_use]
    pub const fn order_sensitive(mut self, order_sensitive: bool) -> Self {
        self.order_sensitive = order_sensitive;
        self
    }

    /// Computes the changes that turn `old` into `new`.
    ///
    /// Per attribute: only additions become an `Add`, only removals a `Delete`, both at once a
    /// `Replace`. An attribute going to no values is deleted outright.
    #[must_use]
    pub fn compute(&self, old: &Attributes, new: &Attributes) -> ModifyOperation {
        let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        let empty = Vec::new();

        let modifications = names
            .into_iter()
            .filter_map(|name| {
                let before = old.get(name).unwrap_or(&empty);
                let after = new.get(name).unwrap_or(&empty);
                self.attribute_change(name, before, after)
            })
            .collect();

        ModifyOperation { modifications }
    }

    fn attribute_change(
        &self,
        attribute: &str,
        before: &[String],
        after: &[String],
    ) -> Option<DirectoryModification> {
        let attribute = attribute.to_string();
        match (before.is_empty(), after.is_empty()) {
            (true, true) => None,
            (true, false) => Some(DirectoryModification::Add {
                attribute,
                values: dedup(after),
            }),
            (false, true) => Some(DirectoryModification::Delete {
                attribute,
                values: Vec::new(),
            }),
            (false, false) => {
                let before_set: HashSet<&String> = before.iter().collect();
                let after_set: HashSet<&String> = after.iter().collect();
                let added: Vec<String> = dedup(after)
                    .into_iter()
                    .filter(|value| !before_set.contains(value))
                    .collect();
                let (kept, removed): (Vec<String>, Vec<String>) = dedup(before)
                    .into_iter()
                    .partition(|value| after_set.contains(value));

                // Servers append added values, so an incremental change yields kept ++ added.
                let target = dedup(after);
                let reordered = self.order_sensitive
                    && kept.iter().chain(&added).ne(target.iter());

                match (added.is_empty(), removed.is_empty()) {
                    _ if reordered => Some(DirectoryModification::Replace {
                        attribute,
                        values: target,
                    }),
                    (true, true) => None,
                    (false, true) => Some(DirectoryModification::Add {
                        attribute,
                        values: added,
                    }),
                    (true, false) => Some(DirectoryModification::Delete {
                        attribute,
                        values: removed,
                    }),
                    (false, false) => Some(DirectoryModification::Replace {
                        attribute,
                        values: dedup(after),
                    }),
                }
            }
        }
    }
}

/// Order-insensitive diff between two attribute states.
#[must_use]
pub fn diff(old: &Attributes, new: &Attributes) -> ModifyOperation {
    AttributeDiff::new().compute(old, new)
}

fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .iter()
        .filter(|value| seen.insert(value.as_str()))
        .cloned()
        .collect()
}
