//! Target resolution.
//!
//! Turns the targeting clause of a meshbook into the concrete list of device
//! ids a run will address. The clause is parsed once at the document boundary
//! into a [`TargetClause`]; resolution then looks up the named devices or
//! groups in the [`Inventory`] and passes each batch through the
//! [`TargetFilter`].
//!
//! Problems with the clause (wrong shape, unknown names) never fail the run.
//! They are collected as [`TargetWarning`]s and contribute zero targets.

pub mod filter;

pub use filter::{filter_devices, OsPolicy, Partition, TargetFilter};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::book::Meshbook;
use crate::categories::OsCategories;
use crate::inventory::Inventory;

/// A well-formed targeting clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// `device: <name>`
    Device(String),
    /// `devices: [<name>, ...]`
    Devices(Vec<String>),
    /// `group: <name>`
    Group(String),
    /// `groups: [<name>, ...]`
    Groups(Vec<String>),
    /// `groups: all`
    AllGroups,
}

impl Target {
    /// The meshbook key this clause came from
    pub fn key(&self) -> &'static str {
        match self {
            Target::Device(_) => "device",
            Target::Devices(_) => "devices",
            Target::Group(_) => "group",
            Target::Groups(_) | Target::AllGroups => "groups",
        }
    }

    /// Display form of the targeted names
    pub fn describe(&self) -> String {
        match self {
            Target::Device(name) | Target::Group(name) => name.clone(),
            Target::Devices(names) | Target::Groups(names) => format!("{names:?}"),
            Target::AllGroups => "all".to_string(),
        }
    }
}

/// The targeting clause as found in the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetClause {
    /// A usable clause
    Valid(Target),
    /// A targeting key was present but its value has the wrong shape
    Invalid(TargetWarning),
    /// No targeting key at all
    Missing,
}

impl Default for TargetClause {
    fn default() -> Self {
        Self::Missing
    }
}

impl TargetClause {
    /// Parse the targeting clause from a meshbook mapping.
    ///
    /// Keys are checked in the order `group`, `groups`, `device`, `devices`;
    /// the first one present decides.
    pub fn from_mapping(map: &Mapping) -> Self {
        if let Some(value) = map.get("group") {
            return match value {
                Value::String(name) => Self::Valid(Target::Group(name.clone())),
                Value::Sequence(_) => Self::Invalid(TargetWarning::PluralKeyExpected {
                    key: "group",
                    plural: "groups",
                }),
                _ => Self::Invalid(TargetWarning::UnknownType { key: "group" }),
            };
        }

        if let Some(value) = map.get("groups") {
            return match value {
                Value::Sequence(items) => match string_list(items) {
                    Some(names) => Self::Valid(Target::Groups(names)),
                    None => Self::Invalid(TargetWarning::UnknownType { key: "groups" }),
                },
                Value::String(name) if name.eq_ignore_ascii_case("all") => {
                    Self::Valid(Target::AllGroups)
                }
                Value::String(_) => Self::Invalid(TargetWarning::SingularKeyExpected {
                    key: "groups",
                    singular: "group",
                }),
                _ => Self::Invalid(TargetWarning::UnknownType { key: "groups" }),
            };
        }

        if let Some(value) = map.get("device") {
            return match value {
                Value::String(name) => Self::Valid(Target::Device(name.clone())),
                Value::Sequence(_) => Self::Invalid(TargetWarning::PluralKeyExpected {
                    key: "device",
                    plural: "devices",
                }),
                _ => Self::Invalid(TargetWarning::UnknownType { key: "device" }),
            };
        }

        if let Some(value) = map.get("devices") {
            return match value {
                Value::Sequence(items) => match string_list(items) {
                    Some(names) => Self::Valid(Target::Devices(names)),
                    None => Self::Invalid(TargetWarning::UnknownType { key: "devices" }),
                },
                Value::String(_) => Self::Invalid(TargetWarning::SingularKeyExpected {
                    key: "devices",
                    singular: "device",
                }),
                _ => Self::Invalid(TargetWarning::UnknownType { key: "devices" }),
            };
        }

        Self::Missing
    }

    /// The valid target, if any
    pub fn target(&self) -> Option<&Target> {
        match self {
            Self::Valid(target) => Some(target),
            _ => None,
        }
    }
}

fn string_list(items: &[Value]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Advisory problem found while resolving targets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetWarning {
    /// A list was given under a singular key
    #[error("Please use {plural} (notice the plural with 'S') for multiple {plural}.")]
    PluralKeyExpected {
        /// Key that was used
        key: &'static str,
        /// Key that should have been used
        plural: &'static str,
    },

    /// A single string was given under a plural key
    #[error("The '{key}' key is being used, but only one string is given. Did you mean '{singular}'?")]
    SingularKeyExpected {
        /// Key that was used
        key: &'static str,
        /// Key that should have been used
        singular: &'static str,
    },

    /// The value under a targeting key has an unsupported type
    #[error("The '{key}' key is being used, but an unknown data type was found, please check your values.")]
    UnknownType {
        /// Key that was used
        key: &'static str,
    },

    /// No targeting key present
    #[error("No 'device', 'devices', 'group' or 'groups' key found in the meshbook.")]
    MissingTarget,

    /// Named group does not exist in the inventory
    #[error("Targeted group '{0}' not found on the server.")]
    GroupNotFound(String),

    /// Named device does not exist in the inventory
    #[error("Targeted device '{0}' not found on the server.")]
    DeviceNotFound(String),

    /// OS category missing from the categorisation document
    #[error("OS category '{0}' not found in the categorisation file, no device can match.")]
    UnknownCategory(String),
}

/// Outcome of target resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Reachable, matching device ids in resolution order (not deduplicated)
    pub target_list: Vec<String>,
    /// Unreachable, matching device ids in resolution order
    pub offline_list: Vec<String>,
    /// Advisory problems met along the way
    #[serde(skip)]
    pub warnings: Vec<TargetWarning>,
}

impl Resolution {
    /// True when there is nothing to run against
    pub fn has_no_targets(&self) -> bool {
        self.target_list.is_empty()
    }

    fn absorb(&mut self, partition: Partition) {
        self.target_list.extend(partition.valid);
        self.offline_list.extend(partition.offline);
    }

    fn warn(&mut self, warning: TargetWarning) {
        debug!(%warning, "Targeting warning");
        self.warnings.push(warning);
    }
}

/// Resolve the meshbook's targeting clause against the inventory
#[instrument(skip_all)]
pub fn resolve_targets(
    meshbook: &Meshbook,
    inventory: &Inventory,
    categories: &OsCategories,
) -> Resolution {
    let filter = TargetFilter::from_meshbook(meshbook);
    resolve_clause(&meshbook.target, &filter, inventory, categories)
}

/// Resolve an explicit clause with explicit filter settings
pub fn resolve_clause(
    clause: &TargetClause,
    filter: &TargetFilter,
    inventory: &Inventory,
    categories: &OsCategories,
) -> Resolution {
    let mut resolution = Resolution::default();

    if let Some(os) = filter.os() {
        if !filter.ignore_categorisation && !categories.contains(os) {
            resolution.warn(TargetWarning::UnknownCategory(os.to_string()));
        }
    }

    match clause {
        TargetClause::Valid(target) => {
            resolve_target(target, filter, inventory, categories, &mut resolution);
        }
        TargetClause::Invalid(warning) => resolution.warn(warning.clone()),
        TargetClause::Missing => resolution.warn(TargetWarning::MissingTarget),
    }

    debug!(
        targets = resolution.target_list.len(),
        offline = resolution.offline_list.len(),
        "Target resolution finished"
    );
    resolution
}

fn resolve_target(
    target: &Target,
    filter: &TargetFilter,
    inventory: &Inventory,
    categories: &OsCategories,
    resolution: &mut Resolution,
) {
    match target {
        Target::Device(name) => resolve_device(name, filter, inventory, categories, resolution),
        Target::Devices(names) => {
            for name in names {
                resolve_device(name, filter, inventory, categories, resolution);
            }
        }
        Target::Group(name) => resolve_group(name, filter, inventory, categories, resolution),
        Target::Groups(names) => {
            for name in names {
                resolve_group(name, filter, inventory, categories, resolution);
            }
        }
        Target::AllGroups => {
            for (_, devices) in inventory.groups() {
                resolution.absorb(filter.apply(devices, categories));
            }
        }
    }
}

fn resolve_device(
    name: &str,
    filter: &TargetFilter,
    inventory: &Inventory,
    categories: &OsCategories,
    resolution: &mut Resolution,
) {
    let matches = inventory.find_by_name(name);
    if matches.is_empty() {
        resolution.warn(TargetWarning::DeviceNotFound(name.to_string()));
        return;
    }
    resolution.absorb(filter.apply(matches, categories));
}

fn resolve_group(
    name: &str,
    filter: &TargetFilter,
    inventory: &Inventory,
    categories: &OsCategories,
    resolution: &mut Resolution,
) {
    match inventory.group(name) {
        Some(devices) => resolution.absorb(filter.apply(devices, categories)),
        None => resolution.warn(TargetWarning::GroupNotFound(name.to_string())),
    }
}
