//! Device filtering by tag, operating system and reachability.
//!
//! Checks run per device, in input order:
//!
//! 1. tag: a device without the requested tag is dropped entirely
//! 2. OS policy: a device whose OS does not match is dropped entirely
//! 3. reachability: matching devices land in `offline` or `valid`
//!
//! A device failing step 1 or 2 therefore never appears in either list.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::book::Meshbook;
use crate::categories::OsCategories;
use crate::inventory::Device;

/// How a device's OS description is matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsPolicy {
    /// No OS restriction
    Any,
    /// The description must be an exact member of the set. An empty set
    /// matches nothing.
    Allowed(BTreeSet<String>),
    /// The description must contain the string (case-sensitive)
    Substring(String),
}

impl OsPolicy {
    /// Check an OS description against this policy
    pub fn matches(&self, os_description: &str) -> bool {
        match self {
            OsPolicy::Any => true,
            OsPolicy::Allowed(allowed) => allowed.contains(os_description),
            OsPolicy::Substring(needle) => os_description.contains(needle.as_str()),
        }
    }
}

/// Targeting criteria shared by every clause of a meshbook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    /// OS category name, or substring when categorisation is ignored
    pub target_os: Option<String>,
    /// Required device tag
    pub target_tag: Option<String>,
    /// Match `target_os` as a substring instead of through the categories
    pub ignore_categorisation: bool,
}

impl TargetFilter {
    /// Take the filter settings from a meshbook
    pub fn from_meshbook(meshbook: &Meshbook) -> Self {
        Self {
            target_os: meshbook.target_os.clone(),
            target_tag: meshbook.target_tag.clone(),
            ignore_categorisation: meshbook.ignore_categorisation,
        }
    }

    /// The requested OS, with an empty string treated as absent
    pub fn os(&self) -> Option<&str> {
        self.target_os.as_deref().filter(|os| !os.is_empty())
    }

    /// The requested tag, with an empty string treated as absent
    pub fn tag(&self) -> Option<&str> {
        self.target_tag.as_deref().filter(|tag| !tag.is_empty())
    }

    /// Build the OS policy for this filter
    pub fn os_policy(&self, categories: &OsCategories) -> OsPolicy {
        match self.os() {
            None => OsPolicy::Any,
            Some(os) if self.ignore_categorisation => OsPolicy::Substring(os.to_string()),
            Some(os) => OsPolicy::Allowed(categories.resolve(os)),
        }
    }

    /// Partition `devices` into reachable and unreachable matches
    pub fn apply<'a, I>(&self, devices: I, categories: &OsCategories) -> Partition
    where
        I: IntoIterator<Item = &'a Device>,
    {
        let policy = self.os_policy(categories);
        partition(devices, &policy, self.tag())
    }
}

/// Result of filtering one batch of devices
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Ids of matching, reachable devices
    pub valid: Vec<String>,
    /// Ids of matching, unreachable devices
    pub offline: Vec<String>,
}

impl Partition {
    /// True when no device matched at all
    pub fn is_empty(&self) -> bool {
        self.valid.is_empty() && self.offline.is_empty()
    }
}

/// Filter a batch of devices against explicit criteria.
///
/// `target_os = None` disables the OS check. With categorisation enabled an
/// unknown category matches nothing.
pub fn filter_devices<'a, I>(
    devices: I,
    categories: &OsCategories,
    target_os: Option<&str>,
    ignore_categorisation: bool,
    target_tag: Option<&str>,
) -> Partition
where
    I: IntoIterator<Item = &'a Device>,
{
    let filter = TargetFilter {
        target_os: target_os.map(str::to_string),
        target_tag: target_tag.map(str::to_string),
        ignore_categorisation,
    };
    filter.apply(devices, categories)
}

fn partition<'a, I>(devices: I, policy: &OsPolicy, tag: Option<&str>) -> Partition
where
    I: IntoIterator<Item = &'a Device>,
{
    let mut result = Partition::default();

    for device in devices {
        if let Some(tag) = tag {
            if !device.has_tag(tag) {
                continue;
            }
        }

        if !policy.matches(&device.os_description) {
            continue;
        }

        if device.reachable {
            result.valid.push(device.id.clone());
        } else {
            result.offline.push(device.id.clone());
        }
    }

    result
}
