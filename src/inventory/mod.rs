//! Inventory snapshot for Meshbook.
//!
//! The inventory maps each device group (a "mesh" on the server) to the ordered
//! list of devices it contains. It is built once per run from the session and is
//! read-only afterwards. Group lookups are case-insensitive.

mod device;

pub use device::Device;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::session::RemoteDevice;

/// Mapping from group name to the devices in that group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    groups: IndexMap<String, Vec<Device>>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from a device listing, grouping by group name in
    /// first-seen order
    pub fn from_remote(devices: impl IntoIterator<Item = RemoteDevice>) -> Self {
        let mut inventory = Self::new();
        for remote in devices {
            let group = remote.group.clone();
            inventory.add_device(group, remote.into_device());
        }
        inventory
    }

    /// Append a device to a group, creating the group if needed
    pub fn add_device(&mut self, group: impl Into<String>, device: Device) {
        self.groups.entry(group.into()).or_default().push(device);
    }

    /// Builder-style variant of [`Inventory::add_device`]
    pub fn with_device(mut self, group: impl Into<String>, device: Device) -> Self {
        self.add_device(group, device);
        self
    }

    /// Look up a group by name, ignoring case.
    ///
    /// When two groups differ only by case, the one inserted last wins.
    pub fn group(&self, name: &str) -> Option<&[Device]> {
        let needle = name.to_lowercase();
        self.groups
            .iter()
            .rev()
            .find(|(group, _)| group.to_lowercase() == needle)
            .map(|(_, devices)| devices.as_slice())
    }

    /// Iterate over all groups in insertion order
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[Device])> {
        self.groups
            .iter()
            .map(|(name, devices)| (name.as_str(), devices.as_slice()))
    }

    /// Iterate over every device in every group
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.groups.values().flatten()
    }

    /// All devices whose name matches `name`, ignoring case, across all groups
    pub fn find_by_name(&self, name: &str) -> Vec<&Device> {
        self.devices().filter(|d| d.name_matches(name)).collect()
    }

    /// Resolve a device id to its human-readable name
    pub fn device_name(&self, id: &str) -> Option<&str> {
        self.devices()
            .find(|d| d.id == id)
            .map(|d| d.name.as_str())
    }

    /// Resolve a device id to its name, or an empty string if unknown
    pub fn device_name_or_empty(&self, id: &str) -> String {
        self.device_name(id).unwrap_or_default().to_string()
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Number of devices across all groups
    pub fn device_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// True when the inventory has no devices
    pub fn is_empty(&self) -> bool {
        self.device_count() == 0
    }
}
