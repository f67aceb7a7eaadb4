//! Device definition for the Meshbook inventory.
//!
//! A `Device` is one managed endpoint as reported by the management server
//! at the moment the inventory snapshot was taken.

use serde::{Deserialize, Serialize};

/// A managed device in the inventory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Opaque, stable identifier assigned by the server
    pub id: String,

    /// Human-readable name (not guaranteed unique)
    pub name: String,

    /// Free-text operating system description
    #[serde(default)]
    pub os_description: String,

    /// Tags attached to the device
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether the device agent was connected when the snapshot was taken
    #[serde(default)]
    pub reachable: bool,
}

impl Device {
    /// Create a new reachable device without tags
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        os_description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            os_description: os_description.into(),
            tags: Vec::new(),
            reachable: true,
        }
    }

    /// Set the tags of this device
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reachability of this device
    pub fn with_reachable(mut self, reachable: bool) -> Self {
        self.reachable = reachable;
        self
    }

    /// Check whether the device carries the given tag (exact match)
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Case-insensitive name comparison
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}
