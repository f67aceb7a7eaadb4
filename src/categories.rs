//! Operating system categorisation.
//!
//! The category document maps a category name either to a list of literal OS
//! descriptions or to a nested mapping of sub-categories:
//!
//! ```json
//! {
//!   "Windows": ["Windows 10 Pro", "Windows 11 Pro"],
//!   "Linux": {
//!     "Debian": ["Debian GNU/Linux 12 (bookworm)"],
//!     "Ubuntu": ["Ubuntu 22.04.4 LTS", "Ubuntu 24.04 LTS"]
//!   }
//! }
//! ```
//!
//! Resolving `"Linux"` yields every description below it; resolving `"Ubuntu"`
//! finds the nested entry one level down. An unknown category resolves to the
//! empty set, which callers treat as "nothing allowed".

use std::collections::BTreeSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A node in the category tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryNode {
    /// Literal OS descriptions
    Leaf(Vec<String>),
    /// Named sub-categories
    Nested(IndexMap<String, CategoryNode>),
}

/// The OS category document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsCategories {
    roots: IndexMap<String, CategoryNode>,
}

impl OsCategories {
    /// Wrap an already-built category tree
    pub fn new(roots: IndexMap<String, CategoryNode>) -> Self {
        Self { roots }
    }

    /// Parse a category document from JSON text
    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        if !value.is_object() {
            return Err(Error::CategoriesStructure(
                "the document root must be an object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| {
            Error::CategoriesStructure(format!(
                "every category must be a list of strings or an object of sub-categories ({e})"
            ))
        })
    }

    /// Load a category document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::categories_load(path, e.to_string()))?;
        Self::from_json_str(&content)
    }

    /// Top-level category entries
    pub fn roots(&self) -> &IndexMap<String, CategoryNode> {
        &self.roots
    }

    /// True when `category` names a top-level entry or an entry directly
    /// below one
    pub fn contains(&self, category: &str) -> bool {
        self.scope_of(category).is_some()
    }

    /// Expand a category into the flat set of OS descriptions it covers.
    ///
    /// Top-level names are tried first, then names nested one level down
    /// (first matching parent in document order). Unknown names yield the
    /// empty set.
    pub fn resolve(&self, category: &str) -> BTreeSet<String> {
        match self.scope_of(category) {
            Some(scope) => resolve(category, scope),
            None => {
                debug!("OS category '{}' not found", category);
                BTreeSet::new()
            }
        }
    }

    fn scope_of(&self, category: &str) -> Option<&IndexMap<String, CategoryNode>> {
        if self.roots.contains_key(category) {
            return Some(&self.roots);
        }

        self.roots.values().find_map(|node| match node {
            CategoryNode::Nested(children) if children.contains_key(category) => Some(children),
            _ => None,
        })
    }
}

/// Expand `category` relative to the given mapping.
///
/// A leaf returns its descriptions; a nested mapping returns the union of all
/// of its sub-categories, recursively. A name missing from `map` yields the
/// empty set.
pub fn resolve(category: &str, map: &IndexMap<String, CategoryNode>) -> BTreeSet<String> {
    match map.get(category) {
        Some(node) => expand(node),
        None => BTreeSet::new(),
    }
}

fn expand(node: &CategoryNode) -> BTreeSet<String> {
    match node {
        CategoryNode::Leaf(descriptions) => descriptions.iter().cloned().collect(),
        CategoryNode::Nested(children) => children.values().flat_map(expand).collect(),
    }
}
