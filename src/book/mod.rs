//! Meshbook documents.
//!
//! A meshbook is a YAML document naming the devices to target and the shell
//! tasks to run on them:
//!
//! ```yaml
//! name: Refresh package lists
//! group: Sales
//! target_os: Linux
//! target_tag: prod
//! variables:
//!   - name: manager
//!     value: apt
//! tasks:
//!   - name: Update with {{ manager }}
//!     command: "{{ manager }} update"
//! ```
//!
//! The targeting clause is validated into a [`TargetClause`] here, so the
//! resolver never inspects raw YAML.

pub mod placeholders;

pub use placeholders::expand;

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::{Error, Result};
use crate::targeting::{Target, TargetClause};

/// One shell task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Display name
    pub name: String,
    /// Command text sent to every target
    pub command: String,
}

impl Task {
    /// Create a new task
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// A named value substituted into task names and commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name as used in `{{ name }}`
    pub name: String,
    /// Replacement text
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl Variable {
    /// Create a new variable
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn scalar_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(serde::de::Error::custom(
            "variable values must be strings, numbers or booleans",
        )),
    }
}

/// A parsed meshbook
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meshbook {
    /// Optional display name
    pub name: Option<String>,
    /// Optional description
    pub description: Option<String>,
    /// Which devices or groups to address
    pub target: TargetClause,
    /// OS category (or substring, see `ignore_categorisation`)
    pub target_os: Option<String>,
    /// Required device tag
    pub target_tag: Option<String>,
    /// Match `target_os` as a plain substring of the device OS
    pub ignore_categorisation: bool,
    /// Run commands through PowerShell on Windows agents
    pub powershell: bool,
    /// Placeholder values; `None` when the key is absent
    pub variables: Option<Vec<Variable>>,
    /// Tasks in execution order
    pub tasks: Vec<Task>,
}

impl Meshbook {
    /// Load and parse a meshbook file. Placeholders are not expanded.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_yaml::from_str(&content)
            .map_err(|e| Error::meshbook_parse(path, e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse a meshbook from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value)
    }

    /// Build a meshbook from an already-parsed YAML document
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Mapping(map) = value else {
            return Err(Error::MeshbookStructure(
                "the document root must be a mapping".to_string(),
            ));
        };

        let tasks = match map.get("tasks") {
            Some(tasks) => serde_yaml::from_value::<Vec<Task>>(tasks.clone()).map_err(|e| {
                Error::MeshbookStructure(format!(
                    "'tasks' must be a list of mappings with 'name' and 'command' ({e})"
                ))
            })?,
            None => {
                return Err(Error::MeshbookStructure(
                    "missing required key 'tasks'".to_string(),
                ))
            }
        };

        let variables = match map.get("variables") {
            Some(vars) => Some(serde_yaml::from_value::<Vec<Variable>>(vars.clone()).map_err(
                |e| {
                    Error::MeshbookStructure(format!(
                        "'variables' must be a list of mappings with 'name' and 'value' ({e})"
                    ))
                },
            )?),
            None => None,
        };

        Ok(Self {
            name: optional_string(&map, "name")?,
            description: optional_string(&map, "description")?,
            target: TargetClause::from_mapping(&map),
            target_os: optional_string(&map, "target_os")?,
            target_tag: optional_string(&map, "target_tag")?,
            ignore_categorisation: optional_bool(&map, "ignore_categorisation")?.unwrap_or(false),
            powershell: optional_bool(&map, "powershell")?.unwrap_or(false),
            variables,
            tasks,
        })
    }

    /// Replace the targeting clause with a single group
    pub fn override_group(&mut self, group: impl Into<String>) {
        self.target = TargetClause::Valid(Target::Group(group.into()));
    }

    /// Replace the targeting clause with a single device
    pub fn override_device(&mut self, device: impl Into<String>) {
        self.target = TargetClause::Valid(Target::Device(device.into()));
    }

    /// Builder-style setter for the targeting clause
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = TargetClause::Valid(target);
        self
    }

    /// Builder-style task append
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }
}

fn optional_string(map: &Mapping, key: &str) -> Result<Option<String>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::MeshbookStructure(format!("'{key}' must be a string"))),
    }
}

fn optional_bool(map: &Mapping, key: &str) -> Result<Option<bool>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(Error::MeshbookStructure(format!(
            "'{key}' must be true or false"
        ))),
    }
}
