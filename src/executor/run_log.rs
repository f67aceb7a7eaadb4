//! Structured output of a run.
//!
//! Serializes as one object: a `task_N` entry per task (1-based, in declared
//! order) followed by an `Offline` entry listing the names of resolved but
//! unreachable devices.
//!
//! ```json
//! {
//!   "task_1": {
//!     "task_name": "Ping",
//!     "data": [
//!       { "result": "...", "device_id": "node//1", "device_name": "PC1" }
//!     ]
//!   },
//!   "Offline": ["PC7"]
//! }
//! ```

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Key of the reserved offline entry
pub const OFFLINE_KEY: &str = "Offline";

/// Output of one device for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutput {
    /// Raw text as returned by the device
    Raw(String),
    /// Non-empty output lines
    Lines(Vec<String>),
    /// Non-empty lines split into shell tokens
    Tokens(Vec<Vec<String>>),
}

impl Default for TaskOutput {
    fn default() -> Self {
        Self::Raw(String::new())
    }
}

/// One device's reply to one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    /// Command output
    pub result: TaskOutput,
    /// Device id
    pub device_id: String,
    /// Device name, empty when the id is not in the inventory
    pub device_name: String,
    /// Remaining fields reported by the server
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// All replies to one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    /// Task name after placeholder expansion
    pub task_name: String,
    /// Per-device replies
    pub data: Vec<DeviceResponse>,
}

/// The log of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLog {
    tasks: IndexMap<String, TaskEntry>,
    offline: Vec<String>,
}

impl RunLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used for the task at `ordinal` (1-based)
    pub fn task_label(ordinal: usize) -> String {
        format!("task_{ordinal}")
    }

    /// Append the entry for the next task and return its label
    pub fn push_task(&mut self, entry: TaskEntry) -> String {
        let label = Self::task_label(self.tasks.len() + 1);
        self.tasks.insert(label.clone(), entry);
        label
    }

    /// Record the names of unreachable devices
    pub fn set_offline(&mut self, names: Vec<String>) {
        self.offline = names;
    }

    /// Task entries in declared order
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &TaskEntry)> {
        self.tasks.iter().map(|(label, entry)| (label.as_str(), entry))
    }

    /// Mutable task entries in declared order
    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut TaskEntry> {
        self.tasks.values_mut()
    }

    /// Look up a task entry by label
    pub fn task(&self, label: &str) -> Option<&TaskEntry> {
        self.tasks.get(label)
    }

    /// Names of unreachable devices
    pub fn offline(&self) -> &[String] {
        &self.offline
    }

    /// Number of task entries
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Render as JSON text, optionally indented by four spaces
    pub fn to_json(&self, indent: bool) -> serde_json::Result<String> {
        if !indent {
            return serde_json::to_string(self);
        }
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

impl Serialize for RunLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.tasks.len() + 1))?;
        for (label, entry) in &self.tasks {
            map.serialize_entry(label, entry)?;
        }
        map.serialize_entry(OFFLINE_KEY, &self.offline)?;
        map.end()
    }
}
