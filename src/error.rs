//! Error types for Meshbook.
//!
//! This module defines the error types used throughout Meshbook. Recoverable
//! targeting problems are not errors; they are reported as
//! [`TargetWarning`](crate::targeting::TargetWarning) values instead.

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionError;

/// Result type alias for Meshbook operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Meshbook.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Meshbook Errors
    // ========================================================================
    /// Error parsing a meshbook file.
    #[error("Failed to parse meshbook '{path}': {message}")]
    MeshbookParse {
        /// Path to the meshbook file
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The meshbook document is missing a required key or has the wrong shape.
    #[error("Invalid meshbook structure: {0}")]
    MeshbookStructure(String),

    // ========================================================================
    // Category Errors
    // ========================================================================
    /// The OS category document could not be loaded.
    #[error("Failed to load OS categories from '{path}': {message}")]
    CategoriesLoad {
        /// Path to the category document
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// The OS category document has an unsupported shape.
    #[error("Invalid OS category document: {0}")]
    CategoriesStructure(String),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Transport or protocol failure talking to the management server.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// The run was interrupted. Commands already dispatched may still be
    /// running on the remote devices.
    #[error("Run aborted, remote tasks may still be running")]
    Aborted,

    // ========================================================================
    // History Errors
    // ========================================================================
    /// A history file could not be written or removed.
    #[error("History error in '{path}': {message}")]
    History {
        /// Path involved in the failing operation
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing configuration key.
    #[error("Missing configuration value '{key}' in section '{section}'")]
    MissingConfig {
        /// Section name
        section: String,
        /// Key name
        key: String,
    },

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a new meshbook parse error.
    pub fn meshbook_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::MeshbookParse {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new category load error.
    pub fn categories_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CategoriesLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new history error.
    pub fn history(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::History {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error was caused by an interrupt rather than a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) | Error::MissingConfig { .. } => 2,
            Error::Session(_) => 3,
            Error::MeshbookParse { .. }
            | Error::MeshbookStructure(_)
            | Error::YamlParse(_)
            | Error::CategoriesLoad { .. }
            | Error::CategoriesStructure(_) => 4,
            Error::Aborted => 130,
            _ => 1,
        }
    }
}
