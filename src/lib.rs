//! # Meshbook - Declarative Task Books for MeshCentral
//!
//! Meshbook runs ordered shell tasks against devices managed by a MeshCentral
//! server. A meshbook names its targets (a device, a list of devices, a group,
//! a list of groups or every group), optionally narrows them by OS category
//! and device tag, and lists the tasks to run.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────┐   ┌──────────────────┐   ┌─────────────────────┐
//! │   Meshbook    │   │    Inventory     │   │    OS categories    │
//! │ (YAML + vars) │   │ (server listing) │   │   (nested JSON)     │
//! └───────┬───────┘   └────────┬─────────┘   └──────────┬──────────┘
//!         └────────────────────┼────────────────────────┘
//!                              ▼
//!                ┌──────────────────────────┐
//!                │     Target resolution    │
//!                │ (clause, tag, OS, reach) │
//!                └────────────┬─────────────┘
//!                             ▼
//!                ┌──────────────────────────┐
//!                │         Executor         │──── Session (control channel)
//!                │  (one batch per task)    │
//!                └────────────┬─────────────┘
//!                             ▼
//!                ┌──────────────────────────┐
//!                │   Run log + normalizer   │
//!                └──────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use meshbook::prelude::*;
//!
//! let session = MeshCentralSession::connect(&config.account).await?;
//! let inventory = Inventory::from_remote(session.list_devices(timeout).await?);
//! let categories = OsCategories::from_file("os_categories.json")?;
//! let meshbook = Meshbook::from_file("update.yaml")?;
//!
//! let outcome = Executor::default()
//!     .run_meshbook(&session, meshbook, &inventory, &categories, &cancel)
//!     .await?;
//! if let Some(log) = outcome.into_log() {
//!     println!("{}", normalize(false, log).to_json(true)?);
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, Result};

    // Documents
    pub use crate::book::{Meshbook, Task, Variable};
    pub use crate::categories::OsCategories;

    // Inventory and targeting
    pub use crate::inventory::{Device, Inventory};
    pub use crate::targeting::{resolve_targets, Resolution, Target, TargetClause, TargetWarning};

    // Execution
    pub use crate::executor::{
        ExecutionCallback, Executor, ExecutorConfig, RunLog, RunOutcome, TaskOutput,
    };
    pub use crate::normalize::normalize;

    // Session
    pub use crate::session::meshcentral::{Credentials, MeshCentralSession};
    pub use crate::session::{CommandOptions, Session};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Configuration loading and environment overrides.
pub mod config;

// ============================================================================
// Documents
// ============================================================================

/// Meshbook parsing and placeholder expansion.
pub mod book;

/// Nested OS category documents.
pub mod categories;

// ============================================================================
// Targeting
// ============================================================================

/// Devices grouped as reported by the server.
pub mod inventory;

/// Turning a targeting clause into device ids.
pub mod targeting;

// ============================================================================
// Execution
// ============================================================================

/// Sequential task execution and the run log.
pub mod executor;

/// Reshaping of raw command output into lines or tokens.
pub mod normalize;

/// Connection to the management server.
pub mod session;

/// Persisted run logs.
pub mod history;

pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
