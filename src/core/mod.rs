//! # Core Module
//!
//! The data controller and everything a request passes through on its
//! way in and out: options, configuration, the error taxonomy and the
//! response projector.
//!
//! ## Design Principles
//!
//! - Permission checks before any relation or store access
//! - Relation operators never reach the store translator
//! - Master callers bypass class permissions and row-level ACLs
//! - No shared mutable state across requests besides the schema cache

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod projector;

pub use config::ControllerConfig;
pub use context::QueryOptions;
pub use controller::{DataController, FindResult};
pub use error::{CoreError, CoreResult};
pub use projector::ResponseProjector;
