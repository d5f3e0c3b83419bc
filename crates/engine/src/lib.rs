//! ngxtweaks Engine - Module Lookup and Export Resolution
//!
//! This crate handles:
//! - Finding modules already resident in the host process
//! - Resolving exported entry points by name
//! - Resolving a named list of exports all-or-nothing
//!
//! # Architecture
//!
//! Lookups go through the [`ModuleSource`] trait so callers can be exercised
//! against an in-memory module table. [`SystemModules`] is the implementation
//! backed by the operating system loader. Nothing here loads a module; only
//! modules the host already loaded are ever seen.

pub mod error;
pub mod loader;
pub mod system;

pub use error::ExportError;
pub use loader::{resolve_all, ExportResolver, ModuleHandle, ModuleSource};
pub use system::SystemModules;
