//! ngxtweaks SDK - NGX Type Definitions
//!
//! This crate contains the parts of the NGX runtime ABI that the interception
//! layer depends on. None of it is a published contract: every name, value and
//! slot order here was observed from shipping builds of the runtime.
//! It has no dependencies and compiles quickly, allowing parallel compilation
//! of dependent crates.
//!
//! # Modules
//!
//! - [`entry_points`] - Exported entry points of the loader module
//! - [`functions`] - Function pointer signatures of every intercepted call
//! - [`layout`] - Built-in parameter dispatch-table slot order
//! - [`modules`] - Module and import names
//! - [`params`] - Parameter-name keys and value enumerations

pub mod entry_points;
pub mod functions;
pub mod layout;
pub mod modules;
pub mod params;

pub use entry_points::{Backend, EntryKind, EntryPoint};
pub use functions::*;
pub use params::*;
