//! ngxtweaks Plugin - Process Entry Layer
//!
//! This crate is the module the host loads. On process attach it spawns a
//! setup thread that loads the config, starts logging and hands over to
//! the core. It compiles to a cdylib (.dll/.so).

pub mod ffi;
mod logging;
mod setup;

pub use ngxtweaks_core::shutdown;
