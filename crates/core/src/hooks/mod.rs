//! Intercept primitives
//!
//! Two intercept types:
//! - Inline detours (prologue relocation via iced-x86)
//! - Import table patches (one module's view of an imported function)
//!
//! Both are created disabled and toggled by key through
//! [`InterceptPrimitive`].

pub mod iat;
pub mod inline;
pub mod manager;
mod trampoline;

pub use iat::ImportHookKey;
pub use inline::{HookError, InlineHookKey};
pub use manager::{HookKey, HookManager, InterceptPrimitive};
