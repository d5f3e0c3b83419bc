//! Error types for module and export resolution

/// Error type for export resolution operations
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Module is not resident in the process
    #[error("Module not loaded: {0}")]
    ModuleNotLoaded(String),

    /// A single export could not be resolved
    #[error("Export not found: {0}")]
    NotFound(String),

    /// One or more exports of a required list could not be resolved
    #[error("Missing {} export(s) from {module}: {}", .missing.len(), .missing.join(", "))]
    Incomplete {
        module: String,
        missing: Vec<&'static str>,
    },

    /// Export name cannot be passed to the loader (interior NUL)
    #[error("Invalid export name: {0}")]
    InvalidName(String),
}
