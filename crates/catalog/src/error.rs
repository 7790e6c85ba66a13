//! Catalog error type.

use benchtop_core::{OrchestratorError, PluginKind, ResourceKind};

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors raised while reading definitions or changing load state.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No definition with this name
    #[error("unknown {kind} '{name}'")]
    Unknown {
        /// Kind of resource
        kind: ResourceKind,
        /// Requested name
        name: String,
    },

    /// No plugin with this type name
    #[error("unknown {kind} plugin '{name}'")]
    UnknownPlugin {
        /// Plugin kind
        kind: PluginKind,
        /// Requested type
        name: String,
    },

    /// Resource exists but is not loaded
    #[error("{kind} '{name}' is not loaded")]
    NotLoaded {
        /// Kind of resource
        kind: ResourceKind,
        /// Resource name
        name: String,
    },

    /// An experiment type needs a lab that is not loaded
    #[error("experiment type '{experiment}' requires lab '{lab}' which is not loaded")]
    MissingLab {
        /// Experiment type
        experiment: String,
        /// Missing lab
        lab: String,
    },

    /// Definition file could not be parsed
    #[error("invalid definition {path}: {source}")]
    Invalid {
        /// File that failed to parse
        path: String,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },

    /// Definition file names a different resource than its file name
    #[error("definition {path} declares '{found}', expected '{expected}'")]
    Mismatch {
        /// File that was read
        path: String,
        /// Name taken from the file name
        expected: String,
        /// Name declared inside the file
        found: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CatalogError> for OrchestratorError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Unknown { kind, name } => OrchestratorError::UnknownType { kind, name },
            CatalogError::UnknownPlugin { kind, name } => OrchestratorError::PluginReload {
                plugin: format!("{kind} plugin '{name}'"),
                reason: "no such plugin".to_string(),
            },
            other => OrchestratorError::Configuration(other.to_string()),
        }
    }
}
