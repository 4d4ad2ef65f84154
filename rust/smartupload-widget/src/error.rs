use thiserror::Error;

use crate::ResourceKind;

/// The common error type used by this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WidgetError {
    /// An external stylesheet or script fired its error event
    #[error("Failed to load {kind} from {url}")]
    ResourceLoad {
        /// Which kind of resource failed
        kind: ResourceKind,
        /// The URL that was requested
        url: String,
    },

    /// A document operation was rejected by the host
    #[error("Document operation failed: {0}")]
    Dom(String),

    /// The page's network primitives could not be patched or restored
    #[error("Network interception failed: {0}")]
    Network(String),

    /// The widget configuration could not be parsed or serialized
    #[error("Invalid widget configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for WidgetError {
    fn from(error: serde_json::Error) -> Self {
        WidgetError::Config(error.to_string())
    }
}
