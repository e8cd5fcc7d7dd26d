//! Error types for the parigate verification harness

use thiserror::Error;

/// Main error type for parigate operations.
///
/// None of these are retried internally: the harness makes a single
/// deterministic attempt per invocation and surfaces every failure through
/// the process exit status.
#[derive(Debug, Error, Clone)]
pub enum ParigateError {
    /// Architecture or pretrained source could not be resolved
    #[error("Model instantiation error: {message}")]
    ModelInstantiation { message: String },

    /// No sharding transformation registered for the architecture
    #[error("Unsupported architecture: {architecture}")]
    UnsupportedArchitecture { architecture: String },

    /// Input or weight shape incompatible with the shard count
    #[error("Shape mismatch: {message}")]
    ShapeMismatch { message: String },

    /// A cooperating rank hung in a collective call
    #[error("Collective timed out: {message}")]
    CollectiveTimeout { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Tokenizer errors
    #[error("Tokenizer error: {message}")]
    Tokenizer { message: String },

    /// Tensor backend errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ParigateError {
    /// Create a model instantiation error
    pub fn model_instantiation(message: impl Into<String>) -> Self {
        Self::ModelInstantiation {
            message: message.into(),
        }
    }

    /// Create an unsupported architecture error
    pub fn unsupported_architecture(architecture: impl Into<String>) -> Self {
        Self::UnsupportedArchitecture {
            architecture: architecture.into(),
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }

    /// Create a collective timeout error
    pub fn collective_timeout(message: impl Into<String>) -> Self {
        Self::CollectiveTimeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a tokenizer error
    pub fn tokenizer(message: impl Into<String>) -> Self {
        Self::Tokenizer {
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error aborts the run before any artifact is written
    pub fn is_fatal(&self) -> bool {
        // Every variant is fatal at this layer; retry policy belongs to the
        // external trigger, not the harness.
        true
    }
}

impl From<std::io::Error> for ParigateError {
    fn from(err: std::io::Error) -> Self {
        Self::io(format!("{}", err))
    }
}

impl From<serde_json::Error> for ParigateError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("{}", err))
    }
}
