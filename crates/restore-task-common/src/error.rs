//! Error types for the restore files task
//!
//! Errors are structured with fields to aid debugging from task logs alone.
//! Each variant records the operation that failed and the underlying cause, and
//! falls into one of three categories (see [`ErrorCategory`]) that decide how the
//! orchestrator reacts.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Broad failure category
///
/// - `Configuration`: missing or invalid parameters, detected before any cluster mutation
/// - `External`: a call to the cluster, the token service or the Lagoon API failed
/// - `Domain`: the call succeeded but k8up or the upload pod reported failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid or missing configuration
    Configuration,
    /// External call failure
    External,
    /// Reported failure of the underlying operation
    Domain,
}

/// Main error type for restore task operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is missing or invalid
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error [{operation}]: {source}")]
    Kube {
        /// The operation that failed (e.g., "create pvc restore-target-rft-42")
        operation: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// k8up reported that the restore failed
    #[error("restore failed: {message}")]
    RestoreFailed {
        /// Message from the Restore status
        message: String,
    },

    /// The upload pod reported failure
    #[error("upload failed: {message}")]
    UploadFailed {
        /// Message from the pod status
        message: String,
    },

    /// Archiving the restored files failed
    #[error("archive error [{stage}]: {message}")]
    Archive {
        /// Stage of the archive pipeline (stat, walk, create, compress)
        stage: String,
        /// Description of what failed
        message: String,
    },

    /// Retrieving the Lagoon token failed
    #[error("token error [{host}]: {message}")]
    Token {
        /// Token service host and port
        host: String,
        /// Description of what failed
        message: String,
    },

    /// The Lagoon API rejected or failed the request
    #[error("lagoon api error: {message}")]
    Api {
        /// Description of what failed
        message: String,
        /// HTTP status code, when a response was received
        status: Option<u16>,
    },

    /// A bounded wait expired
    #[error("timed out waiting for {what}")]
    Timeout {
        /// What was being waited on
        what: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "watch", "logs")
        context: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a kube-rs error with the operation that produced it
    pub fn kube(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            operation: operation.into(),
            source,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a restore failure carrying the k8up message
    pub fn restore_failed(msg: impl Into<String>) -> Self {
        Self::RestoreFailed {
            message: msg.into(),
        }
    }

    /// Create an upload failure carrying the pod message
    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed {
            message: msg.into(),
        }
    }

    /// Create an archive error for the given pipeline stage
    pub fn archive(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Archive {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    /// Create a token retrieval error
    pub fn token(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Token {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a Lagoon API error without a response status
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api {
            message: msg.into(),
            status: None,
        }
    }

    /// Create a Lagoon API error for a non-success response
    pub fn api_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Api {
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create a timeout error
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout { what: what.into() }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config { .. } => ErrorCategory::Configuration,
            Error::RestoreFailed { .. } | Error::UploadFailed { .. } => ErrorCategory::Domain,
            Error::Kube { .. }
            | Error::Serialization { .. }
            | Error::Archive { .. }
            | Error::Token { .. }
            | Error::Api { .. }
            | Error::Timeout { .. }
            | Error::Internal { .. } => ErrorCategory::External,
        }
    }

    /// Whether the underlying operation itself reported failure
    pub fn is_domain_failure(&self) -> bool {
        self.category() == ErrorCategory::Domain
    }

    /// Whether this is a 404 from the Kubernetes API
    ///
    /// Cleanup treats these as already-deleted resources.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae),
                ..
            } if ae.code == 404
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
