//! Error types for the pod assembly core
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries enough context to identify the failing fragment, component,
//! or workspace; see the crate docs for the hard/soft failure split.

use thiserror::Error;

/// Main error type for pod assembly operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A pod-override attribute failed to decode
    #[error("failed to parse pod-overrides attribute on {owner}: {reason}")]
    OverrideParse {
        /// Owner of the attribute ("workspace" or the component name)
        owner: String,
        /// Description of the decode failure
        reason: String,
    },

    /// A pod-override fragment failed to merge onto the baseline template
    #[error("failed to apply pod-override fragment {fragment}: {reason}")]
    Compose {
        /// Zero-based index of the fragment in precedence order
        fragment: usize,
        /// Description of what failed
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },
}

impl Error {
    /// Create an override-parse error for the given owner
    pub fn override_parse(owner: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::OverrideParse {
            owner: owner.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a compose error for the fragment at the given index
    pub fn compose(fragment: usize, reason: impl std::fmt::Display) -> Self {
        Self::Compose {
            fragment,
            reason: reason.to_string(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with the resource kind that failed
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }
}
