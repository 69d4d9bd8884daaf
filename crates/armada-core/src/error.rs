//! Error types for target resolution, allocation, and command dispatch.
//!
//! There are two layers. [`PlatformError`] is what a
//! [`PlatformBridge`](crate::platform::PlatformBridge) implementation reports when the
//! underlying tooling fails. [`TargetError`] is the caller-facing taxonomy that every
//! public operation resolves to; platform failures are folded into it via [`From`], with
//! the original message passed through verbatim.

use std::time::Duration;

use thiserror::Error;

use crate::capability::Capability;

/// Errors reported by [`PlatformBridge`](crate::platform::PlatformBridge) implementations.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The underlying transport or tool is unreachable (usbmuxd down, Xcode missing).
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// The platform has no record of the given identifier.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// A host tool exited unsuccessfully. Carries the tool's own message.
    #[error("{0}")]
    CommandFailed(String),

    /// The operation has no transport on this target kind.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The call observed its cancellation token and stopped early.
    #[error("operation interrupted")]
    Interrupted,

    /// An I/O error occurred while driving a host tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tool output could not be parsed.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Caller-facing errors for target operations.
///
/// Every public entry point in this crate returns this type. Variants are
/// distinguishable by matching; messages are for humans and logs.
#[derive(Error, Debug)]
pub enum TargetError {
    /// The input string matches none of the accepted identifier forms.
    #[error("unrecognized target identifier: {raw:?}")]
    InvalidIdentifier { raw: String },

    /// The identifier is well-formed but no live target carries it.
    #[error("target not found: {identifier}")]
    TargetNotFound { identifier: String },

    /// A symbolic identifier matched more than one live target.
    #[error("ambiguous target: {} candidates ({})", candidates.len(), candidates.join(", "))]
    AmbiguousTarget { candidates: Vec<String> },

    /// `default` was requested but nothing is configured or attached to satisfy it.
    #[error("no default target configured")]
    NoDefaultTarget,

    /// The capability is not valid for the target's kind and current state.
    #[error("capability {capability} denied: {reason}")]
    CapabilityDenied {
        capability: Capability,
        reason: String,
    },

    /// Simulator allocation failed after exhausting its retry budget.
    #[error("allocation failed: {reason}")]
    AllocationFailed { reason: String },

    /// An erase sequence could not complete.
    #[error("erase failed: {reason}")]
    EraseFailed { reason: String },

    /// The operation exceeded its deadline and was cancelled.
    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },

    /// The operation was cancelled before producing a result.
    #[error("operation cancelled")]
    Cancelled,

    /// The platform reported a failure; the message is passed through unchanged.
    #[error("{reason}")]
    Failed { reason: String },
}

impl From<PlatformError> for TargetError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::UnknownTarget(identifier) => TargetError::TargetNotFound { identifier },
            PlatformError::Interrupted => TargetError::Cancelled,
            other => TargetError::Failed {
                reason: other.to_string(),
            },
        }
    }
}
