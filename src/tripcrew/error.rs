//! Error taxonomy for crew construction and session execution.
//!
//! - [`ConfigurationError`]: the role registry or transition policy is invalid. Returned before
//!   any session can be constructed.
//! - [`SpeakerInvocationError`]: one attempt at a turn failed (timeout, transport error,
//!   malformed reply). Handled by the scheduler's retry policy.
//! - [`SessionError`]: a session ended without a usable result. Always carries the transcript as
//!   it stood at termination so callers can inspect what happened.
//!
//! ```
//! use tripcrew::error::ConfigurationError;
//!
//! let err = ConfigurationError::InvalidRoundLimit(0);
//! assert_eq!(err.to_string(), "max_rounds must be a positive integer, got 0");
//! ```

use crate::scheduler::TerminationReason;
use crate::transcript::Transcript;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// An invalid crew definition. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A transition, initiator, aggregator or priority list names a role that is not registered.
    /// `context` describes where the name was found (e.g. `"successor of A"`).
    UnknownRole { context: String, name: String },

    /// Two roles were registered under the same name.
    DuplicateRole(String),

    /// No initiator role was designated.
    MissingInitiator,

    /// No aggregator role was designated.
    MissingAggregator,

    /// `max_rounds` was zero or negative.
    InvalidRoundLimit(i64),

    /// A role other than the aggregator can be reached in the conversation but has no permitted
    /// successor.
    DeadEnd(String),

    /// The registry contains no roles.
    EmptyRegistry,

    /// The selector setting is unknown or lacks what it needs (a ranking, a backend client).
    InvalidSelector(String),

    /// A configuration document could not be parsed.
    Parse(String),

    /// A configuration file could not be read.
    Io(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownRole { context, name } => {
                write!(f, "Unknown role '{}' referenced as {}", name, context)
            }
            ConfigurationError::DuplicateRole(name) => {
                write!(f, "Role '{}' is registered more than once", name)
            }
            ConfigurationError::MissingInitiator => write!(f, "No initiator role designated"),
            ConfigurationError::MissingAggregator => write!(f, "No aggregator role designated"),
            ConfigurationError::InvalidRoundLimit(n) => {
                write!(f, "max_rounds must be a positive integer, got {}", n)
            }
            ConfigurationError::DeadEnd(name) => {
                write!(f, "Role '{}' is reachable but has no permitted successor", name)
            }
            ConfigurationError::EmptyRegistry => write!(f, "Role registry is empty"),
            ConfigurationError::InvalidSelector(msg) => write!(f, "Invalid selector: {}", msg),
            ConfigurationError::Parse(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigurationError::Io(msg) => write!(f, "Could not read configuration: {}", msg),
        }
    }
}

impl Error for ConfigurationError {}

/// A single failed attempt at producing a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerInvocationError {
    /// The backend did not answer within the turn timeout.
    Timeout { role: String, after: Duration },

    /// The backend call itself failed (transport, API error, ...).
    Backend { role: String, message: String },

    /// The backend answered with empty or whitespace-only content.
    EmptyReply { role: String },

    /// The selector could not produce a permitted speaker.
    Selection(String),
}

impl SpeakerInvocationError {
    pub fn backend(role: impl Into<String>, err: impl fmt::Display) -> Self {
        SpeakerInvocationError::Backend {
            role: role.into(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SpeakerInvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerInvocationError::Timeout { role, after } => {
                write!(f, "Role '{}' timed out after {:?}", role, after)
            }
            SpeakerInvocationError::Backend { role, message } => {
                write!(f, "Role '{}' backend failed: {}", role, message)
            }
            SpeakerInvocationError::EmptyReply { role } => {
                write!(f, "Role '{}' returned an empty reply", role)
            }
            SpeakerInvocationError::Selection(msg) => write!(f, "Speaker selection failed: {}", msg),
        }
    }
}

impl Error for SpeakerInvocationError {}

/// A session that terminated without producing a result.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// The session terminated but the aggregator never spoke.
    NoAggregatorOutput {
        aggregator: String,
        reason: TerminationReason,
        transcript: Transcript,
    },

    /// A turn kept failing after every retry attempt.
    SpeakerFailure {
        role: String,
        attempts: u32,
        source: SpeakerInvocationError,
        transcript: Transcript,
    },

    /// The session was cancelled by the caller.
    Cancelled { transcript: Transcript },
}

impl SessionError {
    pub fn termination_reason(&self) -> TerminationReason {
        match self {
            SessionError::NoAggregatorOutput { reason, .. } => *reason,
            SessionError::SpeakerFailure { .. } => TerminationReason::SpeakerFailure,
            SessionError::Cancelled { .. } => TerminationReason::Cancelled,
        }
    }

    /// The transcript as it stood when the session terminated.
    pub fn transcript(&self) -> &Transcript {
        match self {
            SessionError::NoAggregatorOutput { transcript, .. }
            | SessionError::SpeakerFailure { transcript, .. }
            | SessionError::Cancelled { transcript } => transcript,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoAggregatorOutput { reason, .. } => write!(
                f,
                "trip report could not be completed within the allotted turns ({})",
                reason
            ),
            SessionError::SpeakerFailure {
                role,
                attempts,
                source,
                ..
            } => write!(
                f,
                "Role '{}' failed after {} attempt(s): {}",
                role, attempts, source
            ),
            SessionError::Cancelled { .. } => write!(f, "Session cancelled"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SessionError::SpeakerFailure { source, .. } => Some(source),
            _ => None,
        }
    }
}
