use std::fmt;

use crate::model::report::{InvalidTransition, ReportKind};
use crate::model::ReportId;
use crate::store::{CacheKey, UnknownKey};

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    EntityNotFound,
    InvalidStateTransition,
    InvalidInput,
    WrongReportKind,
    InvalidEnumValue,
    CorruptCacheValue,
    UnknownCacheKey,
    EncodeFailed,
    UnknownRequest,
    RetryFingerprintMismatch,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::EntityNotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::InvalidInput => "E2003",
            Self::WrongReportKind => "E2004",
            Self::InvalidEnumValue => "E2005",
            Self::CorruptCacheValue => "E3001",
            Self::UnknownCacheKey => "E3002",
            Self::EncodeFailed => "E3003",
            Self::UnknownRequest => "E4001",
            Self::RetryFingerprintMismatch => "E4002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::EntityNotFound => "Entity not found in cache",
            Self::InvalidStateTransition => "Invalid workflow transition",
            Self::InvalidInput => "Invalid mutation input",
            Self::WrongReportKind => "Operation does not apply to this report kind",
            Self::InvalidEnumValue => "Invalid enum value",
            Self::CorruptCacheValue => "Cached value does not decode",
            Self::UnknownCacheKey => "Unrecognized cache key",
            Self::EncodeFailed => "Entity failed to encode",
            Self::UnknownRequest => "No pending request with that id",
            Self::RetryFingerprintMismatch => "Retry envelope fingerprint mismatch",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .tally/config.toml and retry."),
            Self::EntityNotFound => Some("Seed the cache with the entity or check the id."),
            Self::InvalidStateTransition => Some(
                "Follow the approval workflow: open -> submitted -> approved -> reimbursed.",
            ),
            Self::InvalidInput => None,
            Self::WrongReportKind => Some("Workflow operations need an expense, IOU or invoice report."),
            Self::InvalidEnumValue => Some("Use one of the documented values."),
            Self::CorruptCacheValue => Some("Reload the entity from the remote to repair the cache."),
            Self::UnknownCacheKey => Some("Keys look like `<collection>:<id>`, e.g. `report:42`."),
            Self::EncodeFailed | Self::InternalUnexpected => {
                Some("Retry once. If persistent, report a bug with logs.")
            }
            Self::UnknownRequest => Some("The request was already settled or never dispatched."),
            Self::RetryFingerprintMismatch => {
                Some("The envelope was edited after it was stored; discard it.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// MutationError
// ---------------------------------------------------------------------------

/// Errors an orchestrator can return.
///
/// Ineligibility is not an error: see [`crate::orchestrate::Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// An entity the operation needs is not in the cache.
    #[error("{key} not found")]
    NotFound { key: CacheKey },

    /// A cached value exists but does not decode as the expected entity.
    #[error("cached value at {key} is corrupt: {source}")]
    Corrupt {
        key: CacheKey,
        #[source]
        source: serde_json::Error,
    },

    /// An entity or payload failed to serialize.
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Caller-supplied parameters are unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The workflow lattice forbids the move.
    #[error("invalid workflow transition {0}")]
    InvalidTransition(#[from] InvalidTransition),

    /// The report is not a kind this operation applies to.
    #[error("report {report_id} is a {kind} report")]
    WrongKind { report_id: ReportId, kind: ReportKind },

    /// A key string did not parse.
    #[error(transparent)]
    UnknownKey(#[from] UnknownKey),

    /// The retry envelope was altered after it was issued.
    #[error("retry envelope fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

impl MutationError {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::EntityNotFound,
            Self::Corrupt { .. } => ErrorCode::CorruptCacheValue,
            Self::Encode { .. } => ErrorCode::EncodeFailed,
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::InvalidTransition(_) => ErrorCode::InvalidStateTransition,
            Self::WrongKind { .. } => ErrorCode::WrongReportKind,
            Self::UnknownKey(_) => ErrorCode::UnknownCacheKey,
            Self::FingerprintMismatch { .. } => ErrorCode::RetryFingerprintMismatch,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
