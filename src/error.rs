use thiserror::Error;
use tokio::time::error::Elapsed;

use crate::key::DestinationKey;
use crate::state::DestinationState;

/// Result type alias using [`ErrorKind`] as the error.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Kinds of transport errors
/// Note: The error messages can change over time, so don't match on the output
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network error while executing the underlying request.
    /// The wrapped [`reqwest::Error`] is passed through unchanged; back-pressure
    /// responses (429, 503) are not errors and never produce this variant.
    #[error("Network error")]
    Request(#[source] reqwest::Error),

    /// A concurrency slot for the destination could not be acquired in time
    #[error(transparent)]
    Capacity(#[from] Box<CapacityError>),
}

impl ErrorKind {
    /// Returns the capacity error if this is a gate failure
    #[must_use]
    pub fn capacity_error(&self) -> Option<&CapacityError> {
        match self {
            Self::Capacity(err) => Some(err),
            Self::Request(_) => None,
        }
    }

    /// Returns true if this error came from the concurrency gate rather
    /// than the underlying transport
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity(_))
    }
}

/// Error returned when the concurrency gate refuses a request.
///
/// Carries a snapshot of the destination's capacity state at the moment the
/// wait ended, so callers can inspect the enforced concurrency and any block
/// window without racing the live record.
#[derive(Error, Debug)]
#[error(
    "capacity {op} for {key}: {source} (concurrency: {}, status: {})",
    .state.current_concurrency,
    .state.status
)]
pub struct CapacityError {
    /// The operation that failed (currently always `"acquire"`)
    pub op: &'static str,

    /// The destination the request was keyed to
    pub key: DestinationKey,

    /// What ended the wait
    #[source]
    pub source: Elapsed,

    /// Snapshot of the destination state when the wait ended
    pub state: DestinationState,
}
