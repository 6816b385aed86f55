/*!
 * Error Types
 * Centralized error handling with thiserror
 */

use thiserror::Error;

/// Result type for wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Wait operation errors
///
/// These are the only externally distinguishable error kinds; callers
/// match on the variant, never on the message text.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait operation timed out")]
    Timeout,

    #[error("Wait was cancelled")]
    Cancelled,

    #[error("Operation result requested before start")]
    EarlyInvoke,
}

impl WaitError {
    /// True for the cancellation kind. Cancellation is an expected
    /// outcome, never a defect.
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WaitError::Cancelled)
    }
}
