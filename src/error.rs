//! Unified error handling for rematforge
//!
//! Every fallible operation of the pool surfaces one of these variants to the
//! caller of the triggering allocation or access request. Errors are grouped
//! by category:
//! - User errors (bad configuration, stale handles)
//! - Recoverable errors (budget pressure that may clear once buffers are released)
//! - Internal errors (broken invariants, misuse of pin/evict)
//! - Backend errors (allocator or kernel replay failures)

use std::fmt;

use crate::buffer::BufferId;

/// Unified error type for rematforge
#[derive(Debug, thiserror::Error)]
pub enum RematError {
    /// Operation called in a state that forbids it (evicting a pinned buffer,
    /// unpinning at zero, evicting without a recipe)
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// The budget cannot be met even after evicting every evictable member
    #[error("Resource exhausted: requested {requested} bytes with {resident} resident of {budget}")]
    ResourceExhausted {
        requested: usize,
        resident: usize,
        budget: usize,
    },

    /// Invalid pool configuration (unknown heuristic, zero budget, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Kernel replay failed for a captured operand
    #[error("Recompute of '{kernel}' failed: {reason}")]
    RecomputeFailure { kernel: String, reason: String },

    /// The device allocator refused a request that fit the budget
    #[error("Device allocation failed: {0}")]
    AllocationFailed(String),

    /// Handle refers to a buffer that was released or never existed
    #[error("Buffer not found: {0}")]
    BufferNotFound(BufferId),

    /// Lock poisoned (indicates a panic while the pool was held)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RematError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            RematError::InvalidConfiguration(_) | RematError::BufferNotFound(_) => {
                ErrorCategory::User
            }

            RematError::ResourceExhausted { .. } => ErrorCategory::Recoverable,

            RematError::PreconditionViolation(_)
            | RematError::LockPoisoned(_)
            | RematError::InternalError(_) => ErrorCategory::Internal,

            RematError::RecomputeFailure { .. } | RematError::AllocationFailed(_) => {
                ErrorCategory::Backend
            }
        }
    }

    /// Check if this error is recoverable
    ///
    /// Budget exhaustion may clear once the caller releases buffers.
    /// Recompute failures are deterministic and are never reported as recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }

    /// Check if this is an internal error (indicates a bug)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Recoverable error - temporary condition
    Recoverable,
    /// Internal error - indicates a bug
    Internal,
    /// Backend error - allocator or kernel failure
    Backend,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
            ErrorCategory::Internal => write!(f, "Internal"),
            ErrorCategory::Backend => write!(f, "Backend"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for RematError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RematError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using RematError
pub type RematResult<T> = std::result::Result<T, RematError>;

/// Build a precondition violation
///
/// # Examples
/// ```ignore
/// return Err(precondition_err("unpin called with zero pin count"));
/// ```
pub fn precondition_err(msg: &str) -> RematError {
    RematError::PreconditionViolation(msg.to_string())
}

/// Build an internal error
pub fn internal_err(msg: &str) -> RematError {
    RematError::InternalError(msg.to_string())
}

/// Build a recompute failure for the given kernel
pub fn recompute_err(kernel: &str, reason: impl Into<String>) -> RematError {
    RematError::RecomputeFailure {
        kernel: kernel.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            RematError::InvalidConfiguration("bogus".to_string()).category(),
            ErrorCategory::User
        );
        assert_eq!(
            RematError::ResourceExhausted {
                requested: 1,
                resident: 2,
                budget: 2
            }
            .category(),
            ErrorCategory::Recoverable
        );
        assert_eq!(
            precondition_err("pinned").category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            recompute_err("relu", "kernel crashed").category(),
            ErrorCategory::Backend
        );
        assert_eq!(
            RematError::AllocationFailed("oom".to_string()).category(),
            ErrorCategory::Backend
        );
    }

    #[test]
    fn test_is_recoverable() {
        let err = RematError::ResourceExhausted {
            requested: 10,
            resident: 0,
            budget: 5,
        };
        assert!(err.is_recoverable());
        assert!(!recompute_err("matmul", "nan").is_recoverable());
        assert!(!precondition_err("x").is_recoverable());
    }

    #[test]
    fn test_is_user_and_internal() {
        assert!(RematError::InvalidConfiguration("x".to_string()).is_user_error());
        assert!(!RematError::InvalidConfiguration("x".to_string()).is_internal_error());
        assert!(internal_err("bug").is_internal_error());
        assert!(RematError::LockPoisoned("x".to_string()).is_internal_error());
    }

    #[test]
    fn test_error_display() {
        let err = RematError::ResourceExhausted {
            requested: 600,
            resident: 600,
            budget: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Resource exhausted: requested 600 bytes with 600 resident of 1000"
        );

        let err = recompute_err("conv2d", "device lost");
        assert_eq!(err.to_string(), "Recompute of 'conv2d' failed: device lost");
    }

    #[test]
    fn test_poison_error_from_impl_exists() {
        use std::sync::PoisonError;

        fn convert_poison<T>(err: PoisonError<T>) -> RematError {
            RematError::from(err)
        }

        let _ = convert_poison::<i32> as fn(PoisonError<i32>) -> RematError;
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::User.to_string(), "User");
        assert_eq!(ErrorCategory::Recoverable.to_string(), "Recoverable");
        assert_eq!(ErrorCategory::Internal.to_string(), "Internal");
        assert_eq!(ErrorCategory::Backend.to_string(), "Backend");
    }
}
