//! Error types for autogemm operations.
//!
//! Every fallible operation in the crate returns [`Result`]. Validation runs
//! before any caller memory is touched, so an `Err` from a GEMM call means C
//! was left unmodified unless the error came out of a worker batch.

use std::fmt;

/// Errors that can occur while building kernels or running GEMM calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GemmError {
    /// A dimension, stride, blocking factor, kernel shape or requested vector
    /// width was rejected.
    InvalidArgument {
        /// Human-readable error message.
        message: String,
    },
    /// Neither the CPU nor the compiled binary offers any usable SIMD width.
    UnsupportedHardware {
        /// Human-readable error message.
        message: String,
    },
    /// A packed-panel buffer could not be allocated.
    AllocationFailure {
        /// The size in bytes that was requested.
        requested_size: usize,
        /// The alignment that was requested.
        requested_alignment: usize,
        /// Human-readable error message.
        message: String,
    },
    /// One or more parallel batches failed.
    Parallel {
        /// Number of batches that returned an error.
        failed_batches: usize,
        /// The failure of the lowest-numbered failed batch.
        first: Box<GemmError>,
    },
}

impl fmt::Display for GemmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GemmError::InvalidArgument { message } => {
                write!(f, "Invalid argument: {}", message)
            }
            GemmError::UnsupportedHardware { message } => {
                write!(f, "Unsupported hardware: {}", message)
            }
            GemmError::AllocationFailure {
                requested_size,
                requested_alignment,
                message,
            } => write!(
                f,
                "Memory allocation failed: {} (requested {} bytes with {} byte alignment)",
                message, requested_size, requested_alignment
            ),
            GemmError::Parallel {
                failed_batches,
                first,
            } => write!(
                f,
                "{} parallel batch(es) failed; first failure: {}",
                failed_batches, first
            ),
        }
    }
}

impl std::error::Error for GemmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GemmError::Parallel { first, .. } => Some(first.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for autogemm operations.
pub type Result<T> = std::result::Result<T, GemmError>;

/// Creates an invalid-argument error.
pub fn invalid_argument(message: impl Into<String>) -> GemmError {
    GemmError::InvalidArgument {
        message: message.into(),
    }
}

/// Creates an unsupported-hardware error.
pub fn unsupported_hardware(message: impl Into<String>) -> GemmError {
    GemmError::UnsupportedHardware {
        message: message.into(),
    }
}

/// Creates an allocation error.
pub fn allocation_failure(size: usize, alignment: usize, message: impl Into<String>) -> GemmError {
    GemmError::AllocationFailure {
        requested_size: size,
        requested_alignment: alignment,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_failure_display() {
        let error = allocation_failure(1024, 64, "out of memory");
        let display = format!("{}", error);
        assert!(display.contains("Memory allocation failed"));
        assert!(display.contains("1024 bytes"));
        assert!(display.contains("64 byte alignment"));
        assert!(display.contains("out of memory"));
    }

    #[test]
    fn test_invalid_argument_display() {
        let error = invalid_argument("lda (3) must be >= k (4)");
        let display = format!("{}", error);
        assert!(display.contains("Invalid argument"));
        assert!(display.contains("lda (3) must be >= k (4)"));
    }

    #[test]
    fn test_unsupported_hardware_display() {
        let error = unsupported_hardware("512-bit vectors not available");
        assert_eq!(
            error.to_string(),
            "Unsupported hardware: 512-bit vectors not available"
        );
    }

    #[test]
    fn test_parallel_error_reports_first_failure() {
        let error = GemmError::Parallel {
            failed_batches: 3,
            first: Box::new(invalid_argument("bad index")),
        };
        let display = format!("{}", error);
        assert!(display.contains("3 parallel batch(es) failed"));
        assert!(display.contains("bad index"));

        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Invalid argument: bad index"));
    }

    #[test]
    fn test_error_equality() {
        let error1 = allocation_failure(1024, 64, "test");
        let error2 = allocation_failure(1024, 64, "test");
        let error3 = allocation_failure(2048, 64, "test");

        assert_eq!(error1, error2);
        assert_ne!(error1, error3);
    }

    #[test]
    fn test_error_trait_implementation() {
        let error = invalid_argument("test error");

        let _: &dyn std::error::Error = &error;
        assert!(std::error::Error::source(&error).is_none());
    }
}
