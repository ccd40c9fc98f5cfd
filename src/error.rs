//! Error types for largecount

use std::fmt;

use thiserror::Error;

/// Result type for large-count operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status code the runtime uses for success.
pub const SUCCESS: i32 = 0;

/// Step of composite datatype construction that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    /// Querying the byte size of the element type
    ElementSize,
    /// Building the block-strided chunk sub-layout
    Chunks,
    /// Building the contiguous remainder sub-layout
    Remainder,
    /// Building a contiguous type of a count that fits the native range
    Contiguous,
    /// Combining both sub-layouts into one struct type
    Combine,
    /// Committing the combined type
    Commit,
    /// Querying the committed type's byte size for the consistency check
    SizeCheck,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStep::ElementSize => "element size query",
            BuildStep::Chunks => "chunk vector type",
            BuildStep::Remainder => "remainder contiguous type",
            BuildStep::Contiguous => "contiguous type",
            BuildStep::Combine => "struct type",
            BuildStep::Commit => "type commit",
            BuildStep::SizeCheck => "size check query",
        };
        f.write_str(name)
    }
}

/// The wrapped primitive an [`Error::Operation`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Blocking point-to-point send
    Send,
    /// Blocking point-to-point receive
    Recv,
    /// Blocking broadcast
    Broadcast,
    /// Independent positioned file write
    WriteAt,
    /// Collective positioned file write
    WriteAtAll,
    /// Collective write through the shared file pointer, in rank order
    WriteOrdered,
    /// Independent positioned file read
    ReadAt,
    /// Collective positioned file read
    ReadAtAll,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpKind::Send => "send",
            OpKind::Recv => "recv",
            OpKind::Broadcast => "bcast",
            OpKind::WriteAt => "file_write_at",
            OpKind::WriteAtAll => "file_write_at_all",
            OpKind::WriteOrdered => "file_write_ordered",
            OpKind::ReadAt => "file_read_at",
            OpKind::ReadAtAll => "file_read_at_all",
        };
        f.write_str(name)
    }
}

/// Error types for large-count operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A step of composite datatype construction failed. Nothing built so
    /// far is left registered with the runtime.
    #[error("building large-count datatype failed at {step} (code {code})")]
    Construction {
        /// Failing step
        step: BuildStep,
        /// Runtime status code
        code: i32,
    },

    /// The substituted primitive call failed.
    #[error("{op} failed (code {code})")]
    Operation {
        /// Which primitive
        op: OpKind,
        /// Runtime status code
        code: i32,
    },

    /// Freeing a datatype failed.
    #[error("freeing large-count datatype failed (code {code}, transfer completed: {after_transfer})")]
    Release {
        /// Runtime status code
        code: i32,
        /// The data transfer had already completed when the free failed
        after_transfer: bool,
    },

    /// The composite datatype does not describe the requested number of bytes.
    #[error("large-count datatype has {actual} bytes, expected {expected}")]
    Consistency {
        /// `count * element size`
        expected: i64,
        /// Size reported by the runtime
        actual: i64,
        /// The runtime's internal-error code
        code: i32,
    },

    /// Invalid count specified
    #[error("Invalid count: {0}")]
    InvalidCount(i64),

    /// Invalid limits or other configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// MPI has already been initialized in this process
    #[error("MPI already initialized")]
    AlreadyInitialized,

    /// MPI error with code, outside the large-count protocol (init, file open, ...)
    #[error("MPI error (code {0})")]
    MpiError(i32),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an error from a raw runtime status code.
    pub fn from_code(code: i32) -> Self {
        debug_assert_ne!(code, SUCCESS, "from_code called with success code");
        Error::MpiError(code)
    }

    /// Check a raw runtime status code, returning Ok(()) for success.
    pub fn check(code: i32) -> Result<()> {
        if code == SUCCESS {
            Ok(())
        } else {
            Err(Error::from_code(code))
        }
    }

    /// The runtime status code equivalent of this error.
    ///
    /// Variants that do not originate in the runtime map to `-1`.
    pub fn code(&self) -> i32 {
        match self {
            Error::Construction { code, .. }
            | Error::Operation { code, .. }
            | Error::Release { code, .. }
            | Error::Consistency { code, .. }
            | Error::MpiError(code) => *code,
            Error::InvalidCount(_)
            | Error::InvalidConfig(_)
            | Error::AlreadyInitialized
            | Error::Internal(_) => -1,
        }
    }

    /// A release failure reported after the data had already moved.
    ///
    /// Callers that only care about the transfer may treat these as warnings.
    pub fn is_advisory(&self) -> bool {
        matches!(
            self,
            Error::Release {
                after_transfer: true,
                ..
            }
        )
    }

    /// Mark a release failure as happening after a completed transfer.
    pub(crate) fn after_transfer(self) -> Self {
        match self {
            Error::Release { code, .. } => Error::Release {
                code,
                after_transfer: true,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_success_and_failure() {
        assert!(Error::check(SUCCESS).is_ok());
        assert_eq!(Error::check(13), Err(Error::MpiError(13)));
    }

    #[test]
    fn code_round_trips_runtime_codes() {
        let err = Error::Construction {
            step: BuildStep::Chunks,
            code: 3,
        };
        assert_eq!(err.code(), 3);
        let err = Error::Operation {
            op: OpKind::Send,
            code: 7,
        };
        assert_eq!(err.code(), 7);
        assert_eq!(Error::InvalidCount(-4).code(), -1);
    }

    #[test]
    fn only_post_transfer_release_is_advisory() {
        let hard = Error::Release {
            code: 5,
            after_transfer: false,
        };
        assert!(!hard.is_advisory());
        let soft = hard.after_transfer();
        assert!(soft.is_advisory());
        assert_eq!(soft.code(), 5);

        let op = Error::Operation {
            op: OpKind::Recv,
            code: 5,
        };
        assert_eq!(op.clone().after_transfer(), op);
    }

    #[test]
    fn display_messages() {
        let err = Error::Construction {
            step: BuildStep::Remainder,
            code: 2,
        };
        assert_eq!(
            err.to_string(),
            "building large-count datatype failed at remainder contiguous type (code 2)"
        );
        let err = Error::Consistency {
            expected: 10,
            actual: 9,
            code: 16,
        };
        assert_eq!(
            err.to_string(),
            "large-count datatype has 9 bytes, expected 10"
        );
        let err = Error::Release {
            code: 1,
            after_transfer: true,
        };
        assert!(err.to_string().contains("transfer completed: true"));
    }

    #[test]
    fn op_kind_names() {
        assert_eq!(OpKind::Broadcast.to_string(), "bcast");
        assert_eq!(OpKind::ReadAtAll.to_string(), "file_read_at_all");
        assert_eq!(BuildStep::Contiguous.to_string(), "contiguous type");
    }
}
