//! Completion status of receive and file operations.
//!
//! This module provides the [`Status`] struct that the wrapped receive and
//! file operations fill in when the caller hands them a status receiver.
//! Passing `None` instead is the equivalent of `MPI_STATUS_IGNORE`.

/// Information about a completed receive or file access.
///
/// The wrapper never looks at or rewrites a status: whatever the single
/// underlying call reports is what the caller sees. For a large-count call
/// `bytes` is therefore the size of the whole transfer, not of one chunk.
///
/// # Example
///
/// ```
/// use largecount::sim::{SimType, SimWorld};
/// use largecount::{LargeCount, Status};
///
/// let rt = SimWorld::new(1).remove(0);
/// let file = rt.file_open("status.data");
/// let lc = LargeCount::new(&rt);
///
/// let mut status = Status::default();
/// lc.write_at(&file, 0, b"hello", 5, SimType::BYTE, Some(&mut status)).unwrap();
/// assert_eq!(status.bytes, 5);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    /// Source rank of the message (the calling rank for file operations).
    pub source: i32,
    /// Tag of the message (`0` for file operations).
    pub tag: i32,
    /// Number of bytes transferred.
    pub bytes: i64,
}
