//! The message-passing / parallel I/O runtime being extended.
//!
//! [`Runtime`] is the surface this crate consumes: datatype construction and
//! the blocking primitives whose element count is a 32-bit `i32`. Every
//! method reports failure as the runtime's own status code, which the
//! wrappers carry unchanged into [`Error`](crate::Error).
//!
//! Two implementations ship with the crate: [`sim::SimRuntime`](crate::sim::SimRuntime),
//! an in-process runtime for tests and single-node use, and `Mpi` (with the
//! `mpi` feature), which forwards to an MPI library.

use std::fmt;

use crate::status::Status;

/// Outcome of a raw runtime call: `Err` holds the runtime's status code.
pub type RawResult<T> = std::result::Result<T, i32>;

/// Status code reported for internal consistency failures when a runtime
/// does not define its own (`MPI_ERR_INTERN` in MPICH).
pub const DEFAULT_ERR_INTERN: i32 = 16;

/// A message-passing runtime with 32-bit element counts.
///
/// Implementations follow MPI semantics: derived datatypes must be committed
/// before use in a transfer, freeing a datatype that was used to build
/// another one leaves the other intact, and all transfers block until the
/// local buffer may be reused.
pub trait Runtime {
    /// Datatype handle (`MPI_Datatype`).
    type Datatype: Copy + fmt::Debug + PartialEq;
    /// Communicator handle (`MPI_Comm`).
    type Comm;
    /// Open file handle (`MPI_File`).
    type File;

    // ========================================================================
    // Datatypes
    // ========================================================================

    /// Number of bytes of data in one element of `datatype` (`MPI_Type_size_x`).
    fn type_size(&self, datatype: Self::Datatype) -> RawResult<i64>;

    /// `count` copies of `oldtype` back to back (`MPI_Type_contiguous`).
    fn type_contiguous(&self, count: i32, oldtype: Self::Datatype) -> RawResult<Self::Datatype>;

    /// `count` blocks of `blocklength` elements, `stride` elements apart
    /// (`MPI_Type_vector`).
    fn type_vector(
        &self,
        count: i32,
        blocklength: i32,
        stride: i32,
        oldtype: Self::Datatype,
    ) -> RawResult<Self::Datatype>;

    /// Fields of possibly different types at byte displacements
    /// (`MPI_Type_create_struct`). All three slices have the same length.
    fn type_create_struct(
        &self,
        blocklengths: &[i32],
        displacements: &[i64],
        types: &[Self::Datatype],
    ) -> RawResult<Self::Datatype>;

    /// Make a derived datatype usable in transfers (`MPI_Type_commit`).
    fn type_commit(&self, datatype: Self::Datatype) -> RawResult<()>;

    /// Release a derived datatype (`MPI_Type_free`).
    fn type_free(&self, datatype: Self::Datatype) -> RawResult<()>;

    /// Status code reported for internal consistency failures.
    fn internal_error_code(&self) -> i32 {
        DEFAULT_ERR_INTERN
    }

    // ========================================================================
    // Point-to-point and collectives
    // ========================================================================

    /// Blocking send (`MPI_Send`).
    fn send(
        &self,
        buf: &[u8],
        count: i32,
        datatype: Self::Datatype,
        dest: i32,
        tag: i32,
        comm: &Self::Comm,
    ) -> RawResult<()>;

    /// Blocking receive (`MPI_Recv`).
    #[allow(clippy::too_many_arguments)]
    fn recv(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: Self::Datatype,
        source: i32,
        tag: i32,
        comm: &Self::Comm,
        status: Option<&mut Status>,
    ) -> RawResult<()>;

    /// Blocking broadcast from `root` (`MPI_Bcast`).
    fn bcast(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: Self::Datatype,
        root: i32,
        comm: &Self::Comm,
    ) -> RawResult<()>;

    // ========================================================================
    // File I/O
    // ========================================================================

    /// Independent write at an explicit offset (`MPI_File_write_at`).
    fn file_write_at(
        &self,
        fh: &Self::File,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: Self::Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()>;

    /// Collective write at an explicit offset (`MPI_File_write_at_all`).
    fn file_write_at_all(
        &self,
        fh: &Self::File,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: Self::Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()>;

    /// Collective write through the shared file pointer in rank order
    /// (`MPI_File_write_ordered`).
    fn file_write_ordered(
        &self,
        fh: &Self::File,
        buf: &[u8],
        count: i32,
        datatype: Self::Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()>;

    /// Independent read at an explicit offset (`MPI_File_read_at`).
    fn file_read_at(
        &self,
        fh: &Self::File,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: Self::Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()>;

    /// Collective read at an explicit offset (`MPI_File_read_at_all`).
    fn file_read_at_all(
        &self,
        fh: &Self::File,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: Self::Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()>;
}
