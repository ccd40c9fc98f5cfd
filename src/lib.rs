//! # largecount
//!
//! Large-count message passing and file I/O for runtimes whose primitives
//! count elements with a 32-bit `int`.
//!
//! MPI before 4.0 caps every send, receive, broadcast and file access at
//! `INT_MAX` elements. This crate provides drop-in replacements that take an
//! `i64` count and, when it does not fit, describe the whole transfer as one
//! element of a derived datatype, so the data still moves in a single native
//! call without being copied or split:
//!
//! - Point-to-point: [`send`](LargeCount::send), [`recv`](LargeCount::recv)
//! - Collective: [`broadcast`](LargeCount::broadcast)
//! - File I/O: [`write_at`](LargeCount::write_at), [`write_at_all`](LargeCount::write_at_all),
//!   [`write_ordered`](LargeCount::write_ordered), [`read_at`](LargeCount::read_at),
//!   [`read_at_all`](LargeCount::read_at_all)
//! - Datatypes: [`type_contiguous`](LargeCount::type_contiguous)
//!
//! The runtime is abstracted by the [`Runtime`] trait. [`sim`] implements it
//! in-process; the `mpi` feature adds `Mpi`, backed by an MPI library through
//! a small C layer.
//!
//! ## Quick Start
//!
//! ```
//! use largecount::sim::{SimType, SimWorld};
//! use largecount::{as_bytes, LargeCount};
//!
//! fn main() -> Result<(), largecount::Error> {
//!     let rt = SimWorld::new(1).remove(0);
//!     let lc = LargeCount::new(&rt);
//!     let file = rt.file_open("quick.data");
//!
//!     let data = vec![7i16; 1000];
//!     lc.write_at(&file, 0, as_bytes(&data), data.len() as i64, SimType::SHORT, None)?;
//!     assert_eq!(rt.file_contents(&file).len(), 2000);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `mpi`   | MPI backend through the C layer in `csrc/` | an MPI 3.x installation |
//!
//! ## Errors
//!
//! Every operation returns [`Result`]. [`Error`] tells construction failures,
//! failures of the native call, failed releases and size inconsistencies
//! apart, and [`Error::code`] recovers the runtime status code. What to do
//! about a failure (abort, log, retry) is left to the caller.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow certain pedantic lints for existing code
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]

mod builder;
mod config;
mod datatype;
mod error;
#[cfg(feature = "mpi")]
mod ffi;
#[cfg(feature = "mpi")]
mod mpi;
mod operation;
mod runtime;
pub mod sim;
mod status;

pub use builder::{Descriptor, DescriptorBuilder, DerivedType};
pub use config::{Limits, NATIVE_MAX_COUNT, SIZE_CHECK_ENV};
pub use datatype::{as_bytes, as_bytes_mut, DatatypeTag, Element};
pub use error::{BuildStep, Error, OpKind, Result, SUCCESS};
#[cfg(feature = "mpi")]
pub use mpi::{Comm, Datatype, File, FileMode, Mpi, ThreadLevel};
pub use runtime::{RawResult, Runtime, DEFAULT_ERR_INTERN};
pub use status::Status;

/// Large-count versions of a runtime's blocking primitives.
///
/// Each method has the signature of the primitive it replaces, except that
/// the count is an `i64`. Counts up to [`Limits::threshold`] are passed
/// through untouched; larger ones are sent as one element of a temporary
/// derived datatype that is freed before the method returns.
///
/// Collective methods must be called by every participant with consistent
/// arguments, exactly as the native primitive requires. Each participant
/// builds and frees its own datatype.
///
/// # Example
///
/// ```
/// use largecount::sim::{SimType, SimWorld};
/// use largecount::{LargeCount, Limits};
///
/// let rt = SimWorld::with_native_limit(1, 8).remove(0);
/// let limits = Limits::default().with_threshold(8).with_max_block(7);
/// let lc = LargeCount::with_limits(&rt, limits).unwrap();
/// let comm = rt.world();
///
/// // 30 bytes do not fit the native limit of 8.
/// let sent: Vec<u8> = (0..30).collect();
/// lc.send(&sent, 30, SimType::BYTE, 0, 1, &comm).unwrap();
/// let mut received = vec![0u8; 30];
/// lc.recv(&mut received, 30, SimType::BYTE, 0, 1, &comm, None).unwrap();
/// assert_eq!(sent, received);
/// ```
pub struct LargeCount<'r, R: Runtime> {
    builder: DescriptorBuilder<'r, R>,
}

impl<'r, R: Runtime> LargeCount<'r, R> {
    /// Wrap `rt` with the default limits, the size check taken from the
    /// environment (see [`Limits::from_env`]).
    pub fn new(rt: &'r R) -> Self {
        LargeCount {
            builder: DescriptorBuilder::with_valid_limits(rt, Limits::from_env()),
        }
    }

    /// Wrap `rt` with explicit limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the limits fail [`Limits::validate`].
    pub fn with_limits(rt: &'r R, limits: Limits) -> Result<Self> {
        Ok(LargeCount {
            builder: DescriptorBuilder::new(rt, limits)?,
        })
    }

    /// The limits in effect.
    pub fn limits(&self) -> &Limits {
        self.builder.limits()
    }

    /// The wrapped runtime.
    pub fn runtime(&self) -> &'r R {
        self.builder.runtime()
    }

    /// A committed contiguous datatype of `count` elements of `datatype`.
    ///
    /// The caller owns the result and releases it with
    /// [`DerivedType::free`] or by dropping it.
    pub fn type_contiguous(&self, count: i64, datatype: R::Datatype) -> Result<DerivedType<'r, R>> {
        self.builder.contiguous(count, datatype)
    }

    /// Blocking send of `count` elements to `dest`.
    pub fn send(
        &self,
        buf: &[u8],
        count: i64,
        datatype: R::Datatype,
        dest: i32,
        tag: i32,
        comm: &R::Comm,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::Send, count, datatype, |n, ty| {
            rt.send(buf, n, ty, dest, tag, comm)
        })
    }

    /// Blocking receive of up to `count` elements from `source`.
    #[allow(clippy::too_many_arguments)]
    pub fn recv(
        &self,
        buf: &mut [u8],
        count: i64,
        datatype: R::Datatype,
        source: i32,
        tag: i32,
        comm: &R::Comm,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::Recv, count, datatype, |n, ty| {
            rt.recv(buf, n, ty, source, tag, comm, status)
        })
    }

    /// Broadcast `count` elements from `root` to every participant.
    ///
    /// # Arguments
    ///
    /// * `buf` - Data to send at the root, receive buffer everywhere else
    /// * `root` - Rank of the root process
    pub fn broadcast(
        &self,
        buf: &mut [u8],
        count: i64,
        datatype: R::Datatype,
        root: i32,
        comm: &R::Comm,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::Broadcast, count, datatype, |n, ty| {
            rt.bcast(buf, n, ty, root, comm)
        })
    }

    /// Write `count` elements at `offset` in the file.
    pub fn write_at(
        &self,
        fh: &R::File,
        offset: i64,
        buf: &[u8],
        count: i64,
        datatype: R::Datatype,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::WriteAt, count, datatype, |n, ty| {
            rt.file_write_at(fh, offset, buf, n, ty, status)
        })
    }

    /// Collectively write `count` elements at `offset` in the file.
    pub fn write_at_all(
        &self,
        fh: &R::File,
        offset: i64,
        buf: &[u8],
        count: i64,
        datatype: R::Datatype,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::WriteAtAll, count, datatype, |n, ty| {
            rt.file_write_at_all(fh, offset, buf, n, ty, status)
        })
    }

    /// Collectively write `count` elements through the shared file pointer,
    /// participants in rank order.
    pub fn write_ordered(
        &self,
        fh: &R::File,
        buf: &[u8],
        count: i64,
        datatype: R::Datatype,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::WriteOrdered, count, datatype, |n, ty| {
            rt.file_write_ordered(fh, buf, n, ty, status)
        })
    }

    /// Read up to `count` elements at `offset` in the file.
    pub fn read_at(
        &self,
        fh: &R::File,
        offset: i64,
        buf: &mut [u8],
        count: i64,
        datatype: R::Datatype,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::ReadAt, count, datatype, |n, ty| {
            rt.file_read_at(fh, offset, buf, n, ty, status)
        })
    }

    /// Collectively read up to `count` elements at `offset` in the file.
    pub fn read_at_all(
        &self,
        fh: &R::File,
        offset: i64,
        buf: &mut [u8],
        count: i64,
        datatype: R::Datatype,
        status: Option<&mut Status>,
    ) -> Result<()> {
        let rt = self.runtime();
        operation::apply(&self.builder, OpKind::ReadAtAll, count, datatype, |n, ty| {
            rt.file_read_at_all(fh, offset, buf, n, ty, status)
        })
    }
}
