//! MPI backend, enabled by the `mpi` feature.
//!
//! [`Mpi`] owns the MPI environment and implements [`Runtime`] by forwarding
//! every call to the C layer in `csrc/largecount.c`. Communicators, datatypes
//! and files are small integer handles into tables kept on the C side.
//!
//! Before each transfer the buffer slice is checked against the true extent
//! of `count` elements of the datatype, so a call can never read or write
//! past the end of the slice it was given.
//!
//! # Example
//!
//! ```no_run
//! use largecount::{as_bytes, as_bytes_mut, Datatype, FileMode, LargeCount, Mpi};
//!
//! let mpi = Mpi::init().expect("Failed to initialize MPI");
//! let world = mpi.world().unwrap();
//! let lc = LargeCount::new(&mpi);
//!
//! let n: usize = (1 << 31) + 5;
//! let mut data = vec![0i16; n];
//! if world.rank() == 0 {
//!     data[n - 1] = 42;
//! }
//! lc.broadcast(as_bytes_mut(&mut data), n as i64, Datatype::of::<i16>(), 0, &world)
//!     .unwrap();
//! assert_eq!(data[n - 1], 42);
//!
//! let file = mpi
//!     .file_open(&world, "big.data", FileMode::CREATE | FileMode::WRONLY)
//!     .unwrap();
//! let offset = world.rank() as i64 * n as i64 * 2;
//! lc.write_at_all(&file, offset, as_bytes(&data), n as i64, Datatype::of::<i16>(), None)
//!     .unwrap();
//! file.close().unwrap();
//! ```

use std::ffi::CString;
use std::marker::PhantomData;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::datatype::{DatatypeTag, Element};
use crate::error::{Error, Result};
use crate::ffi;
use crate::runtime::{RawResult, Runtime};
use crate::status::Status;

/// Global flag tracking whether MPI has been initialized
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

fn raw(ret: i32) -> RawResult<()> {
    if ret == 0 {
        Ok(())
    } else {
        Err(ret)
    }
}

/// MPI thread support levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum ThreadLevel {
    /// Only single-threaded execution
    Single = 0,
    /// Multi-threaded, but MPI calls only from main thread
    Funneled = 1,
    /// Multi-threaded, but MPI calls serialized by user
    Serialized = 2,
    /// Full multi-threaded support
    Multiple = 3,
}

/// A datatype handle: one of the predefined element types or a derived
/// type built through [`Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Datatype(i32);

impl Datatype {
    /// Raw bytes (`MPI_UINT8_T`).
    pub const BYTE: Datatype = Datatype(DatatypeTag::U8 as i32);

    /// The predefined datatype of `T`.
    pub fn of<T: Element>() -> Self {
        Datatype(T::TAG as i32)
    }

    /// The handle value passed to the C layer.
    pub fn raw(self) -> i32 {
        self.0
    }
}

/// A communicator with its rank and size cached at creation.
#[derive(Debug, Clone)]
pub struct Comm {
    handle: i32,
    rank: i32,
    size: i32,
}

impl Comm {
    fn world() -> Result<Self> {
        let handle = ffi::COMM_WORLD;
        let mut rank = 0;
        let mut size = 0;
        Error::check(unsafe { ffi::largecount_comm_rank(handle, &mut rank) })?;
        Error::check(unsafe { ffi::largecount_comm_size(handle, &mut size) })?;
        Ok(Comm { handle, rank, size })
    }

    /// Rank of this process in the communicator.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of processes in the communicator.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Block until every process of the communicator has called `barrier`.
    pub fn barrier(&self) -> Result<()> {
        Error::check(unsafe { ffi::largecount_barrier(self.handle) })
    }

    /// Terminate every process of the communicator with `errorcode`.
    pub fn abort(&self, errorcode: i32) -> ! {
        unsafe {
            ffi::largecount_abort(self.handle, errorcode);
        }
        std::process::abort()
    }
}

/// File access mode flags, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(i32);

impl FileMode {
    /// Read only (`MPI_MODE_RDONLY`)
    pub const RDONLY: FileMode = FileMode(0x001);
    /// Write only (`MPI_MODE_WRONLY`)
    pub const WRONLY: FileMode = FileMode(0x002);
    /// Read and write (`MPI_MODE_RDWR`)
    pub const RDWR: FileMode = FileMode(0x004);
    /// Create the file if it does not exist (`MPI_MODE_CREATE`)
    pub const CREATE: FileMode = FileMode(0x008);
    /// Fail if creating a file that exists (`MPI_MODE_EXCL`)
    pub const EXCL: FileMode = FileMode(0x010);
    /// Delete the file on close (`MPI_MODE_DELETE_ON_CLOSE`)
    pub const DELETE_ON_CLOSE: FileMode = FileMode(0x020);
    /// The file is not opened concurrently elsewhere (`MPI_MODE_UNIQUE_OPEN`)
    pub const UNIQUE_OPEN: FileMode = FileMode(0x040);
    /// Sequential access only (`MPI_MODE_SEQUENTIAL`)
    pub const SEQUENTIAL: FileMode = FileMode(0x080);
    /// Position file pointers at the end (`MPI_MODE_APPEND`)
    pub const APPEND: FileMode = FileMode(0x100);
}

impl BitOr for FileMode {
    type Output = FileMode;

    fn bitor(self, rhs: FileMode) -> FileMode {
        FileMode(self.0 | rhs.0)
    }
}

/// An open MPI file. Closed collectively by [`File::close`] or on drop.
#[derive(Debug)]
pub struct File {
    handle: i32,
    rank: i32,
}

impl File {
    /// Flush written data to the storage device.
    pub fn sync(&self) -> Result<()> {
        Error::check(unsafe { ffi::largecount_file_sync(self.handle) })
    }

    /// Resize the file to `size` bytes. Collective.
    pub fn set_size(&self, size: i64) -> Result<()> {
        Error::check(unsafe { ffi::largecount_file_set_size(self.handle, size) })
    }

    /// Close the file, reporting failure. Collective.
    pub fn close(self) -> Result<()> {
        let handle = self.handle;
        std::mem::forget(self);
        Error::check(unsafe { ffi::largecount_file_close(handle) })
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let ret = unsafe { ffi::largecount_file_close(self.handle) };
        if ret != 0 {
            warn!(handle = self.handle, code = ret, "closing file on drop failed");
        }
    }
}

/// MPI environment handle.
///
/// This type represents an initialized MPI environment. There can only be one
/// instance of this type at a time. When dropped, it finalizes MPI.
pub struct Mpi {
    /// The thread level that was provided
    thread_level: ThreadLevel,
    /// `MPI_ERR_BUFFER` of the linked library
    err_buffer: i32,
    /// `MPI_ERR_INTERN` of the linked library
    err_intern: i32,
    /// Marker to make Mpi !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Mpi {
    /// Initialize MPI with single-threaded support.
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or if initialization fails.
    pub fn init() -> Result<Self> {
        Self::init_thread(ThreadLevel::Single)
    }

    /// Initialize MPI with the specified thread support level.
    ///
    /// The actual level provided can be queried with
    /// [`thread_level()`](Self::thread_level).
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or if initialization fails.
    pub fn init_thread(required: ThreadLevel) -> Result<Self> {
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        let mut provided: i32 = 0;
        let ret = unsafe { ffi::largecount_init_thread(required as i32, &mut provided) };

        if ret != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::from_code(ret));
        }

        let thread_level = match provided {
            0 => ThreadLevel::Single,
            1 => ThreadLevel::Funneled,
            2 => ThreadLevel::Serialized,
            _ => ThreadLevel::Multiple,
        };
        debug!(?required, provided = ?thread_level, "MPI initialized");

        Ok(Mpi {
            thread_level,
            err_buffer: unsafe { ffi::largecount_err_buffer() },
            err_intern: unsafe { ffi::largecount_err_intern() },
            _marker: PhantomData,
        })
    }

    /// Get the thread support level that was provided.
    pub fn thread_level(&self) -> ThreadLevel {
        self.thread_level
    }

    /// Get a handle to `MPI_COMM_WORLD`.
    pub fn world(&self) -> Result<Comm> {
        Comm::world()
    }

    /// Collectively open `path` on every process of `comm`.
    pub fn file_open(&self, comm: &Comm, path: &str, mode: FileMode) -> Result<File> {
        let name = CString::new(path)
            .map_err(|_| Error::InvalidConfig(format!("file name contains NUL: {path:?}")))?;
        let mut handle = -1;
        Error::check(unsafe {
            ffi::largecount_file_open(comm.handle, name.as_ptr(), mode.0, &mut handle)
        })?;
        Ok(File {
            handle,
            rank: comm.rank,
        })
    }

    /// Version of the MPI library found at build time, if pkg-config reported one.
    pub fn build_version() -> Option<&'static str> {
        option_env!("LARGECOUNT_MPI_VERSION")
    }

    /// Check if MPI has been initialized.
    pub fn is_initialized() -> bool {
        let mut flag: i32 = 0;
        unsafe { ffi::largecount_initialized(&mut flag) };
        flag != 0
    }

    /// Check if MPI has been finalized.
    pub fn is_finalized() -> bool {
        let mut flag: i32 = 0;
        unsafe { ffi::largecount_finalized(&mut flag) };
        flag != 0
    }

    /// Refuse a transfer that would touch bytes outside a `len`-byte buffer.
    fn check_span(&self, len: usize, count: i32, datatype: Datatype) -> RawResult<()> {
        if count <= 0 {
            return Ok(());
        }
        let (mut lb, mut extent) = (0i64, 0i64);
        raw(unsafe { ffi::largecount_type_extent(datatype.0, &mut lb, &mut extent) })?;
        let (mut true_lb, mut true_extent) = (0i64, 0i64);
        raw(unsafe {
            ffi::largecount_type_true_extent(datatype.0, &mut true_lb, &mut true_extent)
        })?;
        let end = i64::from(count - 1)
            .checked_mul(extent)
            .and_then(|e| e.checked_add(true_lb))
            .and_then(|e| e.checked_add(true_extent));
        match end {
            Some(end) if true_lb >= 0 && end <= len as i64 => Ok(()),
            _ => Err(self.err_buffer),
        }
    }

    fn file_status(fh: &File, bytes: i64, status: Option<&mut Status>) {
        if let Some(status) = status {
            *status = Status {
                source: fh.rank,
                tag: 0,
                bytes,
            };
        }
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        // Only finalize if we successfully initialized
        if MPI_INITIALIZED.load(Ordering::SeqCst) {
            unsafe {
                ffi::largecount_finalize();
            }
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
        }
    }
}

impl Runtime for Mpi {
    type Datatype = Datatype;
    type Comm = Comm;
    type File = File;

    fn type_size(&self, datatype: Datatype) -> RawResult<i64> {
        let mut size = 0i64;
        raw(unsafe { ffi::largecount_type_size(datatype.0, &mut size) })?;
        Ok(size)
    }

    fn type_contiguous(&self, count: i32, oldtype: Datatype) -> RawResult<Datatype> {
        let mut handle = -1;
        raw(unsafe { ffi::largecount_type_contiguous(count, oldtype.0, &mut handle) })?;
        Ok(Datatype(handle))
    }

    fn type_vector(
        &self,
        count: i32,
        blocklength: i32,
        stride: i32,
        oldtype: Datatype,
    ) -> RawResult<Datatype> {
        let mut handle = -1;
        raw(unsafe {
            ffi::largecount_type_vector(count, blocklength, stride, oldtype.0, &mut handle)
        })?;
        Ok(Datatype(handle))
    }

    fn type_create_struct(
        &self,
        blocklengths: &[i32],
        displacements: &[i64],
        types: &[Datatype],
    ) -> RawResult<Datatype> {
        if displacements.len() != blocklengths.len() || types.len() != blocklengths.len() {
            return Err(self.err_intern);
        }
        let count = i32::try_from(blocklengths.len()).map_err(|_| self.err_intern)?;
        let handles: Vec<i32> = types.iter().map(|t| t.0).collect();
        let mut handle = -1;
        raw(unsafe {
            ffi::largecount_type_create_struct(
                count,
                blocklengths.as_ptr(),
                displacements.as_ptr(),
                handles.as_ptr(),
                &mut handle,
            )
        })?;
        Ok(Datatype(handle))
    }

    fn type_commit(&self, datatype: Datatype) -> RawResult<()> {
        raw(unsafe { ffi::largecount_type_commit(datatype.0) })
    }

    fn type_free(&self, datatype: Datatype) -> RawResult<()> {
        raw(unsafe { ffi::largecount_type_free(datatype.0) })
    }

    fn internal_error_code(&self) -> i32 {
        self.err_intern
    }

    fn send(
        &self,
        buf: &[u8],
        count: i32,
        datatype: Datatype,
        dest: i32,
        tag: i32,
        comm: &Comm,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        raw(unsafe {
            ffi::largecount_send(
                buf.as_ptr().cast(),
                count,
                datatype.0,
                dest,
                tag,
                comm.handle,
            )
        })
    }

    fn recv(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: Datatype,
        source: i32,
        tag: i32,
        comm: &Comm,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut actual_source = 0;
        let mut actual_tag = 0;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_recv(
                buf.as_mut_ptr().cast(),
                count,
                datatype.0,
                source,
                tag,
                comm.handle,
                &mut actual_source,
                &mut actual_tag,
                &mut bytes,
            )
        })?;
        if let Some(status) = status {
            *status = Status {
                source: actual_source,
                tag: actual_tag,
                bytes,
            };
        }
        Ok(())
    }

    fn bcast(
        &self,
        buf: &mut [u8],
        count: i32,
        datatype: Datatype,
        root: i32,
        comm: &Comm,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        raw(unsafe {
            ffi::largecount_bcast(buf.as_mut_ptr().cast(), count, datatype.0, root, comm.handle)
        })
    }

    fn file_write_at(
        &self,
        fh: &File,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_file_write_at(
                fh.handle,
                offset,
                buf.as_ptr().cast(),
                count,
                datatype.0,
                &mut bytes,
            )
        })?;
        Self::file_status(fh, bytes, status);
        Ok(())
    }

    fn file_write_at_all(
        &self,
        fh: &File,
        offset: i64,
        buf: &[u8],
        count: i32,
        datatype: Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_file_write_at_all(
                fh.handle,
                offset,
                buf.as_ptr().cast(),
                count,
                datatype.0,
                &mut bytes,
            )
        })?;
        Self::file_status(fh, bytes, status);
        Ok(())
    }

    fn file_write_ordered(
        &self,
        fh: &File,
        buf: &[u8],
        count: i32,
        datatype: Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_file_write_ordered(
                fh.handle,
                buf.as_ptr().cast(),
                count,
                datatype.0,
                &mut bytes,
            )
        })?;
        Self::file_status(fh, bytes, status);
        Ok(())
    }

    fn file_read_at(
        &self,
        fh: &File,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_file_read_at(
                fh.handle,
                offset,
                buf.as_mut_ptr().cast(),
                count,
                datatype.0,
                &mut bytes,
            )
        })?;
        Self::file_status(fh, bytes, status);
        Ok(())
    }

    fn file_read_at_all(
        &self,
        fh: &File,
        offset: i64,
        buf: &mut [u8],
        count: i32,
        datatype: Datatype,
        status: Option<&mut Status>,
    ) -> RawResult<()> {
        self.check_span(buf.len(), count, datatype)?;
        let mut bytes = 0i64;
        raw(unsafe {
            ffi::largecount_file_read_at_all(
                fh.handle,
                offset,
                buf.as_mut_ptr().cast(),
                count,
                datatype.0,
                &mut bytes,
            )
        })?;
        Self::file_status(fh, bytes, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // MPI-backed runs need mpiexec; only the pure parts are tested here.
    use super::*;

    #[test]
    fn predefined_handles_follow_element_tags() {
        assert_eq!(Datatype::of::<u8>(), Datatype::BYTE);
        assert_eq!(Datatype::of::<i16>().raw(), 8);
        assert_eq!(Datatype::of::<f64>().raw(), 1);
    }

    #[test]
    fn file_modes_combine() {
        let mode = FileMode::CREATE | FileMode::WRONLY;
        assert_eq!(mode.0, 0x00a);
        assert_eq!((mode | FileMode::CREATE).0, mode.0);
    }
}
