//! Raw FFI bindings to the C wrapper layer.
//!
//! These are low-level unsafe functions. Use the safe wrappers in the `mpi` module.

#![allow(dead_code)]
#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_void};

// Type aliases matching the C header
pub type int32_t = i32;
pub type int64_t = i64;

/// Handle of `MPI_COMM_WORLD` (`LARGECOUNT_COMM_WORLD`).
pub const COMM_WORLD: int32_t = 0;

unsafe extern "C" {
    // ============================================================
    // Initialization and Finalization
    // ============================================================

    pub fn largecount_init_thread(required: c_int, provided: *mut c_int) -> c_int;
    pub fn largecount_finalize() -> c_int;
    pub fn largecount_initialized(flag: *mut c_int) -> c_int;
    pub fn largecount_finalized(flag: *mut c_int) -> c_int;
    pub fn largecount_abort(comm: int32_t, errorcode: c_int) -> c_int;

    pub fn largecount_err_intern() -> c_int;
    pub fn largecount_err_buffer() -> c_int;

    // ============================================================
    // Communicators
    // ============================================================

    pub fn largecount_comm_rank(comm: int32_t, rank: *mut int32_t) -> c_int;
    pub fn largecount_comm_size(comm: int32_t, size: *mut int32_t) -> c_int;
    pub fn largecount_barrier(comm: int32_t) -> c_int;

    // ============================================================
    // Datatypes
    // ============================================================

    pub fn largecount_type_size(datatype: int32_t, size: *mut int64_t) -> c_int;
    pub fn largecount_type_extent(datatype: int32_t, lb: *mut int64_t, extent: *mut int64_t)
        -> c_int;
    pub fn largecount_type_true_extent(
        datatype: int32_t,
        lb: *mut int64_t,
        extent: *mut int64_t,
    ) -> c_int;
    pub fn largecount_type_contiguous(
        count: int32_t,
        oldtype: int32_t,
        newtype: *mut int32_t,
    ) -> c_int;
    pub fn largecount_type_vector(
        count: int32_t,
        blocklength: int32_t,
        stride: int32_t,
        oldtype: int32_t,
        newtype: *mut int32_t,
    ) -> c_int;
    pub fn largecount_type_create_struct(
        count: int32_t,
        blocklengths: *const int32_t,
        displacements: *const int64_t,
        types: *const int32_t,
        newtype: *mut int32_t,
    ) -> c_int;
    pub fn largecount_type_commit(datatype: int32_t) -> c_int;
    pub fn largecount_type_free(datatype: int32_t) -> c_int;

    // ============================================================
    // Point-to-point and collectives
    // ============================================================

    pub fn largecount_send(
        buf: *const c_void,
        count: int32_t,
        datatype: int32_t,
        dest: int32_t,
        tag: int32_t,
        comm: int32_t,
    ) -> c_int;

    pub fn largecount_recv(
        buf: *mut c_void,
        count: int32_t,
        datatype: int32_t,
        source: int32_t,
        tag: int32_t,
        comm: int32_t,
        actual_source: *mut int32_t,
        actual_tag: *mut int32_t,
        bytes: *mut int64_t,
    ) -> c_int;

    pub fn largecount_bcast(
        buf: *mut c_void,
        count: int32_t,
        datatype: int32_t,
        root: int32_t,
        comm: int32_t,
    ) -> c_int;

    // ============================================================
    // Files
    // ============================================================

    pub fn largecount_file_open(
        comm: int32_t,
        filename: *const c_char,
        amode: int32_t,
        fh: *mut int32_t,
    ) -> c_int;
    pub fn largecount_file_close(fh: int32_t) -> c_int;
    pub fn largecount_file_sync(fh: int32_t) -> c_int;
    pub fn largecount_file_set_size(fh: int32_t, size: int64_t) -> c_int;

    pub fn largecount_file_write_at(
        fh: int32_t,
        offset: int64_t,
        buf: *const c_void,
        count: int32_t,
        datatype: int32_t,
        bytes: *mut int64_t,
    ) -> c_int;
    pub fn largecount_file_write_at_all(
        fh: int32_t,
        offset: int64_t,
        buf: *const c_void,
        count: int32_t,
        datatype: int32_t,
        bytes: *mut int64_t,
    ) -> c_int;
    pub fn largecount_file_write_ordered(
        fh: int32_t,
        buf: *const c_void,
        count: int32_t,
        datatype: int32_t,
        bytes: *mut int64_t,
    ) -> c_int;
    pub fn largecount_file_read_at(
        fh: int32_t,
        offset: int64_t,
        buf: *mut c_void,
        count: int32_t,
        datatype: int32_t,
        bytes: *mut int64_t,
    ) -> c_int;
    pub fn largecount_file_read_at_all(
        fh: int32_t,
        offset: int64_t,
        buf: *mut c_void,
        count: int32_t,
        datatype: int32_t,
        bytes: *mut int64_t,
    ) -> c_int;
}
