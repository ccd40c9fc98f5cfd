//! Element types and byte views of typed buffers.
//!
//! The wrapped operations move bytes: buffers are `&[u8]` / `&mut [u8]` and
//! the datatype handle says how to read them. This module provides the
//! [`Element`] trait, a sealed trait for the primitive types that map to a
//! predefined runtime datatype, and [`as_bytes`] / [`as_bytes_mut`] to hand
//! slices of them to the operations without copying.
//!
//! # Supported Types
//!
//! | Rust Type | MPI Equivalent     | Tag Value |
//! |-----------|-------------------|-----------|
//! | `f32`     | `MPI_FLOAT`       | 0         |
//! | `f64`     | `MPI_DOUBLE`      | 1         |
//! | `i32`     | `MPI_INT32_T`     | 2         |
//! | `i64`     | `MPI_INT64_T`     | 3         |
//! | `u8`      | `MPI_UINT8_T`     | 4         |
//! | `u32`     | `MPI_UINT32_T`    | 5         |
//! | `u64`     | `MPI_UINT64_T`    | 6         |
//! | `i8`      | `MPI_INT8_T`      | 7         |
//! | `i16`     | `MPI_INT16_T`     | 8         |
//! | `u16`     | `MPI_UINT16_T`    | 9         |

/// Internal module to seal the trait; prevents external implementations.
mod sealed {
    pub trait Sealed {}
}

/// Tag values matching C-side `LARGECOUNT_*` defines.
///
/// These discriminants must stay in sync with the `#define LARGECOUNT_*`
/// values in `csrc/largecount.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DatatypeTag {
    /// 32-bit floating point (`MPI_FLOAT`)
    F32 = 0,
    /// 64-bit floating point (`MPI_DOUBLE`)
    F64 = 1,
    /// 32-bit signed integer (`MPI_INT32_T`)
    I32 = 2,
    /// 64-bit signed integer (`MPI_INT64_T`)
    I64 = 3,
    /// 8-bit unsigned integer (`MPI_UINT8_T`)
    U8 = 4,
    /// 32-bit unsigned integer (`MPI_UINT32_T`)
    U32 = 5,
    /// 64-bit unsigned integer (`MPI_UINT64_T`)
    U64 = 6,
    /// 8-bit signed integer (`MPI_INT8_T`)
    I8 = 7,
    /// 16-bit signed integer (`MPI_INT16_T`)
    I16 = 8,
    /// 16-bit unsigned integer (`MPI_UINT16_T`)
    U16 = 9,
}

/// A primitive type with a predefined runtime datatype.
///
/// This is a **sealed trait**. Every implementor is plain old data without
/// padding, so any slice of it can be viewed as bytes.
pub trait Element: sealed::Sealed + Copy + Send + 'static {
    /// The datatype tag used for FFI dispatch to the C layer.
    const TAG: DatatypeTag;
}

macro_rules! impl_element {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const TAG: DatatypeTag = $tag;
        }
    };
}

impl_element!(f32, DatatypeTag::F32);
impl_element!(f64, DatatypeTag::F64);
impl_element!(i32, DatatypeTag::I32);
impl_element!(i64, DatatypeTag::I64);
impl_element!(u8, DatatypeTag::U8);
impl_element!(u32, DatatypeTag::U32);
impl_element!(u64, DatatypeTag::U64);
impl_element!(i8, DatatypeTag::I8);
impl_element!(i16, DatatypeTag::I16);
impl_element!(u16, DatatypeTag::U16);

/// View a slice of elements as its underlying bytes.
///
/// ```
/// let data = [1u16, 2];
/// assert_eq!(largecount::as_bytes(&data).len(), 4);
/// ```
pub fn as_bytes<T: Element>(data: &[T]) -> &[u8] {
    // SAFETY: Element is sealed to primitive numeric types, which have no
    // padding and no invalid bit patterns; the byte length covers exactly
    // the same allocation.
    unsafe { std::slice::from_raw_parts(data.as_ptr().cast::<u8>(), std::mem::size_of_val(data)) }
}

/// View a mutable slice of elements as its underlying bytes.
pub fn as_bytes_mut<T: Element>(data: &mut [T]) -> &mut [u8] {
    let len = std::mem::size_of_val(data);
    // SAFETY: as in `as_bytes`; every byte pattern written through the view
    // is a valid value of T.
    unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr().cast::<u8>(), len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_tag_values_are_sequential() {
        let tags = [
            DatatypeTag::F32,
            DatatypeTag::F64,
            DatatypeTag::I32,
            DatatypeTag::I64,
            DatatypeTag::U8,
            DatatypeTag::U32,
            DatatypeTag::U64,
            DatatypeTag::I8,
            DatatypeTag::I16,
            DatatypeTag::U16,
        ];
        for (i, tag) in tags.iter().enumerate() {
            assert_eq!(*tag as i32, i as i32, "Tag {tag:?} should have value {i}");
        }
    }

    #[test]
    fn element_tags() {
        assert_eq!(i16::TAG, DatatypeTag::I16);
        assert_eq!(u8::TAG, DatatypeTag::U8);
        assert_eq!(f64::TAG, DatatypeTag::F64);
    }

    #[test]
    fn byte_views_share_memory() {
        let mut data = [0x0102i16, -1];
        assert_eq!(as_bytes(&data).len(), 4);
        assert_eq!(&as_bytes(&data)[2..], &[0xffu8, 0xff]);
        assert_eq!(&as_bytes(&data)[..2], &0x0102i16.to_ne_bytes());

        as_bytes_mut(&mut data)[..2].copy_from_slice(&7i16.to_ne_bytes());
        assert_eq!(data, [7, -1]);
    }
}
