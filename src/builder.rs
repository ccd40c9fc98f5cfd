//! Composite datatypes for counts beyond the native range.
//!
//! A count above [`Limits::threshold`] is expressed as a single element of a
//! struct datatype with two fields:
//!
//! | Field | Layout | Displacement |
//! |-------|--------|--------------|
//! | chunks | `count / max_block` blocks of `max_block` elements, stride `max_block` | `0` |
//! | remainder | `count % max_block` contiguous elements (possibly none) | `n_chunks * max_block * size` |
//!
//! The struct is committed before use and is the only datatype that survives
//! construction; both sub-layouts are freed as soon as it is committed.

use tracing::{debug, trace, warn};

use crate::config::Limits;
use crate::error::{BuildStep, Error, Result};
use crate::runtime::{RawResult, Runtime};

/// Owns one datatype handle and frees it on drop unless disarmed.
struct TypeGuard<'r, R: Runtime> {
    rt: &'r R,
    datatype: R::Datatype,
    armed: bool,
}

impl<'r, R: Runtime> TypeGuard<'r, R> {
    fn new(rt: &'r R, datatype: R::Datatype) -> Self {
        TypeGuard {
            rt,
            datatype,
            armed: true,
        }
    }

    fn free(mut self) -> RawResult<()> {
        self.armed = false;
        self.rt.type_free(self.datatype)
    }
}

impl<R: Runtime> Drop for TypeGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(code) = self.rt.type_free(self.datatype) {
                warn!(datatype = ?self.datatype, code, "failed to free datatype during cleanup");
            }
        }
    }
}

/// A committed derived datatype describing `count` elements.
///
/// Holds a borrow of the runtime that created it. Call
/// [`free()`](Self::free) to release it and observe the outcome; dropping it
/// frees it too, logging instead of reporting a failure.
pub struct DerivedType<'r, R: Runtime> {
    guard: TypeGuard<'r, R>,
    count: i64,
    bytes: i64,
}

impl<R: Runtime> DerivedType<'_, R> {
    /// The runtime handle, valid until this value is freed or dropped.
    pub fn datatype(&self) -> R::Datatype {
        self.guard.datatype
    }

    /// Number of elements of the original element type it describes.
    pub fn count(&self) -> i64 {
        self.count
    }

    /// `count * element size`.
    pub fn byte_size(&self) -> i64 {
        self.bytes
    }

    /// Release the datatype.
    ///
    /// A failure is reported as [`Error::Release`] with `after_transfer`
    /// unset; the wrapped operations upgrade it when the transfer completed.
    pub fn free(self) -> Result<()> {
        self.guard.free().map_err(|code| Error::Release {
            code,
            after_transfer: false,
        })
    }
}

/// What a wrapped operation passes to the native primitive.
pub enum Descriptor<'r, R: Runtime> {
    /// The count fits: use it and the element type unchanged.
    Native {
        /// The caller's count
        count: i32,
        /// The caller's element type
        datatype: R::Datatype,
    },
    /// The count does not fit: transfer one element of this type.
    Composite(DerivedType<'r, R>),
}

/// Builds the datatypes that carry large counts through native primitives.
///
/// # Example
///
/// ```
/// use largecount::sim::{SimType, SimWorld};
/// use largecount::{Descriptor, DescriptorBuilder, Limits};
///
/// let rt = SimWorld::new(1).remove(0);
/// let builder = DescriptorBuilder::new(&rt, Limits::default()).unwrap();
///
/// let descriptor = builder.build(1 << 33, SimType::BYTE).unwrap();
/// match descriptor {
///     Descriptor::Composite(big) => {
///         assert_eq!(big.byte_size(), 1 << 33);
///         big.free().unwrap();
///     }
///     Descriptor::Native { .. } => unreachable!(),
/// }
/// ```
pub struct DescriptorBuilder<'r, R: Runtime> {
    rt: &'r R,
    limits: Limits,
}

impl<'r, R: Runtime> DescriptorBuilder<'r, R> {
    /// Create a builder, rejecting limits that fail [`Limits::validate`].
    pub fn new(rt: &'r R, limits: Limits) -> Result<Self> {
        limits.validate()?;
        Ok(DescriptorBuilder { rt, limits })
    }

    /// Create a builder from limits already known to be valid.
    pub(crate) fn with_valid_limits(rt: &'r R, limits: Limits) -> Self {
        debug_assert!(limits.validate().is_ok());
        DescriptorBuilder { rt, limits }
    }

    /// The limits this builder was created with.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The runtime datatypes are built on.
    pub fn runtime(&self) -> &'r R {
        self.rt
    }

    /// Choose the native path or build a composite for `count` elements.
    pub fn build(&self, count: i64, element: R::Datatype) -> Result<Descriptor<'r, R>> {
        if count < 0 {
            return Err(Error::InvalidCount(count));
        }
        if count <= self.limits.threshold {
            trace!(count, "count fits native primitive");
            return Ok(Descriptor::Native {
                count: count as i32,
                datatype: element,
            });
        }
        self.composite(count, element).map(Descriptor::Composite)
    }

    /// A committed contiguous datatype of `count` elements.
    ///
    /// Counts up to the threshold use the runtime's own contiguous
    /// constructor; larger ones get the composite layout.
    pub fn contiguous(&self, count: i64, element: R::Datatype) -> Result<DerivedType<'r, R>> {
        if count < 0 {
            return Err(Error::InvalidCount(count));
        }
        if count > self.limits.threshold {
            return self.composite(count, element);
        }
        let rt = self.rt;
        let element_size = rt
            .type_size(element)
            .map_err(construction(BuildStep::ElementSize))?;
        let bytes = element_size
            .checked_mul(count)
            .ok_or(Error::InvalidCount(count))?;
        let datatype = rt
            .type_contiguous(count as i32, element)
            .map_err(construction(BuildStep::Contiguous))?;
        let guard = TypeGuard::new(rt, datatype);
        rt.type_commit(guard.datatype)
            .map_err(construction(BuildStep::Commit))?;
        Ok(DerivedType {
            guard,
            count,
            bytes,
        })
    }

    fn composite(&self, count: i64, element: R::Datatype) -> Result<DerivedType<'r, R>> {
        let rt = self.rt;
        let max_block = self.limits.max_block;
        let n_chunks = count / max_block;
        let remainder = count % max_block;
        let native_chunks = i32::try_from(n_chunks).map_err(|_| Error::InvalidCount(count))?;

        let element_size = rt
            .type_size(element)
            .map_err(construction(BuildStep::ElementSize))?;
        let expected = element_size
            .checked_mul(count)
            .ok_or(Error::InvalidCount(count))?;
        let displacement = n_chunks * max_block * element_size;

        debug!(
            count,
            n_chunks, max_block, remainder, element_size, "building large-count datatype"
        );

        // Declaration order matters: on an early return the composite is
        // dropped first, then the remainder, then the chunks.
        let chunks = rt
            .type_vector(native_chunks, max_block as i32, max_block as i32, element)
            .map_err(construction(BuildStep::Chunks))?;
        let chunks = TypeGuard::new(rt, chunks);

        let rest = rt
            .type_contiguous(remainder as i32, element)
            .map_err(construction(BuildStep::Remainder))?;
        let rest = TypeGuard::new(rt, rest);

        let combined = rt
            .type_create_struct(
                &[1, 1],
                &[0, displacement],
                &[chunks.datatype, rest.datatype],
            )
            .map_err(construction(BuildStep::Combine))?;
        let combined = TypeGuard::new(rt, combined);

        rt.type_commit(combined.datatype)
            .map_err(construction(BuildStep::Commit))?;

        chunks.free().map_err(release_before_transfer)?;
        rest.free().map_err(release_before_transfer)?;

        if self.limits.verify_size {
            let actual = rt
                .type_size(combined.datatype)
                .map_err(construction(BuildStep::SizeCheck))?;
            if actual != expected {
                warn!(expected, actual, "large-count datatype has the wrong size");
                return Err(Error::Consistency {
                    expected,
                    actual,
                    code: rt.internal_error_code(),
                });
            }
        }

        Ok(DerivedType {
            guard: combined,
            count,
            bytes: expected,
        })
    }
}

fn construction(step: BuildStep) -> impl Fn(i32) -> Error {
    move |code| {
        trace!(%step, code, "datatype construction step failed");
        Error::Construction { step, code }
    }
}

fn release_before_transfer(code: i32) -> Error {
    Error::Release {
        code,
        after_transfer: false,
    }
}
