//! The build / call once / release protocol shared by every wrapped primitive.

use tracing::{debug, trace, warn};

use crate::builder::{Descriptor, DescriptorBuilder};
use crate::error::{Error, OpKind, Result};
use crate::runtime::{RawResult, Runtime};

/// Run one native primitive for `count` elements of `datatype`.
///
/// `call` receives the count and datatype to hand to the primitive and is
/// invoked at most once: with the caller's own values when the count fits,
/// otherwise with `1` and a composite datatype that is released afterwards
/// whether or not the call succeeded. When construction fails `call` is not
/// invoked at all.
pub(crate) fn apply<R, F>(
    builder: &DescriptorBuilder<'_, R>,
    op: OpKind,
    count: i64,
    datatype: R::Datatype,
    call: F,
) -> Result<()>
where
    R: Runtime,
    F: FnOnce(i32, R::Datatype) -> RawResult<()>,
{
    match builder.build(count, datatype)? {
        Descriptor::Native { count, datatype } => {
            trace!(%op, count, "native call");
            call(count, datatype).map_err(|code| Error::Operation { op, code })
        }
        Descriptor::Composite(big) => {
            debug!(%op, count, bytes = big.byte_size(), "large-count call");
            let outcome = call(1, big.datatype());
            let released = big.free();
            if let Err(code) = outcome {
                if let Err(lost) = released {
                    warn!(%op, code, release = %lost, "releasing large-count datatype failed after a failed call");
                }
                return Err(Error::Operation { op, code });
            }
            released.map_err(Error::after_transfer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::sim::{Call, Fault, SimRuntime, SimType, SimWorld};
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn runtime() -> SimRuntime {
        SimWorld::new(1).remove(0)
    }

    fn small() -> Limits {
        Limits::default().with_threshold(8).with_max_block(7)
    }

    #[test]
    fn native_arguments_pass_through() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        let seen = Cell::new(None);
        apply(&builder, OpKind::Send, 8, SimType::INT, |count, ty| {
            seen.set(Some((count, ty)));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.get(), Some((8, SimType::INT)));
        assert_eq!(rt.live_types(), 0);
    }

    #[test]
    fn native_failure_is_an_operation_error() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        let err = apply(&builder, OpKind::Broadcast, 3, SimType::INT, |_, _| Err(5)).unwrap_err();
        assert_eq!(
            err,
            Error::Operation {
                op: OpKind::Broadcast,
                code: 5
            }
        );
    }

    #[test]
    fn composite_call_uses_count_one() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        let seen = Cell::new(None);
        apply(&builder, OpKind::WriteAt, 9, SimType::BYTE, |count, ty| {
            seen.set(Some((count, ty)));
            assert_eq!(rt.type_size(ty), Ok(9));
            assert!(rt.is_committed(ty));
            Ok(())
        })
        .unwrap();
        let (count, ty) = seen.get().unwrap();
        assert_eq!(count, 1);
        assert_ne!(ty, SimType::BYTE);
        assert_eq!(rt.live_types(), 0);
    }

    #[test]
    fn failed_call_still_releases() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        rt.inject_nth(Call::TypeFree, 2, Fault::Fail(8));
        let err = apply(&builder, OpKind::Recv, 30, SimType::BYTE, |_, _| Err(4)).unwrap_err();
        // The call's own failure wins over the release failure.
        assert_eq!(
            err,
            Error::Operation {
                op: OpKind::Recv,
                code: 4
            }
        );
        let frees = rt
            .trace()
            .iter()
            .filter(|t| t.call == Call::TypeFree)
            .count();
        assert_eq!(frees, 3);
    }

    /// Counts `WARN` events seen while installed.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings(f: impl FnOnce()) -> usize {
        let seen = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&seen)));
        tracing::subscriber::with_default(subscriber, f);
        seen.load(Ordering::SeqCst)
    }

    #[test]
    fn double_failure_logs_the_lost_release() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        // chunk and remainder frees succeed, the composite's fails
        rt.inject_nth(Call::TypeFree, 2, Fault::Fail(8));
        let mut result = Ok(());
        let warnings = count_warnings(|| {
            result = apply(&builder, OpKind::WriteAtAll, 30, SimType::BYTE, |_, _| Err(4));
        });
        assert_eq!(
            result,
            Err(Error::Operation {
                op: OpKind::WriteAtAll,
                code: 4
            })
        );
        assert_eq!(warnings, 1);
    }

    #[test]
    fn failed_call_with_clean_release_is_quiet() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        let warnings = count_warnings(|| {
            let err = apply(&builder, OpKind::Send, 30, SimType::BYTE, |_, _| Err(4)).unwrap_err();
            assert_eq!(err.code(), 4);
        });
        assert_eq!(warnings, 0);
        assert_eq!(rt.live_types(), 0);
    }

    #[test]
    fn release_failure_after_success_is_advisory() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        rt.inject_nth(Call::TypeFree, 2, Fault::Fail(8));
        let err = apply(&builder, OpKind::ReadAt, 30, SimType::BYTE, |_, _| Ok(())).unwrap_err();
        assert_eq!(
            err,
            Error::Release {
                code: 8,
                after_transfer: true
            }
        );
        assert!(err.is_advisory());
    }

    #[test]
    fn construction_failure_skips_the_call() {
        let rt = runtime();
        let builder = DescriptorBuilder::new(&rt, small()).unwrap();
        rt.inject_nth(Call::TypeCreateStruct, 0, Fault::Fail(11));
        let called = Cell::new(false);
        let err = apply(&builder, OpKind::Send, 30, SimType::BYTE, |_, _| {
            called.set(true);
            Ok(())
        })
        .unwrap_err();
        assert!(!called.get());
        assert_eq!(err.code(), 11);
        assert_eq!(rt.live_types(), 0);
    }
}
