//! Helpers shared by the integration tests.
//!
//! The runtimes are scaled down: the native primitives accept at most
//! [`THRESHOLD`] elements and composite chunks hold [`MAX_BLOCK`], so the
//! large-count path runs on buffers of a few dozen bytes.

#![allow(dead_code)]

use std::thread;

use largecount::sim::{SimRuntime, SimWorld};
use largecount::Limits;

pub const THRESHOLD: i64 = 8;
pub const MAX_BLOCK: i64 = 7;

pub fn small_limits() -> Limits {
    Limits::default()
        .with_threshold(THRESHOLD)
        .with_max_block(MAX_BLOCK)
}

/// Run `body` once per participant, each on its own thread, and collect the
/// results in rank order.
pub fn spmd<T, F>(size: usize, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(SimRuntime) -> T + Sync,
{
    let world = SimWorld::with_native_limit(size, THRESHOLD as i32);
    let body = &body;
    thread::scope(|s| {
        let handles: Vec<_> = world
            .into_iter()
            .map(|rt| s.spawn(move || body(rt)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("participant panicked"))
            .collect()
    })
}

/// Route `tracing` output through the test harness; `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
