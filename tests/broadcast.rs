mod common;

use common::{init_tracing, small_limits, spmd, THRESHOLD};
use largecount::sim::{Call, SimType};
use largecount::{as_bytes_mut, LargeCount};

fn pattern(i: usize) -> i16 {
    (i as i16).wrapping_mul(31).wrapping_add(1)
}

#[test]
fn broadcast_past_threshold_reaches_every_rank() {
    init_tracing();
    let n = (2 * THRESHOLD + 5) as usize;

    let results = spmd(2, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        let mut data: Vec<i16> = if rt.rank() == 0 {
            (0..n).map(pattern).collect()
        } else {
            vec![0; n]
        };
        lc.broadcast(as_bytes_mut(&mut data), n as i64, SimType::SHORT, 0, &comm)
            .unwrap();
        assert_eq!(rt.live_types(), 0);
        data
    });

    for data in &results {
        assert_eq!(data[0], pattern(0));
        assert_eq!(data[1], pattern(1));
        assert_eq!(data[n - 1], pattern(n - 1));
        assert!(data.iter().enumerate().all(|(i, &v)| v == pattern(i)));
    }
}

#[test]
fn broadcast_from_non_zero_root() {
    let n = 3 * THRESHOLD as usize;

    let results = spmd(3, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        let mut data = vec![rt.rank() as u8; n];
        lc.broadcast(&mut data, n as i64, SimType::BYTE, 2, &comm)
            .unwrap();
        data
    });

    for data in results {
        assert_eq!(data, vec![2u8; n]);
    }
}

#[test]
fn broadcast_at_threshold_stays_native() {
    let results = spmd(2, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        let mut data = vec![rt.rank() as u8 + 1; THRESHOLD as usize];
        lc.broadcast(&mut data, THRESHOLD, SimType::BYTE, 0, &comm)
            .unwrap();
        (data, rt.trace())
    });

    for (data, trace) in results {
        assert_eq!(data, vec![1u8; THRESHOLD as usize]);
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].call, Call::Bcast);
        assert_eq!(trace[0].count, Some(THRESHOLD as i32));
    }
}

#[test]
fn composite_broadcast_is_one_call_with_count_one() {
    let n = THRESHOLD + 1;

    let traces = spmd(2, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        let mut data = vec![0i32; n as usize];
        lc.broadcast(as_bytes_mut(&mut data), n, SimType::INT, 0, &comm)
            .unwrap();
        rt.trace()
    });

    for trace in traces {
        let bcasts: Vec<_> = trace.iter().filter(|t| t.call == Call::Bcast).collect();
        assert_eq!(bcasts.len(), 1);
        assert_eq!(bcasts[0].count, Some(1));
        // vector, remainder and struct, all freed
        let frees = trace.iter().filter(|t| t.call == Call::TypeFree).count();
        assert_eq!(frees, 3);
    }
}
