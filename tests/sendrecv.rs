mod common;

use common::{small_limits, spmd, MAX_BLOCK, THRESHOLD};
use largecount::sim::{code, Call, SimType, SimWorld};
use largecount::{as_bytes, as_bytes_mut, Error, LargeCount, OpKind, Status};

/// Rank 0 sends `n` ints to rank 1, which sends them back.
fn round_trip(n: i64) -> (Vec<i32>, Status) {
    let mut results = spmd(2, move |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        let mut status = Status::default();
        let mut data: Vec<i32> = vec![0; n as usize];
        if rt.rank() == 0 {
            let sent: Vec<i32> = (0..n as i32).map(|i| i * i - 7).collect();
            lc.send(as_bytes(&sent), n, SimType::INT, 1, 3, &comm)
                .unwrap();
            lc.recv(
                as_bytes_mut(&mut data),
                n,
                SimType::INT,
                1,
                4,
                &comm,
                Some(&mut status),
            )
            .unwrap();
            assert_eq!(data, sent);
        } else {
            lc.recv(as_bytes_mut(&mut data), n, SimType::INT, 0, 3, &comm, None)
                .unwrap();
            lc.send(as_bytes(&data), n, SimType::INT, 0, 4, &comm)
                .unwrap();
        }
        assert_eq!(rt.live_types(), 0);
        (data, status)
    });
    results.swap_remove(0)
}

#[test]
fn round_trip_above_threshold() {
    // chunk counts stay within the scaled-down native limit
    for n in [THRESHOLD + 1, 2 * MAX_BLOCK, 2 * MAX_BLOCK + 5, 7 * MAX_BLOCK + 6] {
        let (data, status) = round_trip(n);
        assert_eq!(data.len(), n as usize);
        assert_eq!(status.source, 1);
        assert_eq!(status.tag, 4);
        assert_eq!(status.bytes, n * 4, "status for count {n}");
    }
}

#[test]
fn round_trip_below_threshold_matches_native() {
    let (data, status) = round_trip(5);
    assert_eq!(data, vec![-7, -6, -3, 2, 9]);
    assert_eq!(status.bytes, 20);
}

#[test]
fn receive_into_larger_buffer_reports_actual_bytes() {
    let results = spmd(2, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        if rt.rank() == 0 {
            let sent = vec![9u8; 10];
            lc.send(&sent, 10, SimType::BYTE, 1, 0, &comm).unwrap();
            None
        } else {
            let mut buf = vec![0u8; 20];
            let mut status = Status::default();
            lc.recv(&mut buf, 20, SimType::BYTE, 0, 0, &comm, Some(&mut status))
                .unwrap();
            Some((buf, status))
        }
    });

    let (buf, status) = results[1].clone().unwrap();
    assert_eq!(status.bytes, 10);
    assert_eq!(&buf[..10], &[9u8; 10]);
    assert_eq!(&buf[10..], &[0u8; 10]);
}

#[test]
fn truncated_receive_is_an_operation_error() {
    let results = spmd(2, |rt| {
        let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
        let comm = rt.world();
        if rt.rank() == 0 {
            lc.send(&[1u8; 20], 20, SimType::BYTE, 1, 0, &comm)
        } else {
            let mut buf = vec![0u8; 10];
            let result = lc.recv(&mut buf, 10, SimType::BYTE, 0, 0, &comm, None);
            assert_eq!(rt.live_types(), 0);
            result
        }
    });

    assert_eq!(results[0], Ok(()));
    assert_eq!(
        results[1],
        Err(Error::Operation {
            op: OpKind::Recv,
            code: code::ERR_TRUNCATE
        })
    );
}

#[test]
fn bad_destination_releases_the_composite() {
    let rt = SimWorld::with_native_limit(1, THRESHOLD as i32).remove(0);
    let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
    let err = lc
        .send(&[0u8; 30], 30, SimType::BYTE, 5, 0, &rt.world())
        .unwrap_err();
    assert_eq!(
        err,
        Error::Operation {
            op: OpKind::Send,
            code: code::ERR_RANK
        }
    );
    assert_eq!(rt.live_types(), 0);
}

#[test]
fn negative_count_never_reaches_the_runtime() {
    let rt = SimWorld::new(1).remove(0);
    let lc = LargeCount::new(&rt);
    let err = lc
        .send(&[], -1, SimType::BYTE, 0, 0, &rt.world())
        .unwrap_err();
    assert_eq!(err, Error::InvalidCount(-1));
    assert!(rt.trace().is_empty());
}

#[test]
fn buffer_too_short_for_count_is_rejected() {
    let rt = SimWorld::with_native_limit(1, THRESHOLD as i32).remove(0);
    let lc = LargeCount::with_limits(&rt, small_limits()).unwrap();
    let err = lc
        .send(&[0u8; 12], 13, SimType::BYTE, 0, 0, &rt.world())
        .unwrap_err();
    assert_eq!(err.code(), code::ERR_BUFFER);
    assert!(rt
        .trace()
        .iter()
        .any(|t| t.call == Call::Send && t.count == Some(1)));
    assert_eq!(rt.live_types(), 0);
}
