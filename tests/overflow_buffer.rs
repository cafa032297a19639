use mxwatch::pipeline::overflow::OverflowBuffer;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn full_buffer_routes_excess_to_overflow() {
    let OverflowBuffer {
        target,
        mut source,
        mut overflow,
        ..
    } = OverflowBuffer::<u32>::new(4);

    // Nobody consumes the kept side yet, so only `capacity` items fit.
    for v in 0..10u32 {
        target.send(v).unwrap();
    }

    let mut overflowed = Vec::new();
    for _ in 0..6 {
        let v = timeout(Duration::from_secs(1), overflow.recv())
            .await
            .expect("overflow item should arrive")
            .expect("overflow closed early");
        overflowed.push(v);
    }
    assert_eq!(overflowed, vec![4, 5, 6, 7, 8, 9]);

    drop(target);
    let mut kept = Vec::new();
    while let Some(v) = source.recv().await {
        kept.push(v);
    }
    assert_eq!(kept, vec![0, 1, 2, 3]);
    assert_eq!(overflow.recv().await, None);
}

#[tokio::test]
async fn roomy_buffer_keeps_everything_in_order() {
    let OverflowBuffer {
        target,
        mut source,
        mut overflow,
        ..
    } = OverflowBuffer::<u32>::new(16);

    for v in 0..10u32 {
        target.send(v).unwrap();
    }
    drop(target);

    let mut kept = Vec::new();
    while let Some(v) = source.recv().await {
        kept.push(v);
    }
    assert_eq!(kept, (0..10).collect::<Vec<_>>());
    assert_eq!(overflow.recv().await, None);
}

#[tokio::test]
async fn consuming_the_kept_side_frees_capacity() {
    let buf = OverflowBuffer::<u32>::new(2);
    let OverflowBuffer {
        target,
        mut source,
        mut overflow,
        ..
    } = buf;

    target.send(1).unwrap();
    target.send(2).unwrap();
    assert_eq!(source.recv().await, Some(1));
    assert_eq!(source.recv().await, Some(2));

    // Capacity came back; these go to kept, not overflow.
    target.send(3).unwrap();
    target.send(4).unwrap();
    assert_eq!(source.recv().await, Some(3));
    assert_eq!(source.recv().await, Some(4));

    drop(target);
    assert_eq!(overflow.recv().await, None);
}
