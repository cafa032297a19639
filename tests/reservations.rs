use mxwatch::pipeline::reserve::ReservationSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn reserve_is_exclusive_until_release() {
    let set = ReservationSet::new();
    assert!(set.reserve("mx1.example.com"));
    assert!(!set.reserve("mx1.example.com"));
    assert_eq!(set.host_count(), 1);

    set.release("mx1.example.com");
    assert_eq!(set.host_count(), 0);
    assert!(set.reserve("mx1.example.com"));
}

#[test]
fn release_of_absent_host_is_a_noop() {
    let set = ReservationSet::new();
    assert!(set.reserve("mx1.example.com"));

    // Releasing something never reserved must not disturb other hosts.
    set.release("mx2.example.com");
    set.release("mx2.example.com");
    assert_eq!(set.host_count(), 1);
    assert!(!set.reserve("mx1.example.com"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reserve_storm_never_admits_two_holders() {
    let set = Arc::new(ReservationSet::new());
    let in_critical = Arc::new(AtomicBool::new(false));
    let wins = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let set = set.clone();
        let in_critical = in_critical.clone();
        let wins = wins.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..200 {
                if set.reserve("mx.example.com") {
                    // If two callers ever hold the reservation at once,
                    // one of them sees the flag already raised.
                    assert!(
                        !in_critical.swap(true, Ordering::SeqCst),
                        "two holders inside the reserved section"
                    );
                    wins.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_critical.store(false, Ordering::SeqCst);
                    set.release("mx.example.com");
                } else {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert!(wins.load(Ordering::SeqCst) > 0);
    assert_eq!(set.host_count(), 0);
}

#[test]
fn hosts_are_independent() {
    let set = ReservationSet::new();
    assert!(set.reserve("mx1.example.com"));
    assert!(set.reserve("mx2.example.com"));
    assert_eq!(set.host_count(), 2);
    set.release("mx1.example.com");
    assert!(!set.reserve("mx2.example.com"));
    assert!(set.reserve("mx1.example.com"));
}
