use colored::Colorize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pipeline::{ledger::RetestLedger, reserve::ReservationSet};

/// Counters every stage bumps as items move through. Read-only consumers
/// (the stats printer, tests) see a consistent-enough snapshot.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub polled: AtomicU64,
    pub skipped: AtomicU64,
    pub reservation_rejects: AtomicU64,
    pub classified_fast: AtomicU64,
    pub classified_slow: AtomicU64,
    pub classified_unknown: AtomicU64,
    pub tested: AtomicU64,
    pub overflowed: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
    pub acknowledged: AtomicU64,
}

impl PipelineCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn get(c: &AtomicU64) -> u64 {
    c.load(Ordering::Relaxed)
}

pub fn print_stats(
    counters: &PipelineCounters,
    reservations: &ReservationSet,
    ledger: &RetestLedger,
    slow_lane_depth: usize,
) {
    println!("{}", "mxwatch counters".bold());
    println!(
        "  polled: {}  skipped: {}  in-flight rejects: {}",
        get(&counters.polled),
        get(&counters.skipped),
        get(&counters.reservation_rejects),
    );
    println!(
        "  classified fast/slow/unknown: {}/{}/{}",
        get(&counters.classified_fast),
        get(&counters.classified_slow),
        get(&counters.classified_unknown),
    );
    println!(
        "  tested: {}  overflowed: {}  published: {}  publish failures: {}  acknowledged: {}",
        get(&counters.tested),
        get(&counters.overflowed),
        get(&counters.published),
        get(&counters.publish_failures),
        get(&counters.acknowledged),
    );
    println!(
        "  reservations held: {}  ledger entries: {}  slow lane depth: {}",
        reservations.host_count(),
        ledger.len(),
        slow_lane_depth,
    );
}

/// Periodic operator printout; ends when the shutdown flag flips.
pub fn spawn_stats_task(
    interval: Duration,
    counters: Arc<PipelineCounters>,
    reservations: Arc<ReservationSet>,
    ledger: Arc<RetestLedger>,
    slow_lane_depth: Arc<AtomicUsize>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would print all zeros.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    print_stats(
                        &counters,
                        &reservations,
                        &ledger,
                        slow_lane_depth.load(Ordering::Acquire),
                    );
                }
            }
        }
    })
}
