pub mod classify;
pub mod fork;
pub mod ledger;
pub mod overflow;
pub mod reserve;

pub use classify::HostClassifier;
pub use fork::{fork, ForkOutputs};
pub use ledger::RetestLedger;
pub use overflow::OverflowBuffer;
pub use reserve::ReservationSet;

use anyhow::Result;
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cli::Cli;
use crate::netutils::{normalize_host, IgnoredHosts};
use crate::probes::RunnerHandle;
use crate::queue::{QueueHandle, SinkHandle};
use crate::stats::{spawn_stats_task, PipelineCounters};
use crate::types::{Responsiveness, TestDetails};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub buffer_size: usize,
    pub publish_batch_size: usize,
    pub publish_flush_interval: Duration,
    pub tls_tester_threads: usize,
    pub slow_response_threshold: Duration,
    pub host_retest_period: Duration,
    pub print_stats_interval: Duration,
    pub destination_topic: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            publish_batch_size: 10,
            publish_flush_interval: Duration::from_secs(30),
            tls_tester_threads: 4,
            slow_response_threshold: Duration::from_secs(5),
            host_retest_period: Duration::from_secs(86_400),
            print_stats_interval: Duration::ZERO,
            destination_topic: "mx-tls-results".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            buffer_size: cli.buffer_size.max(1),
            publish_batch_size: cli.publish_batch_size.max(1),
            publish_flush_interval: Duration::from_secs(cli.publish_flush_interval_secs.max(1)),
            tls_tester_threads: cli.tls_tester_threads.max(1),
            slow_response_threshold: Duration::from_secs(cli.slow_response_threshold_secs.max(1)),
            host_retest_period: Duration::from_secs(cli.host_retest_period_secs),
            print_stats_interval: Duration::from_secs(cli.print_stats_interval_secs),
            destination_topic: cli.topic.clone(),
        }
    }
}

/// The staged testing pipeline. `start` wires every stage and returns a
/// handle; `shutdown` stops the poller and waits for everything already
/// admitted to drain out through acknowledgement.
pub struct Pipeline {
    shutdown_tx: watch::Sender<bool>,
    poll_task: JoinHandle<()>,
    ack_task: JoinHandle<()>,
    stats_task: Option<JoinHandle<()>>,
    reservations: Arc<ReservationSet>,
    ledger: Arc<RetestLedger>,
    counters: Arc<PipelineCounters>,
}

impl Pipeline {
    pub fn start(
        config: PipelineConfig,
        queue: QueueHandle,
        sink: SinkHandle,
        runner: RunnerHandle,
        ignored: IgnoredHosts,
    ) -> Self {
        let reservations = Arc::new(ReservationSet::new());
        let ledger = Arc::new(RetestLedger::new(config.host_retest_period));
        let counters = PipelineCounters::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Every path that ends a host's journey this pass funnels into the
        // flush channel: skipped, unknown, overflowed, and tested items.
        let (flush_tx, flush_rx) = mpsc::unbounded_channel::<TestDetails>();
        let (admit_tx, admit_rx) = mpsc::channel::<TestDetails>(config.buffer_size);

        // Stage 1+2: poll the queue, normalize, drop ignored/too-recent
        // hosts onto the skip path. The bounded admit channel is the
        // backpressure between queue cadence and downstream throughput.
        let poll_task = {
            let queue = queue.clone();
            let ledger = ledger.clone();
            let counters = counters.clone();
            let flush_tx = flush_tx.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    let polled = tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        polled = queue.get_pending_hosts() => polled,
                    };
                    let batch = match polled {
                        Ok(batch) => batch,
                        Err(e) => {
                            warn!("queue poll failed: {e:#}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };
                    for pending in batch {
                        counters.polled.fetch_add(1, Ordering::Relaxed);
                        let normalized = match normalize_host(&pending.host) {
                            Ok(h) => h,
                            Err(e) => {
                                warn!("unusable host on queue, acknowledging without test: {e:#}");
                                let mut details = TestDetails::new(pending, String::new());
                                details.skip_testing = true;
                                counters.skipped.fetch_add(1, Ordering::Relaxed);
                                let _ = flush_tx.send(details);
                                continue;
                            }
                        };
                        let mut details = TestDetails::new(pending, normalized);
                        if ignored.is_ignored(&details.normalized_host)
                            || ledger.contains(&details.normalized_host)
                        {
                            details.skip_testing = true;
                            counters.skipped.fetch_add(1, Ordering::Relaxed);
                            if flush_tx.send(details).is_err() {
                                return;
                            }
                            continue;
                        }
                        if admit_tx.send(details).await.is_err() {
                            return;
                        }
                    }
                }
            })
        };

        // Stage 4: reservation filter. Losing a duplicate here drops the
        // item without acknowledgement; the queue redelivers it later.
        let (classify_tx, classify_rx) = mpsc::channel::<TestDetails>(config.buffer_size);
        {
            let reservations = reservations.clone();
            let counters = counters.clone();
            let mut admit_rx = admit_rx;
            tokio::spawn(async move {
                while let Some(details) = admit_rx.recv().await {
                    if reservations.reserve(&details.normalized_host) {
                        if let Err(send_err) = classify_tx.send(details).await {
                            reservations.release(&send_err.0.normalized_host);
                            break;
                        }
                    } else {
                        counters.reservation_rejects.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            host = %details.normalized_host,
                            "already being tested, leaving message for a later poll"
                        );
                    }
                }
            });
        }

        // Stage 5: classifier pool.
        let (classified_tx, classified_rx) = mpsc::unbounded_channel::<TestDetails>();
        {
            let classifier = Arc::new(HostClassifier::new(
                runner.clone(),
                config.slow_response_threshold,
            ));
            let counters = counters.clone();
            let pool = Arc::new(Semaphore::new(config.tls_tester_threads));
            let mut classify_rx = classify_rx;
            tokio::spawn(async move {
                while let Some(mut details) = classify_rx.recv().await {
                    let permit = pool
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("classifier pool semaphore closed");
                    let classifier = classifier.clone();
                    let counters = counters.clone();
                    let out = classified_tx.clone();
                    tokio::spawn(async move {
                        details.responsiveness =
                            classifier.classify(&details.normalized_host).await;
                        let counter = match details.responsiveness {
                            Responsiveness::Fast => &counters.classified_fast,
                            Responsiveness::Slow => &counters.classified_slow,
                            Responsiveness::Unknown => &counters.classified_unknown,
                        };
                        counter.fetch_add(1, Ordering::Relaxed);
                        let _ = out.send(details);
                        drop(permit);
                    });
                }
            });
        }

        // Fork the classified stream three ways: slow lane, fast lane, and
        // unknown straight to flush (no result, so never acknowledged this
        // pass; its reservation still comes free at the final stage).
        let ForkOutputs {
            matched: slow_split,
            unmatched: rest,
        } = fork(classified_rx, |d: &TestDetails| {
            d.responsiveness == Responsiveness::Slow
        });
        let ForkOutputs {
            matched: fast_split,
            unmatched: unknown_split,
        } = fork(rest, |d: &TestDetails| {
            d.responsiveness == Responsiveness::Fast
        });

        {
            let flush_tx = flush_tx.clone();
            let mut unknown_split = unknown_split;
            tokio::spawn(async move {
                while let Some(details) = unknown_split.recv().await {
                    if flush_tx.send(details).is_err() {
                        break;
                    }
                }
            });
        }

        // Stage 7: fast lane. Bounded buffer feeding the full battery pool.
        let (fast_tx, fast_rx) = mpsc::channel::<TestDetails>(config.buffer_size);
        {
            let mut fast_split = fast_split;
            tokio::spawn(async move {
                while let Some(details) = fast_split.recv().await {
                    if fast_tx.send(details).await.is_err() {
                        break;
                    }
                }
            });
        }
        {
            let runner = runner.clone();
            let counters = counters.clone();
            let flush_tx = flush_tx.clone();
            let pool = Arc::new(Semaphore::new(config.tls_tester_threads));
            let mut fast_rx = fast_rx;
            tokio::spawn(async move {
                while let Some(mut details) = fast_rx.recv().await {
                    let permit = pool
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("fast lane semaphore closed");
                    let runner = runner.clone();
                    let counters = counters.clone();
                    let flush = flush_tx.clone();
                    tokio::spawn(async move {
                        match runner.run_battery(&details.normalized_host).await {
                            Ok(result) => {
                                details.result = Some(result);
                                counters.tested.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => warn!(
                                host = %details.normalized_host,
                                "probe battery failed: {e:#}"
                            ),
                        }
                        let _ = flush.send(details);
                        drop(permit);
                    });
                }
            });
        }

        // Stage 6: slow lane. The overflow buffer keeps memory bounded when
        // slow hosts pile up; anything past capacity bypasses testing.
        let slow_buffer = OverflowBuffer::<TestDetails>::new(config.buffer_size);
        let slow_depth = slow_buffer.depth_gauge();
        let OverflowBuffer {
            target: slow_target,
            source: mut slow_source,
            overflow: mut slow_overflow,
            ..
        } = slow_buffer;
        {
            let mut slow_split = slow_split;
            tokio::spawn(async move {
                while let Some(details) = slow_split.recv().await {
                    if slow_target.send(details).is_err() {
                        break;
                    }
                }
            });
        }
        {
            let counters = counters.clone();
            let flush_tx = flush_tx.clone();
            tokio::spawn(async move {
                while let Some(details) = slow_overflow.recv().await {
                    counters.overflowed.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        host = %details.normalized_host,
                        "slow lane full, passing host through untested"
                    );
                    if flush_tx.send(details).is_err() {
                        break;
                    }
                }
            });
        }
        {
            let runner = runner.clone();
            let counters = counters.clone();
            let flush_tx = flush_tx.clone();
            let pool = Arc::new(Semaphore::new(config.tls_tester_threads));
            tokio::spawn(async move {
                while let Some(mut details) = slow_source.recv().await {
                    let permit = pool
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("slow lane semaphore closed");
                    let runner = runner.clone();
                    let counters = counters.clone();
                    let flush = flush_tx.clone();
                    tokio::spawn(async move {
                        // Small randomized delay to avoid synchronized bursts
                        // against hosts that are already struggling.
                        let jitter = rand::thread_rng().gen_range(0..50);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        match runner.run_battery(&details.normalized_host).await {
                            Ok(result) => {
                                details.result = Some(result);
                                counters.tested.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => warn!(
                                host = %details.normalized_host,
                                "probe battery failed: {e:#}"
                            ),
                        }
                        let _ = flush.send(details);
                        drop(permit);
                    });
                }
            });
        }

        // Stages 8+9: batch accumulator with a retriggerable idle deadline.
        // Every arriving item re-arms the timer; a quiet interval flushes
        // whatever has gathered, so a trickle of results still ships.
        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<Vec<TestDetails>>();
        {
            let batch_size = config.publish_batch_size;
            let idle_interval = config.publish_flush_interval;
            let mut flush_rx = flush_rx;
            tokio::spawn(async move {
                let mut gathered: Vec<TestDetails> = Vec::new();
                loop {
                    let idle = tokio::time::sleep(idle_interval);
                    tokio::pin!(idle);
                    tokio::select! {
                        item = flush_rx.recv() => match item {
                            Some(details) => {
                                gathered.push(details);
                                if gathered.len() >= batch_size
                                    && batch_tx.send(std::mem::take(&mut gathered)).is_err()
                                {
                                    return;
                                }
                            }
                            None => break,
                        },
                        _ = &mut idle => {
                            if !gathered.is_empty()
                                && batch_tx.send(std::mem::take(&mut gathered)).is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                if !gathered.is_empty() {
                    let _ = batch_tx.send(gathered);
                }
            });
        }

        // Stage 10: publisher. One bad item never sinks the batch.
        let (ack_tx, ack_rx) = mpsc::unbounded_channel::<TestDetails>();
        {
            let sink = sink.clone();
            let counters = counters.clone();
            let topic = config.destination_topic.clone();
            let mut batch_rx = batch_rx;
            tokio::spawn(async move {
                while let Some(batch) = batch_rx.recv().await {
                    for mut details in batch {
                        if let Some(result) = details.result.as_ref() {
                            match sink.publish(result, &topic).await {
                                Ok(()) => {
                                    details.published = true;
                                    counters.published.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                                    warn!(
                                        host = %details.normalized_host,
                                        "publish failed, leaving message queued: {e:#}"
                                    );
                                }
                            }
                        }
                        if ack_tx.send(details).is_err() {
                            return;
                        }
                    }
                }
            });
        }

        // Stage 11: acknowledge. Deleting only after a durable publish (or a
        // deliberate skip) is what makes delivery at-least-once.
        let ack_task = {
            let queue = queue.clone();
            let ledger = ledger.clone();
            let reservations = reservations.clone();
            let counters = counters.clone();
            let mut ack_rx = ack_rx;
            tokio::spawn(async move {
                while let Some(details) = ack_rx.recv().await {
                    if details.published || details.skip_testing {
                        if details.published {
                            ledger.set(&details.normalized_host);
                        }
                        match queue
                            .delete_message(
                                &details.pending.message_id,
                                &details.pending.receipt_handle,
                            )
                            .await
                        {
                            Ok(()) => {
                                counters.acknowledged.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => warn!(
                                host = %details.normalized_host,
                                "delete failed, message will be redelivered: {e:#}"
                            ),
                        }
                    }
                    // Always last, on every path: the in-flight marker must
                    // come free whatever happened upstream. Releasing a host
                    // that holds no reservation is a no-op.
                    reservations.release(&details.normalized_host);
                }
            })
        };

        let stats_task = if config.print_stats_interval > Duration::ZERO {
            Some(spawn_stats_task(
                config.print_stats_interval,
                counters.clone(),
                reservations.clone(),
                ledger.clone(),
                slow_depth,
                shutdown_rx,
            ))
        } else {
            None
        };

        Self {
            shutdown_tx,
            poll_task,
            ack_task,
            stats_task,
            reservations,
            ledger,
            counters,
        }
    }

    pub fn reservations(&self) -> Arc<ReservationSet> {
        self.reservations.clone()
    }

    pub fn ledger(&self) -> Arc<RetestLedger> {
        self.ledger.clone()
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        self.counters.clone()
    }

    /// Stop polling, then wait for everything already admitted to drain
    /// through acknowledgement. Each stage ends when its input closes, so
    /// teardown cascades from the poller to the final stage.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.poll_task.await?;
        self.ack_task.await?;
        if let Some(stats) = self.stats_task {
            stats.await?;
        }
        Ok(())
    }
}
