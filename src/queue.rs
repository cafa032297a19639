use crate::types::{PendingTest, TlsTestResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Pull queue of hosts awaiting a test. Long-poll semantics: an empty queue
/// may block the caller briefly before returning an empty batch.
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn get_pending_hosts(&self) -> Result<Vec<PendingTest>>;
    /// Acknowledge one delivery. The receipt handle must come from the
    /// delivery being acknowledged, not an earlier one.
    async fn delete_message(&self, message_id: &str, receipt_handle: &str) -> Result<()>;
}

pub type QueueHandle = Arc<dyn QueueSource>;

/// Destination for finished test results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, result: &TlsTestResult, destination_topic: &str) -> Result<()>;
}

pub type SinkHandle = Arc<dyn ResultSink>;

struct InFlight {
    host: String,
    receipt_handle: String,
    redeliver_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(String, String)>, // (message_id, host)
    in_flight: HashMap<String, InFlight>,
}

/// In-process queue with at-least-once delivery. A delivered message moves to
/// an in-flight map; if it is not deleted before the visibility timeout it is
/// redelivered with a fresh receipt handle.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
    batch_size: usize,
    seq: AtomicU64,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration, batch_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
            batch_size: batch_size.max(1),
            seq: AtomicU64::new(0),
        })
    }

    pub fn push(&self, host: &str) {
        let id = format!("msg-{}", self.seq.fetch_add(1, Ordering::Relaxed));
        self.state
            .lock()
            .expect("queue state lock poisoned")
            .ready
            .push_back((id, host.to_string()));
        self.notify.notify_one();
    }

    /// Messages currently queued or awaiting acknowledgement.
    pub fn outstanding(&self) -> usize {
        let state = self.state.lock().expect("queue state lock poisoned");
        state.ready.len() + state.in_flight.len()
    }

    fn take_batch(&self) -> Vec<PendingTest> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("queue state lock poisoned");

        // Visibility timeouts first: anything not deleted in time goes back
        // to the front of the ready queue.
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.redeliver_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(f) = state.in_flight.remove(&id) {
                state.ready.push_front((id, f.host));
            }
        }

        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            let Some((id, host)) = state.ready.pop_front() else {
                break;
            };
            let receipt = format!("rcpt-{}", self.seq.fetch_add(1, Ordering::Relaxed));
            state.in_flight.insert(
                id.clone(),
                InFlight {
                    host: host.clone(),
                    receipt_handle: receipt.clone(),
                    redeliver_at: now + self.visibility_timeout,
                },
            );
            batch.push(PendingTest {
                host,
                message_id: id,
                receipt_handle: receipt,
            });
        }
        batch
    }
}

#[async_trait]
impl QueueSource for MemoryQueue {
    async fn get_pending_hosts(&self) -> Result<Vec<PendingTest>> {
        let batch = self.take_batch();
        if !batch.is_empty() {
            return Ok(batch);
        }
        // Long poll: wait briefly for a push or a visibility expiry, then
        // sweep once more. An empty result is a normal outcome.
        let _ = tokio::time::timeout(Duration::from_secs(1), self.notify.notified()).await;
        Ok(self.take_batch())
    }

    async fn delete_message(&self, message_id: &str, receipt_handle: &str) -> Result<()> {
        let mut state = self.state.lock().expect("queue state lock poisoned");
        match state.in_flight.get(message_id) {
            Some(f) if f.receipt_handle == receipt_handle => {
                state.in_flight.remove(message_id);
                Ok(())
            }
            Some(_) => bail!("receipt handle for {message_id} is no longer valid"),
            None => bail!("message {message_id} is not awaiting acknowledgement"),
        }
    }
}

/// Appends one JSON object per published result. Stands in for the pub-sub
/// transport the service normally publishes to.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &str) -> Result<Arc<Self>> {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open results file {path}"))?;
        Ok(Arc::new(Self {
            writer: Mutex::new(BufWriter::new(f)),
        }))
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn publish(&self, result: &TlsTestResult, destination_topic: &str) -> Result<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "topic": destination_topic,
            "result": result,
        }))?;
        let mut w = self.writer.lock().expect("results writer lock poisoned");
        writeln!(w, "{line}")?;
        w.flush()?;
        Ok(())
    }
}
