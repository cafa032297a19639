use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message pulled from the pending-hosts queue. The receipt handle is
/// what the queue wants back when the message is deleted; it changes on
/// every redelivery.
#[derive(Debug, Clone)]
pub struct PendingTest {
    pub host: String,
    pub message_id: String,
    pub receipt_handle: String,
}

/// How responsive a host looked when the canary probe raced the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Responsiveness {
    Unknown,
    Fast,
    Slow,
}

/// Per-item state carried through the pipeline. Moves wholly from stage to
/// stage over channels; exactly one stage owns it at any instant.
#[derive(Debug)]
pub struct TestDetails {
    pub pending: PendingTest,
    pub normalized_host: String,
    pub skip_testing: bool,
    pub responsiveness: Responsiveness,
    pub result: Option<TlsTestResult>,
    pub published: bool,
}

impl TestDetails {
    pub fn new(pending: PendingTest, normalized_host: String) -> Self {
        Self {
            pending,
            normalized_host,
            skip_testing: false,
            responsiveness: Responsiveness::Unknown,
            result: None,
            published: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckResult {
    pub name: String,
    pub outcome: CheckOutcome,
    pub evidence: Option<String>,
}

impl CheckResult {
    pub fn new(name: &str, outcome: CheckOutcome, evidence: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            evidence,
        }
    }
}

/// Outcome of a probe battery against one MX host.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsTestResult {
    pub host: String,
    pub port: u16,
    pub checks: Vec<CheckResult>,
    pub tested_at: DateTime<Utc>,
}

impl TlsTestResult {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            checks: Vec::new(),
            tested_at: Utc::now(),
        }
    }

    /// True when no check failed or errored.
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.outcome == CheckOutcome::Pass)
    }
}
