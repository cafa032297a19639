use std::time::Duration;
use tracing::debug;

use crate::probes::{RunnerHandle, CANARY_CHECK};
use crate::types::Responsiveness;

/// Estimates how responsive a host is by racing one canary probe (the
/// cheapest check in the battery) against the slow-response threshold.
pub struct HostClassifier {
    runner: RunnerHandle,
    threshold: Duration,
}

impl HostClassifier {
    pub fn new(runner: RunnerHandle, threshold: Duration) -> Self {
        Self { runner, threshold }
    }

    /// One race per call. If the timer wins, the canary task is left running
    /// detached; there is no guarantee the underlying network call stops,
    /// only that nobody waits on it.
    pub async fn classify(&self, host: &str) -> Responsiveness {
        let runner = self.runner.clone();
        let probe_host = host.to_string();
        let mut canary =
            tokio::spawn(async move { runner.run_single(&probe_host, CANARY_CHECK).await });

        tokio::select! {
            joined = &mut canary => match joined {
                Ok(Ok(_)) => Responsiveness::Fast,
                Ok(Err(e)) => {
                    debug!(host, error = %e, "canary probe failed");
                    Responsiveness::Unknown
                }
                Err(e) => {
                    debug!(host, error = %e, "canary probe task died");
                    Responsiveness::Unknown
                }
            },
            _ = tokio::time::sleep(self.threshold) => {
                debug!(host, "canary probe still running past threshold");
                Responsiveness::Slow
            }
        }
    }
}
