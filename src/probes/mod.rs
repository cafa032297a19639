pub mod smtp;
pub mod tls;

use crate::types::{CheckResult, TlsTestResult};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Battery checks in cost order. Check 0 is the cheapest in the battery and
/// doubles as the canary used to estimate a host's responsiveness.
pub const CHECKS: &[&str] = &["starttls", "handshake", "certificate", "legacy-protocols"];

pub const CANARY_CHECK: usize = 0;

#[async_trait]
pub trait ProbeRunner: Send + Sync {
    /// Run the full battery against one host.
    async fn run_battery(&self, host: &str) -> Result<TlsTestResult>;
    /// Run a single check by battery index.
    async fn run_single(&self, host: &str, check: usize) -> Result<TlsTestResult>;
}

pub type RunnerHandle = Arc<dyn ProbeRunner>;

/// Probes a host's SMTP service over STARTTLS. Each check runs on its own
/// SMTP session so a wedged connection cannot poison the next check.
pub struct StarttlsProbeRunner {
    port: u16,
    timeout_ms: u64,
}

impl StarttlsProbeRunner {
    pub fn new(port: u16, timeout_ms: u64) -> Arc<Self> {
        Arc::new(Self { port, timeout_ms })
    }

    async fn run_check(&self, host: &str, check: usize) -> Result<CheckResult> {
        match CHECKS.get(check).copied() {
            Some("starttls") => smtp::check_starttls(host, self.port, self.timeout_ms).await,
            Some("handshake") => tls::check_handshake(host, self.port, self.timeout_ms).await,
            Some("certificate") => tls::check_certificate(host, self.port, self.timeout_ms).await,
            Some("legacy-protocols") => {
                tls::check_legacy_protocols(host, self.port, self.timeout_ms).await
            }
            _ => bail!("no such check index: {check}"),
        }
    }
}

#[async_trait]
impl ProbeRunner for StarttlsProbeRunner {
    async fn run_battery(&self, host: &str) -> Result<TlsTestResult> {
        let mut result = TlsTestResult::new(host, self.port);
        for idx in 0..CHECKS.len() {
            result.checks.push(self.run_check(host, idx).await?);
        }
        Ok(result)
    }

    async fn run_single(&self, host: &str, check: usize) -> Result<TlsTestResult> {
        let mut result = TlsTestResult::new(host, self.port);
        result.checks.push(self.run_check(host, check).await?);
        Ok(result)
    }
}
