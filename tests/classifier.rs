use anyhow::{bail, Result};
use async_trait::async_trait;
use mxwatch::pipeline::classify::HostClassifier;
use mxwatch::probes::ProbeRunner;
use mxwatch::types::{Responsiveness, TlsTestResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Canary stand-in with a scripted delay or failure.
struct ScriptedRunner {
    delay: Option<Duration>, // None = never resolves
    fail: bool,
    calls: AtomicU64,
}

impl ScriptedRunner {
    fn resolving_in(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            fail: false,
            calls: AtomicU64::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            delay: None,
            fail: false,
            calls: AtomicU64::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            delay: Some(Duration::from_millis(1)),
            fail: true,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ProbeRunner for ScriptedRunner {
    async fn run_battery(&self, host: &str) -> Result<TlsTestResult> {
        Ok(TlsTestResult::new(host, 25))
    }

    async fn run_single(&self, host: &str, _check: usize) -> Result<TlsTestResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.delay {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
        if self.fail {
            bail!("canary refused");
        }
        Ok(TlsTestResult::new(host, 25))
    }
}

#[tokio::test(start_paused = true)]
async fn quick_canary_classifies_fast() {
    let runner = ScriptedRunner::resolving_in(Duration::from_millis(10));
    let classifier = HostClassifier::new(runner.clone(), Duration::from_secs(5));

    let got = classifier.classify("mx1.example.com").await;
    assert_eq!(got, Responsiveness::Fast);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_canary_classifies_slow() {
    let runner = ScriptedRunner::hanging();
    let classifier = HostClassifier::new(runner.clone(), Duration::from_secs(5));

    // The probe never resolves; only the threshold timer can win the race,
    // and the caller must come back instead of hanging with the probe.
    let got = classifier.classify("mx1.example.com").await;
    assert_eq!(got, Responsiveness::Slow);
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_canary_classifies_unknown() {
    let runner = ScriptedRunner::failing();
    let classifier = HostClassifier::new(runner.clone(), Duration::from_secs(5));

    let got = classifier.classify("mx1.example.com").await;
    assert_eq!(got, Responsiveness::Unknown);
}

#[tokio::test(start_paused = true)]
async fn one_race_per_call() {
    let runner = ScriptedRunner::resolving_in(Duration::from_millis(1));
    let classifier = HostClassifier::new(runner.clone(), Duration::from_secs(5));

    for _ in 0..3 {
        let got = classifier.classify("mx1.example.com").await;
        assert_eq!(got, Responsiveness::Fast);
    }
    assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
}
