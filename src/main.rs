use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::time::Duration;

use mxwatch::cli::Cli;
use mxwatch::netutils::IgnoredHosts;
use mxwatch::probes::StarttlsProbeRunner;
use mxwatch::queue::{JsonlSink, MemoryQueue};
use mxwatch::{Pipeline, PipelineConfig};

fn load_targets(path: &str) -> Result<Vec<String>> {
    let f = File::open(path).with_context(|| format!("open targets file {path}"))?;
    let mut hosts = Vec::new();
    for line in BufReader::new(f).lines() {
        let line = line?;
        let host = line.trim();
        if host.is_empty() || host.starts_with('#') {
            continue;
        }
        hosts.push(host.to_string());
    }
    Ok(hosts)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    mxwatch::init_tracing();

    let queue = MemoryQueue::new(
        Duration::from_secs(cli.visibility_timeout_secs.max(1)),
        cli.poll_batch_size,
    );
    let targets = load_targets(&cli.targets)?;
    eprintln!("Seeding queue with {} hosts from {}", targets.len(), &cli.targets);
    for host in &targets {
        queue.push(host);
    }

    let sink = JsonlSink::create(&cli.results_out)?;
    let runner = StarttlsProbeRunner::new(cli.smtp_port, cli.probe_timeout_ms);
    let ignored = IgnoredHosts::from_list(&cli.ignored_hosts);

    let pipeline = Pipeline::start(
        PipelineConfig::from_cli(&cli),
        queue.clone(),
        sink,
        runner,
        ignored,
    );

    tokio::signal::ctrl_c().await?;
    eprintln!("Received interrupt, draining pipeline...");
    pipeline.shutdown().await?;
    eprintln!("Done. {} messages still queued or awaiting redelivery.", queue.outstanding());
    Ok(())
}
