use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "mxwatch", about = "Continuous TLS/STARTTLS testing of SMTP MX hosts")]
pub struct Cli {
    /// File with one MX host per line, used to seed the pending queue
    #[arg(short, long)]
    pub targets: String,

    /// Append published results to this file, one JSON object per line
    #[arg(long, default_value = "results.jsonl")]
    pub results_out: String,

    /// Destination topic recorded with every published result
    #[arg(long, default_value = "mx-tls-results")]
    pub topic: String,

    /// Capacity of the lane buffers between stages
    #[arg(long, default_value_t = 100)]
    pub buffer_size: usize,

    /// Flush a result batch once it reaches this many items
    #[arg(long, default_value_t = 10)]
    pub publish_batch_size: usize,

    /// Force-flush an undersized batch after this many idle seconds
    #[arg(long, default_value_t = 30)]
    pub publish_flush_interval_secs: u64,

    /// Worker count for each lane pool (fast, slow, classifier)
    #[arg(long, default_value_t = 4)]
    pub tls_tester_threads: usize,

    /// Canary probes slower than this are routed to the slow lane
    #[arg(long, default_value_t = 5)]
    pub slow_response_threshold_secs: u64,

    /// Do not re-test a successfully tested host within this many seconds
    #[arg(long, default_value_t = 86400)]
    pub host_retest_period_secs: u64,

    /// Print operator counters every this many seconds (0 disables)
    #[arg(long, default_value_t = 60)]
    pub print_stats_interval_secs: u64,

    /// Comma-separated reverse-domain prefixes to never test
    /// (e.g. "com.example,org.internal")
    #[arg(long, default_value_t = String::new())]
    pub ignored_hosts: String,

    /// SMTP port probed on every host
    #[arg(long, default_value_t = 25)]
    pub smtp_port: u16,

    /// Connect/read timeout for a single probe step in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub probe_timeout_ms: u64,

    /// Undeleted queue messages are redelivered after this many seconds
    #[arg(long, default_value_t = 300)]
    pub visibility_timeout_secs: u64,

    /// Maximum messages returned by one queue poll
    #[arg(long, default_value_t = 10)]
    pub poll_batch_size: usize,
}
