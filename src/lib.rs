pub mod cli;
pub mod netutils;
pub mod pipeline;
pub mod probes;
pub mod queue;
pub mod stats;
pub mod types;

pub use pipeline::{Pipeline, PipelineConfig};

use std::sync::Once;

static TRACING: Once = Once::new();

/// Initialize tracing once; safe to call from every test.
/// RUST_LOG controls the filter, default "info".
pub fn init_tracing() {
    TRACING.call_once(|| {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    });
}
