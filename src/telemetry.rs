// Logging setup shared by the CLI and the server.
//
// RUST_LOG controls the filter (default "info"). Output goes to stderr so
// CLI commands that write CSV to stdout stay clean.

use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    debug!("Telemetry initialized");
    Ok(())
}
