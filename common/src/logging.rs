use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level` when it is set.
pub fn init(default_level: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}
