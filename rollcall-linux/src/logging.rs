use tracing_subscriber::{fmt, EnvFilter};

/// Initialise tracing output to stderr. `RUST_LOG` overrides the default `info` filter.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by an embedding host.
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
