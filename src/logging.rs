use anyhow::Result;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Defaults to `INFO`; override per module with `RUST_LOG`
/// (e.g. `RUST_LOG=dynastore::store::gsi=debug`).
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let subscriber = fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
