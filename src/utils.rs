use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("argus=info"));
        // A subscriber installed by a test harness is fine to keep
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(tracing_subscriber::fmt::time::uptime())
            .try_init();
    });
}

/// Reduce a stream locator to something usable as a directory name
pub fn make_safe_for_filename(input: &str) -> String {
    let kept: String = input
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ')
        .collect();
    kept.trim_end().to_string()
}
