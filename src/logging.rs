use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. Logs go to stderr so step reports and
/// JSON output on stdout stay clean. `RUST_LOG` overrides the default level.
///
/// `interactive` is set while the terminal reviewer owns the screen; stderr
/// lines would be drawn over its frame, so only warnings get through.
pub fn init_logging(verbose: bool, interactive: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, interactive)));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    // A second call (e.g. from tests) leaves the first subscriber in place
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init();
}

fn default_directive(verbose: bool, interactive: bool) -> String {
    let level = match (interactive, verbose) {
        (true, _) => "warn",
        (false, true) => "debug",
        (false, false) => "info",
    };
    format!("leader_clusters={}", level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_directive(false, false), "leader_clusters=info");
        assert_eq!(default_directive(true, false), "leader_clusters=debug");
    }

    #[test]
    fn test_reviewer_screen_only_gets_warnings() {
        assert_eq!(default_directive(false, true), "leader_clusters=warn");
        assert_eq!(default_directive(true, true), "leader_clusters=warn");
    }
}
