//! Subscriber setup for the binary. Library code only emits through
//! `tracing` macros.
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter directives for `-v` counts: none warns, `-v` info, `-vv` debug,
/// more traces.
pub fn verbosity_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "nodegen=info",
        2 => "nodegen=debug",
        _ => "nodegen=trace",
    }
}

/// `RUST_LOG` wins; then an explicit `-v`; then the settings file; then warn.
pub fn filter_directives(env: Option<&str>, verbose: u8, settings: Option<&str>) -> String {
    match (env, verbose, settings) {
        (Some(env), _, _) if !env.trim().is_empty() => env.to_string(),
        (_, 0, Some(settings)) => settings.to_string(),
        (_, verbose, _) => verbosity_filter(verbose).to_string(),
    }
}

/// Installs a stderr subscriber. Fails if one is already installed.
pub fn init(verbose: u8, settings_filter: Option<&str>) -> anyhow::Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directives = filter_directives(env.as_deref(), verbose, settings_filter);
    let filter = EnvFilter::try_new(&directives)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()?;
    tracing::debug!(%directives, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        assert_eq!(filter_directives(Some("trace"), 2, Some("info")), "trace");
        assert_eq!(filter_directives(None, 2, Some("info")), "nodegen=debug");
        assert_eq!(filter_directives(Some(" "), 0, Some("nodegen=info")), "nodegen=info");
        assert_eq!(filter_directives(None, 0, None), "warn");
    }
}
