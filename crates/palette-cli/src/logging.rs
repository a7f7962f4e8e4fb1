//! Logging setup from the `logging` config section.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use palette_core::config::LoggingConfig;

/// Filter directives for `config`; `verbose` forces `debug`.
pub fn filter_directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    let mut directives = vec![level.to_string()];
    directives.extend(config.filters.iter().cloned());
    directives.join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over the config when set.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(config, verbose)))?;

    let writer = if config.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_writer(writer)).try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            level: Some("warn".into()),
            filters: vec!["palette_agent=debug".into(), "tower_http=info".into()],
            ..Default::default()
        };
        assert_eq!(
            filter_directives(&config, false),
            "warn,palette_agent=debug,tower_http=info"
        );
        assert!(filter_directives(&config, true).starts_with("debug,"));
        assert_eq!(filter_directives(&LoggingConfig::default(), false), "info");
    }
}
