//! Tracing subscriber setup.
//!
//! Level precedence: `RUST_LOG`, then `--verbose`, then `logging.level` from
//! the config file. `logging.filters` directives are added on top.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use triad_core::config::LoggingConfig;

fn base_filter(logging: &LoggingConfig, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build the filter; returns directives that failed to parse.
fn build_filter(logging: &LoggingConfig, verbose: bool) -> (EnvFilter, Vec<String>) {
    let mut filter = base_filter(logging, verbose);
    let mut rejected = Vec::new();
    for directive in &logging.filters {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(_) => rejected.push(directive.clone()),
        }
    }
    (filter, rejected)
}

pub fn init(logging: &LoggingConfig, verbose: bool) {
    let (filter, rejected) = build_filter(logging, verbose);
    let writer = if logging.output == "stdout" {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(std::io::stderr)
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    for directive in rejected {
        tracing::warn!(directive = %directive, "Ignoring invalid log filter");
    }
}
