// ABOUTME: Main entry point for docksock
//
// Binary: docksock
// Usage: docksock [OPTIONS]
// Serves a directory of mappings on the first port, then scans for sockets
// forever, exposing each new match on the next free port.

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

use docksock::cli::{Cli, LogFormat};
use docksock::expose::Exposer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve()?;
    setup_logging(config.verbose, cli.log_format);

    // Fatal errors are reported once, by anyhow, when main returns
    let exposer = Exposer::new(&config)?;
    exposer.run().await?;

    Ok(())
}

/// Verbose logging goes to stdout; otherwise only errors, to stderr.
fn setup_logging(verbose: bool, format: LogFormat) {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::prelude::*;

    let (default_filter, writer) = if verbose {
        ("docksock=debug", BoxMakeWriter::new(std::io::stdout))
    } else {
        ("docksock=error", BoxMakeWriter::new(std::io::stderr))
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(writer))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json() // Output in JSON Lines format
                    .with_target(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .with(filter)
            .init(),
    }
}
