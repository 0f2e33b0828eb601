//! webgrep CLI.
//!
//! Environment variables:
//! - RUST_LOG: log filter (default `webgrep=warn`)
//! - WEBGREP_LOG_JSON: log as JSON lines
//! - WEBGREP_MAX_RESOURCES, WEBGREP_MAX_DEPTH, WEBGREP_CONCURRENCY,
//!   WEBGREP_TIMEOUT_MS, WEBGREP_USER_AGENT, WEBGREP_STEG_PASSPHRASE,
//!   WEBGREP_OCR_LANG: config overrides
//! - NO_COLOR / WEBGREP_NO_COLOR: plain output
//!
//! Exit codes:
//! - 0: at least one match
//! - 1: no match
//! - 2: root unreachable, invalid pattern, bad config or URL

use clap::Parser;
use tracing_subscriber::EnvFilter;
use webgrep::cli::{scan_cmd, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Output switches are read back through the env by cli::output.
    if cli.no_color {
        std::env::set_var("WEBGREP_NO_COLOR", "1");
    }
    if cli.quiet {
        std::env::set_var("WEBGREP_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("WEBGREP_VERBOSE", "1");
    }

    let filter = if cli.verbose {
        EnvFilter::new("webgrep=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webgrep=warn"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if std::env::var("WEBGREP_LOG_JSON").is_ok() {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }

    let code = match scan_cmd::run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            2
        }
    };
    std::process::exit(code);
}
