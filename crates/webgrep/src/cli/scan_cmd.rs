//! `webgrep <URL> <PATTERN>...`: run one scan and print the report.

use super::output::{self, Styled};
use super::{Cli, OutputFormat};
use crate::config::ScanConfig;
use crate::events::{EventSink, JsonlSink, MultiSink, ProgressSink, TracingSink};
use crate::matching::PatternSet;
use crate::pipeline::TransformPipeline;
use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::debug;

/// Run the scan. Returns the process exit code.
pub async fn run(cli: &Cli) -> Result<i32> {
    let s = Styled::new();

    let mut config = ScanConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let patterns = PatternSet::compile(&cli.pattern_list(), config.pattern_mode, config.case_insensitive)?;

    let mut sinks = MultiSink::new().with(Arc::new(TracingSink));
    if let Some(path) = &cli.events {
        let jsonl = JsonlSink::open(path)?;
        debug!(scan_id = jsonl.scan_id(), "event log at {}", path.display());
        sinks = sinks.with(Arc::new(jsonl));
    }
    let show_progress =
        cli.format == OutputFormat::Text && !output::is_quiet() && std::io::stderr().is_terminal();
    if show_progress {
        sinks = sinks.with(Arc::new(ProgressSink::new()));
    }
    let events: Arc<dyn EventSink> = Arc::new(sinks);

    let pipeline = TransformPipeline::new(config, patterns)?.with_events(events);

    let cancel = pipeline.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = pipeline
        .run(&cli.url)
        .await
        .with_context(|| format!("cannot scan {}", cli.url))?;
    ctrl_c.abort();

    match cli.format {
        OutputFormat::Json => output::print_json(&result.to_json()),
        OutputFormat::Text => output::print_text(&s, &result),
    }

    Ok(result.exit_code())
}
