use std::sync::{Arc, atomic::Ordering};

use anyhow::Context;
use clap::Parser as _;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fucarede::{
    cli::Cli,
    config::Config,
    filter,
    pipeline::Pipeline,
    sink::{Sink, SinkSet, report::ReportSink, stdout::StdoutSink},
    source::live::LiveSource,
    stats::Aggregator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let config = Config::new(&cli).context("failed to load configuration")?;
    info!(
        event_name = "startup.config_loaded",
        interface = %config.interface,
        summary_interval = ?config.summary_interval,
        queue_capacity = config.queue_capacity,
        "configuration loaded"
    );

    // A bad filter is a startup error, never a silent pass-all.
    let filter_expr = match &config.filter {
        Some(text) => {
            let expr = filter::compile(text)
                .with_context(|| format!("invalid filter expression: {text}"))?;
            info!(event_name = "startup.filter_compiled", filter = %text, "filter active");
            Some(expr)
        }
        None => None,
    };

    let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(StdoutSink::new(config.output))];
    if let Some(path) = &config.report_path {
        sinks.push(Box::new(ReportSink::new(path.clone())));
    }
    let sinks = Arc::new(SinkSet::new(sinks));
    let aggregator = Arc::new(Aggregator::new(config.scan_config()));

    let source = LiveSource::open(&config.interface)
        .with_context(|| format!("failed to open interface {}", config.interface))?;
    let stop_flag = source.stop_flag();

    let pipeline = Pipeline::new(&config, aggregator, sinks);
    let handle = pipeline.handle();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(
                event_name = "shutdown.signal_failed",
                error.message = %e,
                "failed to listen for ctrl-c"
            );
            return;
        }
        info!(event_name = "shutdown.requested", "ctrl-c received, stopping");
        stop_flag.store(true, Ordering::Release);
        handle.cancel();
    });

    pipeline.run(Box::new(source), filter_expr).await?;

    let counters = pipeline.counters();
    info!(
        event_name = "shutdown.complete",
        frames_seen = counters.frames_seen,
        records_emitted = counters.records_emitted,
        decode_drops = counters.decode_drops,
        filtered_out = counters.filtered_out,
        queue_drops = counters.queue_drops,
        "exited cleanly"
    );
    Ok(())
}

fn init_tracing(level: tracing::Level) {
    let fmt_layer = fmt::layer().with_ansi(std::env::var("NO_COLOR").is_err());
    let filter = EnvFilter::new(format!("warn,fucarede={level}"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
