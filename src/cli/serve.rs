use anyhow::{Context, Result};
use clap::Args;
use policyd_event_bus::{to_mpsc, Envelope, InMemoryBus};
use tokio::signal;
use tracing::{info, warn};

use super::context::CliContext;
use crate::metrics;

const CHANGE_BUS_CAPACITY: usize = 256;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Metrics server port (set to 0 to disable)
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let bus = InMemoryBus::<Envelope>::new(CHANGE_BUS_CAPACITY);
    let mut changes = to_mpsc(bus.clone(), CHANGE_BUS_CAPACITY);
    let engine = ctx
        .build_engine()?
        .with_bus(bus)
        .start()
        .await
        .context("initial policy rebuild failed")?;
    if let Err(err) = engine.publish_init().await {
        warn!(%err, "startup rebuild was not announced");
    }

    let _metrics_server = metrics::spawn_metrics_server(args.metrics_port);
    let reconciler = engine.spawn_reconciler();
    let announcer = tokio::spawn(async move {
        while let Some(envelope) = changes.recv().await {
            info!(topic = %envelope.topic, payload = %envelope.payload, "policy change");
        }
    });

    info!(
        revision = engine.revision(),
        interval = %humantime::format_duration(ctx.config().reconcile.interval),
        "policyd running; press Ctrl-C to stop"
    );
    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    reconciler.abort();
    announcer.abort();
    Ok(())
}
