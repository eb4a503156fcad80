//! Live refresh loop: collect, render, sleep, repeat until Ctrl-C.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use console::{style, Term};
use rain_core::{CollectionAggregator, CollectionManifest, Config, TtlCache};
use tracing::debug;

use crate::banner;
use crate::render;

/// Re-collect every `refresh_interval_secs`. Ticks never overlap: the next
/// collection starts only after the previous render finished and the
/// interval elapsed. Ctrl-C during the sleep cancels the next tick; during
/// a tick it lets the tick finish.
pub async fn run_live(
    aggregator: &CollectionAggregator,
    requested: &[String],
    cache: Option<Arc<TtlCache>>,
    config: &Config,
    json: bool,
) -> Result<()> {
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
                shutdown.notify_one();
            }
        });
    }

    let interval = Duration::from_secs_f64(config.ui.refresh_interval_secs);
    let term = Term::stdout();
    debug!(interval_secs = config.ui.refresh_interval_secs, "live mode started");

    loop {
        let manifest = aggregator.collect(requested, cache.clone()).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&manifest.to_json())?);
        } else {
            term.clear_screen().ok();
            print_header(&manifest, interval);
            render::print_manifest(&manifest);
        }
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.notified() => break,
        }
    }

    debug!("live mode stopped");
    if !json && config.ui.show_banner {
        banner::print_goodbye();
    }
    Ok(())
}

fn print_header(manifest: &CollectionManifest, interval: Duration) {
    let refreshed = manifest.timestamp().with_timezone(&Local).format("%H:%M:%S");
    println!(
        "{} refreshed {refreshed}, every {:.1}s {}",
        style("rain live").cyan().bold(),
        interval.as_secs_f64(),
        style("(press Ctrl+C to exit)").dim(),
    );
    println!();
}
