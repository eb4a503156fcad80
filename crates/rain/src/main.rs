//! Rain - system information at a glance.
//!
//! Collects host facts through the fallback pipeline in `rain_core` and
//! presents them as terminal tables, JSON or a saved report.

mod banner;
mod live;
mod output;
mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rain_core::{CollectionAggregator, Config, RainError, TtlCache};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "rain")]
#[command(about = "System information at a glance", long_about = None)]
#[command(version)]
struct Cli {
    /// Section to collect; repeatable, `all` expands to every section
    #[arg(short = 's', long = "section", value_name = "SECTION")]
    sections: Vec<String>,

    /// Re-collect and re-render continuously
    #[arg(short, long)]
    live: bool,

    /// Print the collected facts as JSON on stdout
    #[arg(short, long)]
    json: bool,

    /// Write the report to a file (`.json` for JSON, plain text otherwise)
    #[arg(long, value_name = "FILE")]
    save: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Explicit configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress the startup banner
    #[arg(long)]
    no_banner: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("rain: {err:#}");
        let code = err
            .downcast_ref::<RainError>()
            .map(RainError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.no_banner {
        config.ui.show_banner = false;
    }
    init_logging(cli.verbose, &config.log_level);
    render::configure_colors();

    let requested = if cli.sections.is_empty() {
        config.collector.default_sections.clone()
    } else {
        cli.sections.clone()
    };
    debug!(sections = ?requested, live = cli.live, json = cli.json, "starting");

    let config = Arc::new(config);
    let aggregator = CollectionAggregator::new(Arc::clone(&config));
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(TtlCache::new(Duration::from_secs(config.cache.duration_secs))));
    if let Some(cache) = &cache {
        debug!(ttl_secs = cache.ttl().as_secs(), "fact cache enabled");
    }

    if cli.live {
        if let Some(path) = &cli.save {
            eprintln!("rain: {}", live_save_notice(path));
        }
        return live::run_live(&aggregator, &requested, cache, &config, cli.json).await;
    }

    let to_terminal = !cli.json && cli.save.is_none();
    if to_terminal && config.ui.show_banner {
        banner::print_banner();
    }
    let spinner = to_terminal.then(collection_spinner);

    let collected = aggregator.collect(&requested, cache).await;
    if let Some(spinner) = spinner.flatten() {
        spinner.finish_and_clear();
    }
    let manifest = collected?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&manifest.to_json())?);
    }
    if let Some(path) = &cli.save {
        output::save_manifest(&manifest, path)?;
    }
    if to_terminal {
        render::print_manifest(&manifest);
        if config.ui.show_banner {
            banner::print_goodbye();
        }
    }
    Ok(())
}

/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_logging(verbose: bool, configured_level: &str) {
    let level = if verbose { "debug" } else { configured_level };
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Live mode renders in place and never writes a report.
fn live_save_notice(path: &Path) -> String {
    format!("--save {} is ignored in live mode", path.display())
}

/// Spinner while a foreground collection runs; disabled off-tty.
fn collection_spinner() -> Option<ProgressBar> {
    use std::io::IsTerminal;
    if !std::io::stdout().is_terminal() {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template("{spinner} {msg}")
    {
        spinner.set_style(style);
    }
    spinner.set_message("collecting system facts");
    spinner.enable_steady_tick(Duration::from_millis(80));
    Some(spinner)
}
