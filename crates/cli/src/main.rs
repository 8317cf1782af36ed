mod config_commands;
mod host;
mod plugins_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tessera", about = "Tessera: a tick-driven plugin host")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the discovered one.
    #[arg(long, global = true, env = "TESSERA_CONFIG")]
    config: Option<PathBuf>,

    /// Plugin root (overrides `plugins.root`).
    #[arg(long, global = true, env = "TESSERA_PLUGINS_DIR")]
    plugins_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host loop (default when no subcommand is provided).
    Run,
    /// Plugin inspection.
    Plugins {
        #[command(subcommand)]
        action: plugins_commands::PluginAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_names(true)
                    .with_ansi(true),
            )
            .init();
    }
}

/// The explicit `--config` file, or the discovered one, with CLI overrides.
fn load_config(cli: &Cli) -> anyhow::Result<tessera_config::TesseraConfig> {
    let mut config = match cli.config {
        Some(ref path) => tessera_config::load_config(path)?,
        None => tessera_config::discover_and_load(),
    };
    if let Some(ref dir) = cli.plugins_dir {
        config.plugins.root = dir.clone();
    }
    Ok(config)
}

#[cfg(feature = "metrics")]
fn init_metrics(
    config: &tessera_config::TesseraConfig,
) -> anyhow::Result<Option<tessera_metrics::MetricsHandle>> {
    let handle = tessera_metrics::init_metrics(tessera_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;
    Ok(handle)
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;

    let problems = tessera_config::validate_config(&config);
    for d in &problems {
        match d.severity {
            tessera_config::Severity::Error => tracing::error!(path = %d.path, "{}", d.message),
            tessera_config::Severity::Warning => tracing::warn!(path = %d.path, "{}", d.message),
            tessera_config::Severity::Info => tracing::debug!(path = %d.path, "{}", d.message),
        }
    }
    if problems
        .iter()
        .any(|d| d.severity == tessera_config::Severity::Error)
    {
        anyhow::bail!("invalid configuration; run `tessera config validate` for details");
    }

    #[cfg(feature = "metrics")]
    let metrics = init_metrics(&config)?;

    info!(
        root = %config.plugins.root.display(),
        tick_rate_hz = config.host.tick_rate_hz,
        update_interval_ms = config.host.update_interval_ms,
        "starting host loop"
    );
    #[cfg(feature = "metrics")]
    let textfile = config.metrics.textfile.clone();
    let host_loop = host::HostLoop::new(config);
    #[cfg(feature = "metrics")]
    if let (Some(handle), Some(path)) = (metrics.clone(), textfile.clone()) {
        host_loop.register_metrics_export(path, move || handle.render())?;
    }
    host_loop.run().await?;

    #[cfg(feature = "metrics")]
    match (metrics, textfile) {
        (Some(handle), Some(path)) => host::write_textfile(&path, &handle.render())?,
        (Some(handle), None) => tracing::debug!(metrics = %handle.render(), "final metrics"),
        _ => {},
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "tessera starting");

    match cli.command {
        None | Some(Commands::Run) => run(&cli).await,
        Some(Commands::Plugins { ref action }) => {
            plugins_commands::handle_plugins(action, load_config(&cli)?)
        },
        Some(Commands::Config { ref action }) => {
            config_commands::handle_config(action, cli.config.as_deref(), || load_config(&cli))
        },
    }
}
