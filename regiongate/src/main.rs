mod config;

use clap::{Args, Parser, Subcommand};
use config::{CommonConfig, Config, ConfigError, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use regions::RegionCache;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "regiongate", version, about = "Region routing for the storefront")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Redirect storefront visitors to their country prefix
    Redirect(CliArgs),
    /// Serve the region lookup API
    Regions(CliArgs),
}

#[derive(Args)]
struct CliArgs {
    #[arg(long, default_value = "regiongate.yaml")]
    config_file: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let args = match &cli.command {
        CliCommand::Redirect(args) | CliCommand::Regions(args) => args,
    };

    let config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", args.config_file.display());
            process::exit(1);
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());
    init_metrics(&config.common);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        tracing::error!(error = %e, "Exiting");
        process::exit(1);
    }
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not create region cache: {0}")]
    Backend(#[from] regions::backend::BackendError),
    #[error(transparent)]
    Redirect(#[from] redirect::RedirectError),
    #[error(transparent)]
    RegionsApi(#[from] regions::api::RegionsApiError),
}

async fn run(command: CliCommand, config: Config) -> Result<(), RunError> {
    let cache = RegionCache::new(&config.regions)?;

    match command {
        CliCommand::Redirect(_) => {
            let redirect_config = config
                .redirect
                .ok_or(ConfigError::MissingSection("redirect"))?;
            tracing::info!("Starting redirect service");
            redirect::run(redirect_config, cache).await?;
        }
        CliCommand::Regions(_) => {
            let api_config = config
                .regions_api
                .ok_or(ConfigError::MissingSection("regions_api"))?;
            tracing::info!("Starting region API");
            regions::api::serve(&api_config.listener, cache).await?;
        }
    }

    Ok(())
}

/// Installs the fmt subscriber, plus the Sentry layer when a DSN is set.
/// The returned guard flushes Sentry events on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: logging.environment.clone().map(Into::into),
                ..Default::default()
            },
        ))
    });

    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(common: &CommonConfig) {
    let Some(MetricsConfig {
        statsd_host,
        statsd_port,
    }) = &common.metrics
    else {
        return;
    };

    let builder = StatsdBuilder::from(statsd_host.as_str(), *statsd_port);
    let recorder = match builder.build(Some("regiongate")) {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::error!(error = %e, "Failed to install metrics recorder");
        return;
    }

    shared::metrics_defs::describe_all(regions::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(redirect::metrics_defs::ALL_METRICS);
    tracing::info!(%statsd_host, statsd_port, "Metrics enabled");
}
