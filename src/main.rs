use anyhow::{anyhow, Context};
use capture_coordinator::{apply_overrides, setup_logging, Cli, CliRunner, Config};
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose).map_err(|e| anyhow!("failed to set up logging: {e}"))?;

    info!("Starting capture-coordinator v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let runner = CliRunner::new(config);

    let shutdown = CancellationToken::new();
    let _shutdown_handler = setup_shutdown_handler(shutdown.clone());

    let result = runner.run(args.command, shutdown).await;

    if let Err(e) = result {
        error!("Application error: {}", e);
        std::process::exit(1);
    }

    info!("capture-coordinator stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("reading {}", config_path.display()))?;
        serde_json::from_str(&config_content).with_context(|| format!("parsing {}", config_path.display()))?
    } else {
        Config::default()
    };

    config.apply_env();
    apply_overrides(&mut config, args);
    config.validate().map_err(|e| anyhow!("invalid configuration: {e}"))?;

    info!("Configuration loaded successfully");
    info!("Broker: {}", config.broker.url);
    info!("Archive base URL: {}", config.archive_base_url);
    Ok(config)
}

fn setup_shutdown_handler(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let terminate = async {
            match signal::unix::signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => {
                    warn!("Cannot listen for SIGINT: {}", e);
                    return;
                }
            },
            _ = terminate => info!("Received SIGTERM"),
        }

        shutdown.cancel();
    })
}
