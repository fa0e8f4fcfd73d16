use crate::{
    validate_url, CaptureQueue, CaptureService, CaptureState, Config, HealthLevel, ListenerExit, Metrics,
    PrometheusExporter, RedisQueue, RedisSeedStore, SeedService, SeedStore, SeedsGroup, SystemHealthChecker,
};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "capture-coordinator")]
#[command(about = "Hands seed URLs to an archival crawler and tracks their captures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Broker URL, e.g. redis://localhost:6379")]
    pub broker_url: Option<String>,

    #[arg(long, help = "Prefix of archival URLs")]
    pub archive_base_url: Option<String>,

    #[arg(long, help = "Result poll timeout in seconds")]
    pub poll_timeout: Option<u64>,

    #[arg(long, help = "Serve Prometheus metrics on this address")]
    pub metrics_addr: Option<String>,

    #[arg(long, help = "Require an explicit http:// or https:// scheme")]
    pub strict_urls: bool,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume capture results until interrupted
    Serve {
        #[arg(long, default_value = "60", help = "Health check interval in seconds, 0 to disable")]
        health_interval: u64,
    },

    /// Submit URLs for capture as one group
    Submit {
        #[arg(help = "URLs to capture")]
        urls: Vec<String>,

        #[arg(short, long, help = "File containing URLs (one per line)")]
        input: Option<PathBuf>,

        #[arg(long, help = "Wait for the crawler to finish every seed")]
        wait: bool,

        #[arg(long, default_value = "300", help = "Give up waiting after this many seconds")]
        wait_timeout: u64,
    },

    /// Check whether a URL would be accepted
    ValidateUrl {
        url: String,

        #[arg(long, help = "Require an explicit scheme")]
        strict: bool,
    },

    /// Show broker and queue health
    Health {
        #[arg(long, help = "Print the report as JSON")]
        json: bool,
    },

    /// Validate a configuration file
    ValidateConfig {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

/// Apply command-line overrides on top of file and environment settings.
pub fn apply_overrides(config: &mut Config, args: &Cli) {
    if let Some(url) = &args.broker_url {
        config.broker.url = url.clone();
    }
    if let Some(base) = &args.archive_base_url {
        config.archive_base_url = base.clone();
    }
    if let Some(timeout) = args.poll_timeout {
        config.listener.poll_timeout = Duration::from_secs(timeout);
    }
    if let Some(addr) = &args.metrics_addr {
        config.metrics_addr = Some(addr.clone());
    }
    if args.strict_urls {
        config.strict_urls = true;
    }
}

pub struct CliRunner {
    pub config: Config,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Commands, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        match command {
            Commands::Serve { health_interval } => self.run_serve(health_interval, shutdown).await,
            Commands::Submit {
                urls,
                input,
                wait,
                wait_timeout,
            } => {
                self.run_submit(urls, input, wait.then(|| Duration::from_secs(wait_timeout)), shutdown)
                    .await
            }
            Commands::ValidateUrl { url, strict } => self.check_url(&url, strict || self.config.strict_urls),
            Commands::Health { json } => self.show_health(json).await,
            Commands::ValidateConfig { config } => self.validate_config(config).await,
        }
    }

    async fn connect(&self) -> Result<Arc<RedisQueue>, Box<dyn std::error::Error>> {
        let queue = RedisQueue::connect(&self.config.broker).await?;
        queue.ping().await?;
        Ok(Arc::new(queue))
    }

    /// Seeds live on the broker so that every process applies results for
    /// seeds any other process submitted.
    async fn connect_store(&self) -> Result<Arc<RedisSeedStore>, Box<dyn std::error::Error>> {
        Ok(Arc::new(RedisSeedStore::connect(&self.config.store, &self.config.broker).await?))
    }

    fn build_service(&self, queue: Arc<dyn CaptureQueue>, store: Arc<dyn SeedStore>) -> Arc<CaptureService> {
        let metrics = Arc::new(Metrics::new());
        let seeds = Arc::new(SeedService::new(store, metrics.clone(), &self.config));
        Arc::new(CaptureService::new(queue, seeds, metrics, self.config.listener.clone()))
    }

    pub async fn run_serve(&self, health_interval: u64, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(addr) = &self.config.metrics_addr {
            let addr: SocketAddr = addr.parse()?;
            PrometheusExporter::new(addr).start()?;
        }

        let queue = self.connect().await?;
        let service = self.build_service(queue, self.connect_store().await?);
        let listener = service.listen_for_results(shutdown.child_token());

        if health_interval > 0 {
            let mut checker = SystemHealthChecker::new(service.clone(), true);
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                checker
                    .start_periodic_health_checks(Duration::from_secs(health_interval), cancel)
                    .await;
            });
        }

        info!("Listening for capture results on {}", self.config.broker.result_key);
        let exit = listener.await?;
        // Stops the health checks when the listener gave up on its own.
        shutdown.cancel();

        match exit {
            ListenerExit::Cancelled => Ok(()),
            ListenerExit::QueueFailed { attempts, last_error } => {
                Err(format!("result listener stopped after {attempts} failed polls: {last_error}").into())
            }
        }
    }

    pub async fn run_submit(
        &self,
        mut urls: Vec<String>,
        input: Option<PathBuf>,
        wait: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(path) = &input {
            let from_file = read_urls_from_file(path).await?;
            info!("Loaded {} URLs from {}", from_file.len(), path.display());
            urls.extend(from_file);
        }

        let queue = self.connect().await?;
        let service = self.build_service(queue, self.connect_store().await?);

        let group = service.seeds().save(&urls.join("\n"), true).await?;
        // Listen before enqueueing so fast results are not missed.
        let listener = wait.map(|_| service.listen_for_results(shutdown.child_token()));
        let summary = service.capture_group(&group).await?;

        println!("Submitted group {}", group.shadow_id);
        for seed in &group.seeds {
            println!("  {}  {}", seed.shadow_id, seed.url);
        }
        println!("Enqueued: {}, skipped: {}", summary.enqueued, summary.skipped);

        let (Some(timeout), Some(listener)) = (wait, listener) else {
            return Ok(());
        };

        let finished = tokio::select! {
            finished = wait_for_group(&service, &group) => finished?,
            _ = tokio::time::sleep(timeout) => {
                warn!("Gave up waiting after {:?}", timeout);
                service.seeds().get_group(&group.shadow_id).await?
            }
            _ = shutdown.cancelled() => service.seeds().get_group(&group.shadow_id).await?,
        };
        shutdown.cancel();
        if let ListenerExit::QueueFailed { last_error, .. } = listener.await? {
            error!("Result listener failed: {}", last_error);
        }

        println!("\nCapture results:");
        for seed in &finished.seeds {
            match seed.archival_url() {
                Some(archival_url) => println!("  {}  {}  {}", seed.shadow_id, seed.state, archival_url),
                None => println!("  {}  {}", seed.shadow_id, seed.state),
            }
        }
        Ok(())
    }

    pub fn check_url(&self, url: &str, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
        match validate_url(url, strict) {
            Ok(clean) => {
                println!("{clean}");
                Ok(())
            }
            Err(e) => {
                println!("Rejected: {}", e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn show_health(&self, json: bool) -> Result<(), Box<dyn std::error::Error>> {
        let service = self.build_service(self.connect().await?, self.connect_store().await?);
        let mut checker = SystemHealthChecker::new(service, false);
        let status = checker.check_system_health().await;

        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            println!("System Health Check");
            println!("==================");
            println!("Overall: {:?}", status.overall);
            println!("Broker: {:?} ({})", status.broker, self.config.broker.url);
            println!("Backlog: {:?}", status.backlog);
            if let (Some(requests), Some(results)) = (status.pending_requests, status.pending_results) {
                println!("  Pending requests: {requests}");
                println!("  Pending results: {results}");
            }
        }

        if status.overall == HealthLevel::Critical {
            return Err("system health is critical".into());
        }
        Ok(())
    }

    pub async fn validate_config(&self, config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
        println!("Validating configuration: {}", config_path.display());

        let config_content = fs::read_to_string(&config_path).await?;
        let config: Config = serde_json::from_str(&config_content)?;
        config.validate()?;

        println!("Configuration is valid:");
        println!("  Broker: {}", config.broker.url);
        println!("  Request list: {}", config.broker.request_key);
        println!("  Result list: {}", config.broker.result_key);
        println!("  Unmatched result list: {}", config.broker.unmatched_key);
        println!("  Seed store: {}", config.store.url_or(&config.broker));
        println!("  Archive base URL: {}", config.archive_base_url);
        println!("  Max lines per submission: {}", config.max_lines);
        println!("  Poll timeout: {:?}", config.listener.poll_timeout);

        Ok(())
    }
}

async fn wait_for_group(service: &CaptureService, group: &SeedsGroup) -> Result<SeedsGroup, Box<dyn std::error::Error>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let current = service.seeds().get_group(&group.shadow_id).await?;
        if current.seeds.iter().all(|seed| seed.state.is_terminal()) {
            return Ok(current);
        }
        let done = current.seeds.iter().filter(|s| s.state == CaptureState::DoneSuccess).count();
        info!("Waiting for captures: {}/{} succeeded", done, current.len());
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
pub async fn read_urls_from_file(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let content = fs::read_to_string(path).await?;
    Ok(content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect())
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
