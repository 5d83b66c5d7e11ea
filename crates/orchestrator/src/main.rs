//! Certward - Main entry point
//!
//! Certificate lifecycle orchestrator for customer domains.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use certward_common::{CertificateId, DomainId};
use certward_config::{lint_config, Config};
use certward_orchestrator::acme::ChallengeServer;
use certward_orchestrator::{BatchOptions, BatchProgress, Orchestrator, RenewOptions, RenewTarget};

/// Certward - certificate lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "certward")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "CERTWARD_CONFIG", global = true)]
    config: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the challenge listener and the renewal scheduler (default)
    Run,
    /// Activate certificates for a batch of domains
    Activate {
        /// Domain ids
        #[arg(required = true)]
        domain_ids: Vec<String>,

        /// Authority deadline per domain
        #[arg(long = "timeout-ms")]
        timeout_ms: Option<u64>,

        /// Domains processed concurrently
        #[arg(long = "max-concurrent")]
        max_concurrent: Option<usize>,

        /// Fail instead of serving a self-signed certificate
        #[arg(long = "no-fallback")]
        no_fallback: bool,
    },
    /// Renew one certificate now
    Renew {
        #[command(flatten)]
        target: RenewTargetArgs,

        /// Renew even if the certificate is still fresh
        #[arg(long = "force")]
        force: bool,

        /// Fail instead of serving a self-signed certificate
        #[arg(long = "no-fallback")]
        no_fallback: bool,
    },
    /// Run one renewal sweep and exit
    Sweep,
    /// Show the certificate state of a domain
    Status {
        /// Domain id
        domain_id: String,
    },
    /// Validate configuration file and exit
    Test,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct RenewTargetArgs {
    /// Certificate id
    #[arg(long = "certificate")]
    certificate: Option<String>,

    /// Domain id
    #[arg(long = "domain")]
    domain: Option<String>,
}

impl RenewTargetArgs {
    fn into_target(self) -> Option<RenewTarget> {
        match (self.certificate, self.domain) {
            (Some(id), _) => Some(RenewTarget::Certificate(CertificateId::from_string(id))),
            (None, Some(id)) => Some(RenewTarget::Domain(DomainId::new(id))),
            (None, None) => None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    let config_path = cli.config.as_deref();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Test = command {
        return test_config(config_path);
    }

    let config = load_config(config_path)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(execute(command, config))
}

fn init_logging(format: LogFormat, verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::from_file(path).context("Failed to load configuration file")?,
        None => {
            info!("No configuration specified, using defaults");
            Config::default()
        }
    };
    config
        .validate_all()
        .context("Configuration validation failed")?;

    for warning in lint_config(&config).warnings {
        warn!("{}", warning.message);
    }
    Ok(config)
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;

    info!("Configuration test successful:");
    info!("  - {} domain(s)", config.domains.len());
    info!("  - directory {}", config.acme.directory_url());
    info!("  - renewal daily at {} UTC", config.renewal.schedule);

    println!(
        "certward: configuration file {} test is successful",
        config_path.unwrap_or("(defaults)")
    );
    Ok(())
}

async fn execute(command: Commands, config: Config) -> Result<()> {
    let orchestrator =
        Orchestrator::from_config(config).context("Failed to initialize orchestrator")?;

    match command {
        Commands::Run => run_daemon(orchestrator).await,
        Commands::Activate {
            domain_ids,
            timeout_ms,
            max_concurrent,
            no_fallback,
        } => {
            let mut options = BatchOptions::from_config(&orchestrator.config().batch);
            if let Some(timeout_ms) = timeout_ms {
                options.timeout = Duration::from_millis(timeout_ms);
            }
            if let Some(max_concurrent) = max_concurrent {
                options.max_concurrent = max_concurrent;
            }
            if no_fallback {
                options.fallback_to_self_signed = false;
            }

            // The authority probes the challenge listener during issuance
            let shutdown = CancellationToken::new();
            let server = spawn_challenge_server(&orchestrator, shutdown.clone()).await?;

            let ids = domain_ids.into_iter().map(DomainId::new).collect();
            let job = orchestrator.activate_batch(ids, options).await;

            shutdown.cancel();
            server.await.context("Challenge listener task failed")?;
            print_json(&BatchProgress::from(&job))
        }
        Commands::Renew {
            target,
            force,
            no_fallback,
        } => {
            let target = target
                .into_target()
                .context("Either --certificate or --domain is required")?;
            let mut options = RenewOptions::from_config(&orchestrator.config().batch);
            options.force = force;
            if no_fallback {
                options.fallback_to_self_signed = false;
            }

            let shutdown = CancellationToken::new();
            let server = spawn_challenge_server(&orchestrator, shutdown.clone()).await?;
            let result = orchestrator.renew(target, options).await;
            shutdown.cancel();
            server.await.context("Challenge listener task failed")?;

            print_json(&result.context("Renewal failed")?)
        }
        Commands::Sweep => {
            let shutdown = CancellationToken::new();
            let server = spawn_challenge_server(&orchestrator, shutdown.clone()).await?;
            let result = orchestrator.scheduler().run_now().await;
            shutdown.cancel();
            server.await.context("Challenge listener task failed")?;

            print_json(&result.context("Renewal sweep failed")?)
        }
        Commands::Status { domain_id } => {
            let view = orchestrator
                .certificate_status(&DomainId::new(domain_id))
                .await
                .context("Failed to read certificate status")?;
            print_json(&view)
        }
        // Validated before the runtime starts
        Commands::Test => Ok(()),
    }
}

async fn spawn_challenge_server(
    orchestrator: &Orchestrator,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let listen = &orchestrator.config().challenge.listen;
    let listener = ChallengeServer::bind(listen)
        .await
        .with_context(|| format!("Failed to bind challenge listener on {listen}"))?;
    let server = orchestrator.challenge_server();
    Ok(tokio::spawn(server.serve(listener, shutdown)))
}

/// Serve challenges and run the scheduler until SIGINT/SIGTERM
async fn run_daemon(orchestrator: Orchestrator) -> Result<()> {
    let shutdown = CancellationToken::new();
    let server = spawn_challenge_server(&orchestrator, shutdown.clone()).await?;

    if orchestrator.config().renewal.enabled {
        orchestrator.scheduler().start();
    } else {
        info!("Renewal scheduler disabled by configuration");
    }

    info!("Certward started");
    wait_for_shutdown().await?;
    info!("Received shutdown signal, initiating graceful shutdown");

    orchestrator.scheduler().shutdown().await;
    shutdown.cancel();
    server.await.context("Challenge listener task failed")?;
    orchestrator.challenges().clear();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT"),
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{json}");
    Ok(())
}
