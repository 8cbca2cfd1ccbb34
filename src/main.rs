//! zafira-relay CLI - inspect and exercise the test-run telemetry relay.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use zafira_relay::broker::{AmqpTransport, Phase};
use zafira_relay::config::{self, Config};
use zafira_relay::relay::{RelayHandle, reporting_client};
use zafira_relay::{Level, LogRecord, ReportingService, RunContext};

#[derive(Parser)]
#[command(name = "zafira-relay")]
#[command(about = "Test-run telemetry relay for the Zafira reporting service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "zafira.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Reporting service base URL
        #[arg(short, long, default_value = "http://localhost:8080/zafira-ws")]
        service_url: String,
    },

    /// Resolve the broker and bring the connection up
    Probe,

    /// Publish a single record through the relay
    Emit {
        /// Message text
        message: String,

        /// Record level (trace, debug, info, warn, error, meta_info)
        #[arg(short, long, default_value = "info")]
        level: Level,

        /// Logger name
        #[arg(long, default_value = "zafira-relay")]
        logger: String,

        /// CI run id (routing key). A random id is used when omitted.
        #[arg(long)]
        run_id: Option<String>,

        /// CI test id to correlate the record with
        #[arg(long)]
        test_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { service_url } => init_config(&cli.config, &service_url),
        Commands::Probe => probe(&cli.config).await,
        Commands::Emit {
            message,
            level,
            logger,
            run_id,
            test_id,
        } => {
            let record = LogRecord::new(level, logger, message);
            emit(&cli.config, record, run_id, test_id).await
        }
    }
}

async fn start_relay(config_path: &Path, context: Arc<RunContext>) -> Result<RelayHandle> {
    let config: Config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    let reporting = reporting_client(&config.reporting)
        .await
        .context("Invalid reporting service configuration")?
        .map(|client| Arc::new(client) as Arc<dyn ReportingService>);

    Ok(RelayHandle::start(config, reporting, Arc::new(AmqpTransport::new()), context).await)
}

async fn probe(config_path: &Path) -> Result<()> {
    let context = Arc::new(RunContext::new(uuid::Uuid::new_v4().to_string()));
    let relay = start_relay(config_path, context).await?;

    let enabled = relay.gate().is_enabled().await;
    let phase = relay.phase().await;
    relay.shutdown().await;

    println!("Broker enabled: {}", enabled);
    println!("Broker state: {}", phase);

    if phase != Phase::ExchangeDeclared {
        std::process::exit(1);
    }
    Ok(())
}

async fn emit(
    config_path: &Path,
    record: LogRecord,
    run_id: Option<String>,
    test_id: Option<String>,
) -> Result<()> {
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let context = Arc::new(RunContext::new(run_id));
    context.set_current_test(test_id);

    let relay = start_relay(config_path, Arc::clone(&context)).await?;
    let result = relay.gate().try_emit(&record).await;
    relay.shutdown().await;

    if let Err(e) = result {
        bail!("Failed to publish record: {}", e);
    }
    println!(
        "Published {} record to run {} (correlation id {})",
        record.level,
        context.routing_key(),
        context.correlation_id()
    );
    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    match config::load_config(config_path) {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Reporting: {}", if config.reporting.enabled { "enabled" } else { "disabled" });
            println!("  Service URL: {}", config.reporting.service_url);
            let broker = match config.broker.enabled {
                Some(true) => "forced on",
                Some(false) => "forced off",
                None => "from reporting service",
            };
            println!("  Broker: {}", broker);
            println!(
                "  Exchange: {} (history {})",
                config.broker.exchange, config.broker.history
            );
            println!("  Save screenshots: {}", config.artifacts.save_screenshots);
            println!("  Artifact TTL: {}s", config.artifacts.expires_in_secs);

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path, service_url: &str) -> Result<()> {
    let config = format!(
        r#"# zafira-relay configuration file

[reporting]
enabled = true
service_url = "{}"
# Refresh token exchanged for an access token at startup
# access_token = ""
timeout_secs = 10

[broker]
# Overrides the enabled flag served by the reporting service
# enabled = true
tool_name = "RABBITMQ"
virtual_host = "/"
exchange = "logs"
history = 1000
heartbeat_secs = 10

[artifacts]
save_screenshots = false
expires_in_secs = 86400
log_name = "Log"
# directory = "target/artifacts"

[relay]
queue_capacity = 4096
upload_workers = 4
"#,
        service_url
    );

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, config)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  zafira-relay probe");

    Ok(())
}
