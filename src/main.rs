use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use sequencer::{Key, TransferService, status};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "vault-transfer")]
#[command(about = "Sequences dataset version exports per NBN and registers them with the vault catalog")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<TransferCommands>,
}

#[derive(Subcommand)]
enum TransferCommands {
    #[command(flatten)]
    Common(CommonCommands),
    /// Show queued items and halt state of every bucket
    Status {
        #[arg(long, help = "Show status in JSON format")]
        json: bool,
    },
    /// Clear the halt flag of the bucket for a key
    Resume {
        #[arg(help = "Key (NBN) of the halted bucket")]
        key: String,
    },
}

impl Default for TransferCommands {
    fn default() -> Self {
        Self::Common(CommonCommands::Start)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn show_status(config: &Configuration, json: bool) -> Result<()> {
    let statuses = status::survey(&config.drain.destination, &config.reserved_bucket_names())
        .await
        .context("Failed to read bucket root")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to serialize status")?
        );
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No buckets under {}", config.drain.destination.display());
        return Ok(());
    }
    for bucket in &statuses {
        println!(
            "{:<8} {:>6} queued  {}  ({})",
            if bucket.halted { "HALTED" } else { "active" },
            bucket.queued,
            bucket.key,
            bucket.path.display()
        );
    }
    Ok(())
}

async fn resume(config: &Configuration, key: &str) -> Result<()> {
    let key = Key::new(key).context("Key cannot be empty")?;
    if status::resume(&config.drain.destination, &key).await? {
        println!("Resumed bucket for {key}");
    } else {
        println!("Bucket for {key} was not halted");
    }
    Ok(())
}

async fn start(config: Configuration) -> Result<()> {
    utils::validate_config(&config)?;

    let service =
        TransferService::with_catalog(&config).context("Failed to initialize catalog client")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service_handle = tokio::spawn(service.run(shutdown_rx));

    log::info!(
        "Vault transfer started: inbox {}, buckets {}",
        config.collect.inbox.display(),
        config.drain.destination.display()
    );

    wait_for_shutdown_signal().await?;
    log::info!("Shutting down, waiting for running drains to finish");
    let _ = shutdown_tx.send(true);

    service_handle
        .await
        .context("Transfer service task failed")?
        .context("Transfer service failed")?;
    log::info!("Vault transfer stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command.unwrap_or_default() {
        TransferCommands::Common(common_cmd) => {
            if utils::handle_common_command(&common_cmd, &config)? {
                return Ok(());
            }
            start(config).await
        }
        TransferCommands::Status { json } => show_status(&config, json).await,
        TransferCommands::Resume { key } => resume(&config, &key).await,
    }
}
