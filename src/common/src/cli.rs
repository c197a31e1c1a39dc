use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all commands
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Common subcommands
#[derive(Subcommand, Debug, Clone, Default)]
pub enum CommonCommands {
    /// Start the service (default behavior)
    #[default]
    Start,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Level used when `RUST_LOG` is not set
    pub fn default_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when present.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Vault Transfer Configuration:");
            println!("=============================");
            println!("Staging inbox: {}", config.collect.inbox.display());
            println!(
                "Staging polling interval: {:?}",
                config.collect.polling_interval
            );
            println!("Admission attempts: {}", config.collect.max_attempts);
            println!("Rejected outbox: {}", config.collect.rejected.display());
            println!("Admission failed outbox: {}", config.collect.failed.display());

            println!("Bucket root: {}", config.drain.destination.display());
            println!("Drain polling interval: {:?}", config.drain.polling_interval);
            println!("Drain workers: {}", config.drain.workers);
            println!("Drain failed outbox: {}", config.drain.failed.display());
            match &config.drain.processed {
                Some(processed) => println!("Processed outbox: {}", processed.display()),
                None => println!("Processed outbox: disabled (items are deleted)"),
            }

            println!("Catalog URL: {}", config.catalog.url);
            println!("Catalog timeout: {:?}", config.catalog.timeout);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.drain.workers == 0 {
            anyhow::bail!("Drain workers must be at least 1");
        }

        if config.collect.max_attempts == 0 {
            anyhow::bail!("Admission attempts must be at least 1");
        }

        if config.catalog.url.is_empty() {
            anyhow::bail!("Catalog URL cannot be empty");
        }

        let destination = &config.drain.destination;
        if &config.collect.inbox == destination {
            anyhow::bail!("Staging inbox cannot be the bucket root");
        }

        let mut sinks = vec![
            ("rejected", &config.collect.rejected),
            ("admission failed", &config.collect.failed),
            ("drain failed", &config.drain.failed),
        ];
        if let Some(processed) = &config.drain.processed {
            sinks.push(("processed", processed));
        }
        for (name, sink) in sinks {
            if sink == destination {
                anyhow::bail!("The {name} outbox cannot be the bucket root");
            }
            if sink == &config.collect.inbox {
                anyhow::bail!("The {name} outbox cannot be the staging inbox");
            }
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands that don't require starting services
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(true)
            }
            CommonCommands::Start => Ok(false),
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
