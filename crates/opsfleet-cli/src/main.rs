//! opsfleet CLI
//!
//! Runs a shell command on every configured machine over SSH and reports one
//! result per machine.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use eyre::{OptionExt, WrapErr};
use opsfleet_core::{FleetReport, Operator};
use opsfleet_exec::KnownHosts;
use opsfleet_inventory::InventoryClient;
use tracing::{debug, info, warn};

mod config;
mod output;

use config::Config;

#[derive(Parser)]
#[command(name = "opsfleet", version)]
#[command(about = "Run shell commands across a fleet of machines over SSH", long_about = None)]
struct Cli {
    /// Config file (default: $OPSFLEET_CONFIG, ./opsfleet.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command on all machines, or only the named ones
    Run {
        /// Restrict the run to this machine (repeatable, order is kept)
        #[arg(short, long = "machine", value_name = "NAME")]
        machines: Vec<String>,

        /// Also register machines from the configured inventory
        #[arg(long)]
        inventory: bool,

        /// Print results as a JSON array
        #[arg(long)]
        json: bool,

        /// Command line to run remotely
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// List registered machines
    Machines {
        /// Also register machines from the configured inventory
        #[arg(long)]
        inventory: bool,
    },
    /// List known-hosts entries
    #[command(name = "known-hosts")]
    KnownHosts,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Some(Config::load(path)?),
        None => Config::load_default()?,
    };
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    init_logging(&config.operator.log_level, cli.log_json);
    if !found {
        warn!("no config file found, using defaults");
    }

    match cli.command {
        Commands::Run {
            machines,
            inventory,
            json,
            command,
        } => {
            let operator = build_operator(&config, inventory).await?;
            let command = command.join(" ");

            let outputs = if machines.is_empty() {
                operator.run(&command).await
            } else {
                operator.run_on(&command, machines.as_slice()).await
            };

            if json {
                println!("{}", output::render_json(&outputs)?);
            } else {
                print!("{}", output::render_outputs(&outputs));
            }

            let report = FleetReport::from(outputs);
            if report.all_succeeded() {
                Ok(ExitCode::SUCCESS)
            } else {
                let failed: Vec<_> = report.failures().map(|o| o.machine.as_str()).collect();
                debug!(failed = ?failed, "some machines failed");
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Machines { inventory } => {
            let operator = build_operator(&config, inventory).await?;
            print!("{}", output::render_machines(operator.machines()));
            Ok(ExitCode::SUCCESS)
        }
        Commands::KnownHosts => {
            let store = KnownHosts::new(config.operator_config()?.known_hosts_path);
            let entries = store.entries().await?;
            print!("{}", output::render_known_hosts(&entries));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the operator from config machines, plus inventory machines if asked
async fn build_operator(config: &Config, use_inventory: bool) -> Result<Operator> {
    let mut operator = Operator::new(config.operator_config()?);
    operator.register_all(config.machine_specs()?)?;

    if use_inventory {
        let section = config
            .inventory
            .as_ref()
            .ok_or_eyre("--inventory given but config has no [inventory] section")?;
        let credential = section.auth.resolve().wrap_err("inventory credential")?;

        let records = InventoryClient::new(&section.url)?.fetch().await?;
        let specs = records
            .iter()
            .map(|r| r.to_spec(&section.username, section.port, credential.clone()))
            .collect();
        let added = operator
            .register_all(specs)
            .wrap_err("failed to register inventory machines")?;
        info!(added, "registered inventory machines");
    }

    debug!(machines = operator.len(), "operator ready");
    Ok(operator)
}

/// Initialize the logging system on stderr
///
/// `RUST_LOG` overrides the configured level.
fn init_logging(level: &str, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::parse_from([
            "opsfleet", "run", "-m", "b", "--machine", "a", "--json", "--", "uname", "-a",
        ]);
        match cli.command {
            Commands::Run {
                machines,
                json,
                inventory,
                command,
            } => {
                assert_eq!(machines, vec!["b", "a"]);
                assert!(json);
                assert!(!inventory);
                assert_eq!(command, vec!["uname", "-a"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_command() {
        assert!(Cli::try_parse_from(["opsfleet", "run"]).is_err());
    }

    #[tokio::test]
    async fn test_build_operator_from_config() {
        let config = Config::parse(
            r#"
            [operator]
            known_hosts = "/tmp/opsfleet-test-known_hosts"

            [[machine]]
            name = "web1"
            host = "10.0.0.5"
            password = "pw"
            "#,
        )
        .unwrap();

        let operator = build_operator(&config, false).await.unwrap();
        assert_eq!(operator.machine_names(), vec!["web1"]);
        assert!(build_operator(&config, true).await.is_err());
    }
}
