// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolbridge command line: inspect servers, list tools, and call one.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use toolbridge::config::{self, BridgeConfig};
use toolbridge::telemetry::{init_telemetry, LogStyle, TelemetryConfig};
use toolbridge::{ConnectionState, ToolBridge, ToolCallResult, VERSION};

/// Toolbridge - connect an agent to pluggable tool-servers.
#[derive(Parser)]
#[command(name = "toolbridge")]
#[command(author, version, about = "Bridge an agent to tool-servers", long_about = None)]
struct Cli {
    /// Server list (JSON or YAML)
    #[arg(short, long, env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// How long to wait for servers to become ready
    #[arg(long, default_value_t = 10_000)]
    wait_ms: u64,

    /// Output format
    #[arg(short = 'f', long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log filter directive, e.g. `toolbridge::connection=trace`
    #[arg(long, env = "TOOLBRIDGE_LOG", global = true)]
    log_filter: Option<String>,

    /// Log line layout
    #[arg(long, value_enum, default_value = "compact", global = true)]
    log_style: LogStyleArg,

    /// Disable colors in output and logs
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum LogStyleArg {
    Compact,
    Full,
}

impl From<LogStyleArg> for LogStyle {
    fn from(style: LogStyleArg) -> Self {
        match style {
            LogStyleArg::Compact => LogStyle::Compact,
            LogStyleArg::Full => LogStyle::Full,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured servers without connecting
    Servers,

    /// Connect and list every callable tool
    Tools,

    /// Connect and call one tool
    Call {
        /// Bare or qualified (`server.tool`) tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Call deadline
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Connect and show per-server health
    Health,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }
    let mut telemetry = TelemetryConfig::default()
        .with_verbosity(cli.verbose)
        .with_filter(cli.log_filter.clone())
        .with_style(cli.log_style.into());
    if cli.no_color {
        telemetry = telemetry.with_ansi(false);
    }
    let _guard = init_telemetry(&telemetry).context("failed to initialise logging")?;

    match &cli.command {
        Commands::Version => {
            println!("toolbridge {}", VERSION);
            Ok(())
        }
        Commands::Servers => {
            let (_, config) = load(&cli)?;
            print_servers(&config, cli.format)
        }
        Commands::Tools => {
            let bridge = connect(&cli).await?;
            let snapshot = bridge.list_tools();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                OutputFormat::Text => {
                    if snapshot.tools.is_empty() {
                        println!("{}", "No tools available".yellow());
                    }
                    for tool in &snapshot.tools {
                        let name = if tool.ambiguous {
                            tool.name.yellow()
                        } else {
                            tool.name.bright_white()
                        };
                        println!(
                            "{} [{}] {}",
                            name,
                            tool.server_id.cyan(),
                            tool.description.as_deref().unwrap_or("").dimmed()
                        );
                    }
                    for warning in &snapshot.warnings {
                        println!("{} {}", "warning:".yellow().bold(), warning);
                    }
                }
            }
            bridge.shutdown().await;
            Ok(())
        }
        Commands::Call {
            name,
            args,
            timeout_ms,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(args).context("--args must be valid JSON")?;
            let bridge = connect(&cli).await?;
            let result = bridge.call_tool(name, args, *timeout_ms).await;
            bridge.shutdown().await;
            print_result(&result, cli.format)?;
            if !result.is_ok() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Health => {
            let bridge = connect(&cli).await?;
            let health = bridge.health();
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&health)?),
                OutputFormat::Text => {
                    for server in &health {
                        let state = match server.state {
                            ConnectionState::Ready => server.state.to_string().green(),
                            ConnectionState::Closed => server.state.to_string().red(),
                            _ => server.state.to_string().yellow(),
                        };
                        println!(
                            "{} {} tools={} reconnects={}",
                            server.server_id.bright_white(),
                            state,
                            server.tool_count,
                            server.reconnect_attempts
                        );
                        if let Some(error) = &server.last_error {
                            println!("  {} {}", "last error:".red(), error);
                        }
                    }
                }
            }
            bridge.shutdown().await;
            Ok(())
        }
    }
}

fn config_path(cli: &Cli) -> anyhow::Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::default_config_path().context("no config directory; pass --config"),
    }
}

fn load(cli: &Cli) -> anyhow::Result<(PathBuf, BridgeConfig)> {
    let path = config_path(cli)?;
    let config = config::load_config_file(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok((path, config))
}

async fn connect(cli: &Cli) -> anyhow::Result<ToolBridge> {
    let path = config_path(cli)?;
    let bridge = ToolBridge::from_config_file(&path)
        .await
        .with_context(|| format!("failed to start from {}", path.display()))?;

    let states = bridge
        .wait_until_ready(Duration::from_millis(cli.wait_ms))
        .await;
    if states.is_empty() {
        bail!("no enabled servers in {}", path.display());
    }
    for (id, state) in states.iter().filter(|(_, s)| !s.is_ready()) {
        eprintln!("{} server '{}' is {}", "warning:".yellow().bold(), id, state);
    }
    Ok(bridge)
}

fn print_servers(config: &BridgeConfig, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config.servers)?);
        return Ok(());
    }
    for server in &config.servers {
        let enabled = if server.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        let target = server
            .url()
            .map(str::to_string)
            .unwrap_or_else(|| match &server.launch {
                config::LaunchSpec::Process { command, args, .. } => {
                    std::iter::once(command.as_str())
                        .chain(args.iter().map(String::as_str))
                        .collect::<Vec<_>>()
                        .join(" ")
                }
                config::LaunchSpec::Remote { url, .. } => url.clone(),
            });
        println!(
            "{} ({}) {} {}",
            server.id.bright_white(),
            server.transport_kind.to_string().cyan(),
            enabled,
            target.dimmed()
        );
    }
    Ok(())
}

fn print_result(result: &ToolCallResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Text => match result {
            ToolCallResult::Success { data, warnings, .. } => {
                for warning in warnings {
                    eprintln!("{} {}", "warning:".yellow().bold(), warning);
                }
                println!("{}", serde_json::to_string_pretty(data)?);
            }
            ToolCallResult::Failure {
                kind,
                message,
                retryable,
            } => {
                let hint = if *retryable { " (retryable)" } else { "" };
                eprintln!("{} {}{}", format!("{}:", kind).red().bold(), message, hint);
            }
        },
    }
    Ok(())
}
