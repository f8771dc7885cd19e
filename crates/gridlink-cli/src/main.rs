use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use gridlink_client::{Client, ClientHandle, ClientOptions, TextSurface};
use gridlink_core::config::{Config, OutboundMode};
use gridlink_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "gridlink",
    about = "Shared LED grid over WebSocket: gateway server and terminal client",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the grid gateway
    Serve {
        /// Port to listen on (default: 55555)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Connect to a gateway, draw the grid and read `x y` toggles from stdin
    Connect {
        /// Server WebSocket URL
        #[arg(long)]
        url: Option<String>,

        /// How toggles are reported: set-led or full-state
        #[arg(long)]
        mode: Option<OutboundMode>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show resolved settings
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// A line typed into `gridlink connect`.
#[derive(Debug, PartialEq, Eq)]
enum InputLine {
    Toggle(usize, usize),
    Reconnect,
    Quit,
    Empty,
}

fn parse_input(line: &str) -> Result<InputLine, String> {
    let mut parts = line.split_whitespace();
    let Some(first) = parts.next() else {
        return Ok(InputLine::Empty);
    };
    match first {
        "r" | "reconnect" => return Ok(InputLine::Reconnect),
        "q" | "quit" | "exit" => return Ok(InputLine::Quit),
        _ => {}
    }

    let x = first
        .parse()
        .map_err(|_| format!("Expected `x y`, got {line:?}"))?;
    let y = parts
        .next()
        .ok_or_else(|| format!("Missing y in {line:?}"))?
        .parse()
        .map_err(|_| format!("Expected `x y`, got {line:?}"))?;
    if parts.next().is_some() {
        return Err(format!("Expected `x y`, got {line:?}"));
    }
    Ok(InputLine::Toggle(x, y))
}

fn init_logging(config: &Config, verbose: bool) {
    let logging = config.logging.clone().unwrap_or_default();
    let mut directives = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone().unwrap_or_else(|| "info".to_string())
    };
    for filter in &logging.filters {
        directives.push(',');
        directives.push_str(filter);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives)),
        )
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_toggles(handle: ClientHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%e, "Failed to read stdin");
                break;
            }
        };

        let sent = match parse_input(&line) {
            Ok(InputLine::Toggle(x, y)) => handle.toggle(x, y),
            Ok(InputLine::Reconnect) => handle.reconnect(),
            Ok(InputLine::Quit) => {
                let _ = handle.shutdown();
                break;
            }
            Ok(InputLine::Empty) => Ok(()),
            Err(e) => {
                eprintln!("{e}");
                Ok(())
            }
        };
        if sent.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let mut config = Config::load(&config_path)?;
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            if let Some(bind) = bind {
                config.gateway.get_or_insert_with(Default::default).bind = Some(bind);
            }
            let (columns, rows) = config.grid_dimensions();
            tracing::info!(columns, rows, "Starting Gridlink gateway on port {port}");

            let state = Arc::new(GatewayState::new(Arc::new(config))?);
            gridlink_gateway::start_gateway(state, port).await?;
        }
        Commands::Connect { url, mode } => {
            let mut options = ClientOptions::from_config(&config);
            if let Some(url) = url {
                options.url = url;
            }
            if let Some(mode) = mode {
                options.mode = mode;
            }
            tracing::info!(url = %options.url, mode = %options.mode, "Connecting");

            let (client, handle) = Client::new(options, TextSurface::new(std::io::stdout()))?;

            let ctrl_c_handle = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = ctrl_c_handle.shutdown();
                }
            });
            tokio::spawn(read_toggles(handle));

            let grid = client.run().await;
            let lit = grid.cells().filter(|&(_, _, level)| level > 0).count();
            tracing::info!(lit, "Disconnected");
        }
        Commands::Status => {
            let (columns, rows) = config.grid_dimensions();
            println!("Gridlink v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Grid: {columns}x{rows}");
            println!("Gateway: {}:{}", config.bind_addr(), config.gateway_port());
            println!("Client URL: {}", config.client_url());
            println!("Outbound mode: {}", config.outbound_mode());
            println!("Reconnect delay: {} ms", config.reconnect_delay().as_millis());
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at {key}"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s)", errors.len());
                }
                println!("Config OK");
            }
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Config::default().save(&config_path)?;
                println!("Wrote {}", config_path.display());
            }
        },
    }

    Ok(())
}
