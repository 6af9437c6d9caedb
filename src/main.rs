use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chartscroll::browser::chromium::ChromiumLauncher;
use chartscroll::clock::SystemClock;
use chartscroll::config::{default_config_path, Config};
use chartscroll::scrape::RunController;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chartscroll")]
#[command(about = "Scrape playboard.co ranking charts through a persistent browser session")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the control panel WebSocket (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Run the browser without a window
    #[arg(long, conflicts_with = "show_browser")]
    headless: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    show_browser: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the control panel event channel (default)
    Serve,
    /// Print the effective configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off")
    });
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&path)?,
    };
    tracing::debug!(path = %path.display(), "loaded config");

    config.apply_env()?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.headless {
        config.browser.headless = true;
    }
    if cli.show_browser {
        config.browser.headless = false;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Config => {
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
        }
        Command::Serve => {
            let host: IpAddr = config
                .server
                .host
                .parse()
                .with_context(|| format!("Invalid server host {:?}", config.server.host))?;
            let addr = SocketAddr::new(host, config.server.port);

            let controller = Arc::new(RunController::new(
                Arc::new(ChromiumLauncher),
                config.launch_options(),
                config.run_settings(),
                Arc::new(SystemClock),
            ));

            chartscroll::server::serve(addr, controller).await?;
        }
    }

    Ok(())
}
