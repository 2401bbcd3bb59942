use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use log::LevelFilter;
use log::error;
use log::info;
use scoutdash_lib::error::GatewayError;
use scoutdash_lib::gateway::RetryGateway;
use scoutdash_lib::retry::RetryConfig;
use serde_json::Value;
use simplelog::ColorChoice;
use simplelog::Config;
use simplelog::TermLogger;
use simplelog::TerminalMode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "scoutdash", version, about = "Scouting dashboard API client")]
struct Cli {
    /// Log verbosity (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a resource and print its envelope as JSON.
    Fetch {
        /// Resource path, e.g. `/api/events/2024casj/teams`.
        path: String,

        /// Dashboard base URL.
        #[arg(long, env = "SCOUTDASH_URL")]
        base_url: String,

        /// Retries after a 429 or 503 response.
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-request timeout in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = TermLogger::init(
        cli.log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Error: failed to initialize logger: {e}");
    }

    match cli.command {
        Command::Fetch {
            path,
            base_url,
            max_retries,
            timeout_secs,
        } => match fetch(&path, base_url, max_retries, timeout_secs).await {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{path}: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn fetch(
    path: &str,
    base_url: String,
    max_retries: Option<u32>,
    timeout_secs: Option<u64>,
) -> Result<String, GatewayError> {
    let mut retry_config = RetryConfig::default();
    if let Some(max_retries) = max_retries {
        retry_config = retry_config.max_retries(max_retries);
    }

    let mut builder = RetryGateway::builder()
        .base_url(base_url)
        .retry_config(retry_config);
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let gateway = builder.build()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            on_interrupt.cancel();
        }
    });

    let response = gateway
        .fetch_resource_with_cancel::<Value>(path, &cancel)
        .await?;
    if response.is_stale() {
        info!(
            "served stale data, last refreshed {}",
            response.last_refresh()
        );
    }

    serde_json::to_string_pretty(&response).map_err(|e| GatewayError::parse(e.to_string()))
}
