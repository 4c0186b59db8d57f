mod api;
mod assets;
mod captcha;
mod config;
mod error;
mod limiter;
mod mail;
mod server;
mod views;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use api::{create_router, AppState};
use assets::AssetPaths;
use config::{Config, FileConfig, DEFAULT_CONFIG_PATH};
use mail::{MailDispatcher, SmtpTransport};
use server::Server;

/// Exit status when the SMTP server cannot be reached at startup.
const EXIT_SMTP_UNAVAILABLE: i32 = 25;

#[derive(Parser)]
#[command(name = "seance", version, about = "Contact form relay")]
struct Args {
    /// JSON5 configuration file
    #[arg(short, long, env = "CONTACTCONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile stylesheets, scripts and images into the assets directory
    Assets {
        /// Rebuild whenever sources change
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if let Some(Command::Assets { watch }) = args.command {
        return assets::run(AssetPaths::from_env(), watch).await;
    }

    info!("Seance v{} starting...", env!("CARGO_PKG_VERSION"));

    let file = match FileConfig::load(&args.config) {
        Ok(file) => file,
        Err(e) => {
            warn!("{}, using environment only", e);
            FileConfig::default()
        }
    };
    let config = Arc::new(Config::from_env(file)?);
    info!(
        "Configuration loaded: port {}, recipient {}",
        config.port, config.recipient_address
    );

    let transport = Arc::new(SmtpTransport::from_settings(&config.smtp)?);
    let mailer = Arc::new(MailDispatcher::new(transport, &config));

    if let Some(code) = smtp_exit_code(&mailer).await {
        std::process::exit(code);
    }

    let state = AppState::new(config.clone(), mailer);
    let server = Server::new(
        create_router(state),
        SocketAddr::from(([0, 0, 0, 0], config.port)),
    );
    server.start().await?;

    server.run_until(shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

/// Check the SMTP server before accepting traffic. Returns the process exit
/// status to use when it cannot be reached.
async fn smtp_exit_code(mailer: &MailDispatcher) -> Option<i32> {
    match mailer.verify().await {
        Ok(()) => {
            info!("SMTP connection verified");
            None
        }
        Err(e) => {
            error!("SMTP server unavailable: {}", e);
            Some(EXIT_SMTP_UNAVAILABLE)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
