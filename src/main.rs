use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use photomark::{
    Config, create_app,
    processor::Watermarker,
    startup_checks::{self, CheckScope},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Overrides `app.log_level` from the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP/WebSocket server (default if no command specified)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Automatically quit after specified number of seconds (useful for testing)
        #[arg(long)]
        quit_after: Option<u64>,
    },

    /// Watermark every image in a directory
    Batch {
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Images processed at the same time
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        config.app.log_level = level;
    }

    // Set up logging first
    let _log_guard = photomark::logging::init(&config.app)?;
    if let Some(path) = &config.app.log_file {
        info!("Logging to file {:?}", path);
    }

    info!("Configuration loaded from: {:?}", cli.config);

    match cli.command {
        Some(Commands::Batch {
            input,
            output,
            concurrency,
        }) => {
            if let Some(input) = input {
                config.paths.input_directory = input;
            }
            if let Some(output) = output {
                config.paths.output_directory = output;
            }
            if let Some(concurrency) = concurrency {
                config.paths.batch_concurrency = concurrency;
            }
            run_batch(config).await
        }
        Some(Commands::Serve {
            port,
            host,
            quit_after,
        }) => run_server(config, port, host, quit_after).await,
        None => {
            // Default to serve command if no subcommand specified
            run_server(config, None, None, None).await
        }
    }
}

async fn check_startup(config: &Config, scope: CheckScope) -> Result<(), Box<dyn std::error::Error>> {
    match startup_checks::perform_startup_checks(config, scope).await {
        Ok(()) => Ok(()),
        Err(errors) => {
            for error in &errors {
                tracing::error!("Startup check failed: {}", error);
            }

            if errors.iter().any(|e| e.is_critical()) {
                tracing::error!("Critical startup check failed, exiting");
                Err("Critical startup check failed".into())
            } else {
                tracing::warn!("Non-critical startup checks failed, continuing");
                Ok(())
            }
        }
    }
}

async fn run_batch(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    check_startup(&config, CheckScope::Batch).await?;

    info!(
        "Watermarking images from {:?} into {:?}",
        config.paths.input_directory, config.paths.output_directory
    );

    let watermarker = Arc::new(Watermarker::from_config(&config)?);
    let summary = watermarker
        .process_batch(
            &config.paths.input_directory,
            &config.paths.output_directory,
            &config.paths.image_extensions,
            config.paths.batch_concurrency,
        )
        .await?;

    println!(
        "Processed {} of {} images ({} failed)",
        summary.processed, summary.total, summary.failed
    );

    Ok(())
}

async fn run_server(
    config: Config,
    port: Option<u16>,
    host: Option<String>,
    quit_after: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = host.unwrap_or(config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!("Starting {} server", config.app.name);
    info!(
        "Fonts: primary {:?}, secondary {:?}",
        config.fonts.primary_path, config.fonts.secondary_path
    );
    if config.server.api_token.is_some() {
        info!("API token required for uploads");
    }

    check_startup(&config, CheckScope::Serve).await?;

    let app = create_app(config).await?;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Set up graceful shutdown
    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(shutdown_signal(quit_after));

    if let Err(e) = graceful.await {
        tracing::error!("Server error: {}", e);
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(quit_after: Option<u64>) {
    use tokio::signal;
    use tokio::time::{Duration, sleep};

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let quit_timer = async {
        if let Some(seconds) = quit_after {
            info!(
                "Server will automatically shut down after {} seconds",
                seconds
            );
            sleep(Duration::from_secs(seconds)).await;
            info!("Quit timer expired, shutting down");
        } else {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        },
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        },
        _ = quit_timer => {},
    }
}
