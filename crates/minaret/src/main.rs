//! Minaret entry point.
//!
//! Loads configuration, starts the WebSocket bridge in front of the demo
//! host and runs until a shutdown signal arrives. With `--console`, JSON
//! requests typed on stdin go through the same dispatcher as WebSocket
//! clients, with replies written to the log.

mod cli;
mod config;
mod host;
mod logging;
mod signals;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::CliArgs;
use config::AppConfig;
use host::DemoHost;
use minaret_bridge::json::Value;
use minaret_bridge::{dispatch, HostExecutor, Responder, WebSocketServer};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle as TaskHandle;
use tracing::{error, info, warn};

/// The running bridge plus the host thread behind it.
struct Application {
    config: AppConfig,
    server: WebSocketServer,
    executor: HostExecutor,
    host_thread: JoinHandle<DemoHost>,
    console: bool,
}

impl Application {
    async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config).await?;

        if let Some(url) = args.url {
            config.websocket.url = url;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;
        logging::setup_logging(&config.logging.level, config.logging.json_format)?;

        let (executor, queue) = HostExecutor::channel();
        let server = WebSocketServer::new(config.to_server_config()?, executor.clone());
        let host = DemoHost::new(Some(server.broadcaster()));
        let host_thread = queue.spawn(host)?;

        info!(
            "🗼 Minaret v{} | Config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config.display()
        );

        Ok(Self {
            config,
            server,
            executor,
            host_thread,
            console: args.console,
        })
    }

    async fn run(self) -> Result<()> {
        let address = self
            .server
            .start()
            .await
            .with_context(|| format!("Failed to start WebSocket server on {}", self.config.websocket.url))?;
        info!("✅ Ready to accept connections on ws://{address}");

        let console = self.console.then(|| spawn_console(self.executor.clone()));
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        signals::wait_for_shutdown_signal().await?;
        info!("🛑 Shutdown signal received, initiating graceful shutdown...");

        if let Some(console) = console {
            console.abort();
            let _ = console.await;
        }
        self.server.stop().await;

        // The host thread exits once every executor handle is gone.
        drop(self.server);
        drop(self.executor);
        let host = tokio::task::spawn_blocking(move || self.host_thread.join())
            .await?
            .map_err(|_| anyhow!("Host thread panicked"))?;
        info!("👋 Minaret stopped after {} chat lines", host.chat_log().len());
        Ok(())
    }
}

/// Feeds stdin lines to the dispatcher as if a client had sent them.
fn spawn_console(executor: HostExecutor) -> TaskHandle<()> {
    let responder: Arc<dyn Responder> = Arc::new(|response: Value| info!("📤 {response}"));
    tokio::spawn(async move {
        info!("⌨️ Console ready, enter one JSON request per line");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => dispatch(&line, &executor, Arc::clone(&responder)),
                Ok(None) => {
                    info!("⌨️ Console input closed");
                    break;
                }
                Err(e) => {
                    warn!("Console read failed: {e}");
                    break;
                }
            }
        }
    })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {e:?}");
        std::process::exit(1);
    }
    Ok(())
}
