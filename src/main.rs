//! Graphex server binary
//!
//! # Usage
//!
//! ```bash
//! graphex --watch-dir ./data
//! graphex --watch-dir ./data --host 127.0.0.1 --port 9000
//! graphex --config ./graphex.toml --log-level debug
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use graphex::socket_server::{ConnectionSettings, ServerOptions, SocketServer};
use graphex::{Cli, FileStore, FileWatcher, GraphexConfig, GraphexError};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<GraphexError>()
                .map(GraphexError::exit_code)
                .unwrap_or(ExitCode::FAILURE)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = GraphexConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging.level);

    let shutdown = CancellationToken::new();

    let watcher = Arc::new(FileWatcher::new(&config.watch_dir, config.watcher.clone()));
    let events = watcher.domain_events().ok_or_else(|| GraphexError::Watch {
        message: "domain event stream already taken".to_string(),
    })?;
    let _watch = watcher.start(&shutdown)?;

    let listener = TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr()))?;

    let options = ServerOptions::new(
        &config.server,
        ConnectionSettings::from(&config.connection),
    );
    let server = SocketServer::new(listener, watcher as Arc<dyn FileStore>, options);
    tracing::info!(
        "Graphex listening on ws://{}{}",
        server.local_addr()?,
        config.server.path
    );
    tracing::info!(dir = %config.watch_dir.display(), "Streaming data files");
    if let Some(static_dir) = &config.static_dir {
        tracing::info!(dir = %static_dir.display(), "Static assets are not served by graphex");
    }

    let server_task = tokio::spawn(server.run(events, shutdown.clone()));

    wait_for_signal().await;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    server_task.await.context("server task panicked")??;
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("graphex={}", level))
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
