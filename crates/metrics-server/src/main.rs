// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use metrics_server::{serve, Backend, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // logging is not set up yet
            eprintln!("metrics-server: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = format!("h2=off,hyper=off,sqlx=warn,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("metrics-server: could not parse log level: {e}");
            std::process::exit(1);
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("metrics-server: setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");

    let backend = match Backend::open(&config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to open metrics storage: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(&config.address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", config.address);
            backend.close().await;
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown().await;
            cancel.cancel();
        }
    });

    let persister = backend.spawn_persister(&config, cancel.clone());
    let state = Arc::new(backend.app_state(&config));
    if let Err(e) = serve(listener, state, cancel.clone()).await {
        error!("Server stopped: {e}");
    }

    // the persister saves its final snapshot once cancelled
    cancel.cancel();
    if let Some(persister) = persister {
        if let Err(e) = persister.await {
            error!("Persister task failed: {e}");
        }
    }
    backend.close().await;
    info!("Server stopped");
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => error!("Failed to listen for SIGTERM: {e}"),
        }
    }
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {e}"),
    }
}
