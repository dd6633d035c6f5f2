// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ServerError;
use crate::handlers::{handle, AppState};
use hyper::service::service_fn;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long in-flight connections get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Accepts connections on `listener` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = JoinSet::new();
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics server listening on {addr}");
    }

    loop {
        let conn = tokio::select! {
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e.into());
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {e:?}");
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
            () = cancel.cancelled() => break,
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let state = Arc::clone(&state);
        joinset.spawn(async move {
            let service = service_fn(move |req| handle(Arc::clone(&state), req));
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Connection error: {e}");
            }
        });
    }

    debug!("Stopped accepting connections, {} still open", joinset.len());
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while joinset.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Closing {} connections still open after shutdown", joinset.len());
        joinset.shutdown().await;
    }
    Ok(())
}
