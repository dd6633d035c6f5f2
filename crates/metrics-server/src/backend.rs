// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Storage selection: a SQLite database when a DSN is configured, otherwise
//! the in-memory store backed by a snapshot file.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handlers::{AppState, SyncPersister};
use metrics_store::{FilePersister, MetricStore, Repository, SqlRepository};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub enum Backend {
    Memory {
        store: Arc<MetricStore>,
        persister: FilePersister,
    },
    Sql(SqlRepository),
}

impl Backend {
    pub async fn open(config: &ServerConfig) -> Result<Self, ServerError> {
        if let Some(dsn) = &config.database_dsn {
            let repository = SqlRepository::connect(dsn).await?;
            return Ok(Backend::Sql(repository));
        }

        let persister = FilePersister::new(&config.file_storage_path);
        let store = if config.restore {
            MetricStore::from_snapshot(persister.load().await?)
        } else {
            MetricStore::new()
        };
        info!(
            "Using in-memory store with {} metrics, snapshot file {}",
            store.len(),
            persister.path().display()
        );
        Ok(Backend::Memory {
            store: Arc::new(store),
            persister,
        })
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        match self {
            Backend::Memory { store, .. } => Arc::clone(store) as Arc<dyn Repository>,
            Backend::Sql(repository) => Arc::new(repository.clone()),
        }
    }

    pub fn app_state(&self, config: &ServerConfig) -> AppState {
        let sync_persister = match self {
            Backend::Memory { store, persister } if config.store_interval.is_zero() => {
                Some(SyncPersister {
                    store: Arc::clone(store),
                    persister: persister.clone(),
                })
            }
            _ => None,
        };
        AppState {
            repository: self.repository(),
            key: config.key.clone(),
            max_content_length: config.max_content_length,
            sync_persister,
        }
    }

    /// Starts the periodic snapshot task; it saves a final snapshot once `cancel` fires.
    pub fn spawn_persister(
        &self,
        config: &ServerConfig,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let Backend::Memory { store, persister } = self else {
            return None;
        };
        let store = Arc::clone(store);
        let persister = persister.clone();
        let period = config.store_interval;
        Some(tokio::spawn(async move {
            persister.run(store, period, cancel).await;
        }))
    }

    pub async fn close(&self) {
        if let Backend::Sql(repository) = self {
            repository.close().await;
        }
    }
}
