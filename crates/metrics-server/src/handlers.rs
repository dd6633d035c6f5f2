// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Request routing and the metric endpoints.
//!
//! | route | body | response |
//! |---|---|---|
//! | `POST /update/{type}/{id}/{value}` | - | empty `200` |
//! | `POST /update/` | one metric | merged metric |
//! | `POST /updates/` | array of metrics | `{"message": ...}` |
//! | `GET /value/{type}/{id}` | - | plain value |
//! | `POST /value/` | `{"id", "type"}` | stored metric |
//! | `GET /` | - | one `type: id: value` line per metric |
//! | `GET /ping` | - | `200` when the repository is reachable |

use crate::error::ServerError;
use crate::http_utils::{
    create_response, log_and_create_http_response, verify_request_content_length, HttpResponse,
    APPLICATION_JSON, TEXT_HTML, TEXT_PLAIN,
};
use crate::transport::{accepts_gzip, decode_request, encode_response};
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::header::HeaderMap;
use hyper::{Method, Request, StatusCode};
use metrics_store::{FilePersister, Metric, MetricKind, MetricQuery, MetricStore, Repository};
use std::convert::Infallible;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Saves the in-memory store after every write when periodic saving is disabled.
pub struct SyncPersister {
    pub store: Arc<MetricStore>,
    pub persister: FilePersister,
}

pub struct AppState {
    pub repository: Arc<dyn Repository>,
    pub key: Option<String>,
    pub max_content_length: usize,
    pub sync_persister: Option<SyncPersister>,
}

impl AppState {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        AppState {
            repository,
            key: None,
            max_content_length: crate::config::ServerConfig::default().max_content_length,
            sync_persister: None,
        }
    }

    async fn after_write(&self) {
        if let Some(sync) = &self.sync_persister {
            sync.persister.flush(&sync.store).await;
        }
    }
}

#[derive(Clone, Copy)]
enum Route<'a> {
    Index,
    Ping,
    UpdateJson,
    UpdatesJson,
    ValueJson,
    UpdatePath {
        kind: &'a str,
        id: &'a str,
        value: &'a str,
    },
    ValuePath {
        kind: &'a str,
        id: &'a str,
    },
}

impl<'a> Route<'a> {
    fn resolve(segments: &[&'a str]) -> Option<(Method, Route<'a>)> {
        let route = match *segments {
            [] => (Method::GET, Route::Index),
            ["ping"] => (Method::GET, Route::Ping),
            ["update"] => (Method::POST, Route::UpdateJson),
            ["updates"] => (Method::POST, Route::UpdatesJson),
            ["value"] => (Method::POST, Route::ValueJson),
            ["update", kind, id, value] => (Method::POST, Route::UpdatePath { kind, id, value }),
            ["value", kind, id] => (Method::GET, Route::ValuePath { kind, id }),
            _ => return None,
        };
        Some(route)
    }
}

/// Entry point for every request: routing, transport encoding and the access log.
pub async fn handle<B>(state: Arc<AppState>, req: Request<B>) -> Result<HttpResponse, Infallible>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let gzip = accepts_gzip(req.headers());

    let response = match route(&state, req).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    };
    let response = encode_response(response, state.key.as_deref(), gzip).await;

    let size = response.body().size_hint().exact().unwrap_or_default();
    info!(
        %uri,
        %method,
        status = response.status().as_u16(),
        size,
        duration_us = started.elapsed().as_micros() as u64,
        "Handled request"
    );
    Ok(response)
}

fn error_response(e: &ServerError) -> HttpResponse {
    let status = e.status();
    if status.is_server_error() {
        error!("Request failed: {e}");
    }
    log_and_create_http_response(&e.to_string(), status)
}

async fn route<B>(state: &AppState, req: Request<B>) -> Result<HttpResponse, ServerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let segments: Vec<&str> = parts
        .uri
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let (allowed, route) = Route::resolve(&segments).ok_or(ServerError::NotFound)?;
    if parts.method != allowed {
        return Err(ServerError::MethodNotAllowed);
    }

    match route {
        Route::Index => index(state).await,
        Route::Ping => ping(state).await,
        Route::UpdatePath { kind, id, value } => update_path(state, kind, id, value).await,
        Route::ValuePath { kind, id } => value_path(state, kind, id).await,
        Route::UpdateJson | Route::UpdatesJson | Route::ValueJson => {
            if let Some(response) = verify_request_content_length(
                &parts.headers,
                state.max_content_length,
                "Rejected request",
            ) {
                return Ok(response);
            }
            let body = read_body(state, &parts.headers, body).await?;
            match route {
                Route::UpdateJson => update_json(state, &body).await,
                Route::UpdatesJson => updates_json(state, &body).await,
                _ => value_json(state, &body).await,
            }
        }
    }
}

async fn read_body<B>(state: &AppState, headers: &HeaderMap, body: B) -> Result<Bytes, ServerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(body, state.max_content_length).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => {
            return Err(ServerError::PayloadTooLarge)
        }
        Err(e) => return Err(ServerError::BadRequest(format!("Failed to read body: {e}"))),
    };
    decode_request(
        headers,
        body,
        state.key.as_deref(),
        state.max_content_length,
    )
}

fn metric_response(metric: Metric) -> Result<HttpResponse, ServerError> {
    let body = serde_json::to_vec(&metric).map_err(metrics_store::StoreError::from)?;
    Ok(create_response(StatusCode::OK, APPLICATION_JSON, body))
}

async fn update_path(
    state: &AppState,
    kind: &str,
    id: &str,
    raw: &str,
) -> Result<HttpResponse, ServerError> {
    MetricKind::from_str(kind).map_err(|_| ServerError::IncorrectType)?;
    let metric = Metric::parse(kind, id, raw).map_err(|_| ServerError::IncorrectValue)?;
    state.repository.add(metric).await?;
    state.after_write().await;
    Ok(create_response(StatusCode::OK, TEXT_PLAIN, Bytes::new()))
}

async fn value_path(state: &AppState, kind: &str, id: &str) -> Result<HttpResponse, ServerError> {
    let kind = MetricKind::from_str(kind).map_err(|_| ServerError::NotFound)?;
    let metric = state.repository.get(kind, id).await?;
    Ok(create_response(
        StatusCode::OK,
        TEXT_PLAIN,
        metric.format_value(),
    ))
}

async fn update_json(state: &AppState, body: &[u8]) -> Result<HttpResponse, ServerError> {
    let metric: Metric = serde_json::from_slice(body)?;
    let merged = state.repository.add(metric).await?;
    state.after_write().await;
    metric_response(merged)
}

async fn updates_json(state: &AppState, body: &[u8]) -> Result<HttpResponse, ServerError> {
    let batch: Vec<Metric> = serde_json::from_slice(body)?;
    let len = batch.len();
    state.repository.add_batch(batch).await?;
    state.after_write().await;
    Ok(log_and_create_http_response(
        &format!("Accepted {len} metrics"),
        StatusCode::OK,
    ))
}

async fn value_json(state: &AppState, body: &[u8]) -> Result<HttpResponse, ServerError> {
    let query: MetricQuery = serde_json::from_slice(body)?;
    let kind = MetricKind::from_str(&query.kind).map_err(|_| ServerError::NotFound)?;
    let metric = state.repository.get(kind, &query.id).await?;
    metric_response(metric)
}

async fn index(state: &AppState) -> Result<HttpResponse, ServerError> {
    let snapshot = state.repository.get_all().await?;
    let mut page = String::new();
    for metric in snapshot.iter() {
        // writing to a String cannot fail
        let _ = writeln!(page, "{}: {}: {}", metric.kind(), metric.id, metric.format_value());
    }
    Ok(create_response(StatusCode::OK, TEXT_HTML, page))
}

async fn ping(state: &AppState) -> Result<HttpResponse, ServerError> {
    state.repository.ping().await?;
    Ok(create_response(StatusCode::OK, TEXT_PLAIN, Bytes::new()))
}
