// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http_utils;
pub mod server;
pub mod transport;

pub use backend::Backend;
pub use config::ServerConfig;
pub use error::ServerError;
pub use handlers::{AppState, SyncPersister};
pub use server::serve;
