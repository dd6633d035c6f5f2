// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod retry;
pub mod sender;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::AgentError;
pub use retry::{RetryError, RetryPolicy};
