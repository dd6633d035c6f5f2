// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic sampling into the agent's [`MetricStore`].
//!
//! Every poll tick runs each [`Sampler`] once, then adds a `RandomValue`
//! gauge and increments the `PollCount` counter. A sampler that fails is
//! skipped for that tick only.

use crate::error::SampleError;
use metrics_store::{Metric, MetricStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod process;
pub mod system;

pub use process::ProcessSampler;
pub use system::SystemSampler;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// A source of gauges read on every poll tick.
pub trait Sampler: Send {
    fn name(&self) -> &'static str;

    fn sample(&mut self) -> Result<Vec<Metric>, SampleError>;
}

pub struct Collector {
    samplers: Vec<Box<dyn Sampler>>,
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new(vec![
            Box::new(ProcessSampler::default()),
            Box::new(SystemSampler::new()),
        ])
    }
}

impl Collector {
    pub fn new(samplers: Vec<Box<dyn Sampler>>) -> Self {
        Collector { samplers }
    }

    /// Runs one poll tick against `store` and returns how many metrics were written.
    pub fn poll(&mut self, store: &MetricStore) -> usize {
        let mut batch = Vec::new();
        for sampler in &mut self.samplers {
            match sampler.sample() {
                Ok(metrics) => batch.extend(metrics),
                Err(e) => debug!("Skipping sampler {}: {e}", sampler.name()),
            }
        }
        batch.push(Metric::gauge(RANDOM_VALUE, rand::random::<f64>()));
        batch.push(Metric::counter(POLL_COUNT, 1));

        let mut written = 0;
        for metric in batch {
            let id = metric.id.clone();
            match store.add(metric) {
                Ok(_) => written += 1,
                Err(e) => warn!("Failed to record {id}: {e}"),
            }
        }
        written
    }

    pub async fn run(mut self, store: Arc<MetricStore>, period: Duration, cancel: CancellationToken) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let written = self.poll(&store);
                    debug!("Polled {written} metrics");
                }
                () = cancel.cancelled() => {
                    debug!("Collector shutting down");
                    break;
                }
            }
        }
    }
}
