// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host memory and per-core CPU gauges.

use crate::collector::Sampler;
use crate::error::SampleError;
use metrics_store::Metric;
use sysinfo::System;

pub struct SystemSampler {
    system: System,
}

impl Default for SystemSampler {
    fn default() -> Self {
        SystemSampler::new()
    }
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Sampler for SystemSampler {
    fn name(&self) -> &'static str {
        "system"
    }

    fn sample(&mut self) -> Result<Vec<Metric>, SampleError> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(SampleError::Unavailable {
                source_name: "system memory",
                reason: "total memory reported as 0".to_string(),
            });
        }

        let mut metrics = vec![
            Metric::gauge("TotalMemory", total as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
            Metric::gauge("UsedMemory", self.system.used_memory() as f64),
        ];
        metrics.extend(cpu_gauges(
            self.system.cpus().iter().map(|cpu| cpu.cpu_usage()),
        ));
        Ok(metrics)
    }
}

/// One `CPUutilization{N}` gauge per core, numbered from 1.
fn cpu_gauges(usages: impl Iterator<Item = f32>) -> impl Iterator<Item = Metric> {
    usages
        .enumerate()
        .map(|(i, usage)| Metric::gauge(format!("CPUutilization{}", i + 1), f64::from(usage)))
}
