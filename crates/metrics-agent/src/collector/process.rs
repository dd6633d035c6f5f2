// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process runtime gauges read from procfs.
//!
//! Memory figures come from `/proc/self/status` and are reported in bytes.
//! Fault counts and CPU time come from `/proc/self/stat`; CPU time is reported
//! in clock ticks as the kernel exposes it.

use crate::collector::Sampler;
use crate::error::SampleError;
use metrics_store::Metric;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

const PROC_SELF: &str = "/proc/self";

// (status key, metric id, value is in kB)
const STATUS_FIELDS: [(&str, &str, bool); 8] = [
    ("VmData", "HeapBytes", true),
    ("VmStk", "StackBytes", true),
    ("VmRSS", "ResidentBytes", true),
    ("VmHWM", "PeakResidentBytes", true),
    ("VmSize", "VirtualBytes", true),
    ("Threads", "Threads", false),
    ("voluntary_ctxt_switches", "VoluntaryCtxSwitches", false),
    ("nonvoluntary_ctxt_switches", "NonvoluntaryCtxSwitches", false),
];

// (index after the command name, metric id); the state field is index 0
const STAT_FIELDS: [(usize, &str); 4] = [
    (7, "MinorFaults"),
    (9, "MajorFaults"),
    (11, "UserTimeTicks"),
    (12, "SystemTimeTicks"),
];

pub struct ProcessSampler {
    proc_dir: PathBuf,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        ProcessSampler::new(PROC_SELF)
    }
}

impl ProcessSampler {
    pub fn new(proc_dir: impl Into<PathBuf>) -> Self {
        ProcessSampler {
            proc_dir: proc_dir.into(),
        }
    }

    fn read(&self, file: &'static str) -> Result<String, SampleError> {
        let path = self.proc_dir.join(file);
        fs::read_to_string(&path).map_err(|e| {
            debug!("Could not read {}: {e}", path.display());
            SampleError::Unavailable {
                source_name: file,
                reason: e.to_string(),
            }
        })
    }
}

impl Sampler for ProcessSampler {
    fn name(&self) -> &'static str {
        "process"
    }

    fn sample(&mut self) -> Result<Vec<Metric>, SampleError> {
        let mut metrics = parse_status(&self.read("status")?);
        metrics.extend(parse_stat(&self.read("stat")?)?);
        Ok(metrics)
    }
}

/// Extracts the known fields of a `status` file; absent or malformed lines are skipped.
pub(crate) fn parse_status(contents: &str) -> Vec<Metric> {
    let mut metrics = Vec::with_capacity(STATUS_FIELDS.len());
    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some((_, id, in_kb)) = STATUS_FIELDS.iter().find(|(k, _, _)| *k == key) else {
            continue;
        };
        let Some(value) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok())
        else {
            debug!("Skipping malformed status line: {line}");
            continue;
        };
        let value = if *in_kb { value * 1024 } else { value };
        metrics.push(Metric::gauge(*id, value as f64));
    }
    metrics
}

pub(crate) fn parse_stat(contents: &str) -> Result<Vec<Metric>, SampleError> {
    // the command name may itself contain spaces and parentheses
    let (_, fields) = contents.rsplit_once(')').ok_or_else(|| SampleError::Parse {
        source_name: "stat",
        reason: "missing command name".to_string(),
    })?;
    let fields: Vec<&str> = fields.split_whitespace().collect();

    STAT_FIELDS
        .iter()
        .map(|(index, id)| {
            fields
                .get(*index)
                .and_then(|v| v.parse::<u64>().ok())
                .map(|v| Metric::gauge(*id, v as f64))
                .ok_or_else(|| SampleError::Parse {
                    source_name: "stat",
                    reason: format!("field {id} is missing or not a number"),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_store::MetricKind;

    const STATUS: &str = "Name:\tmetrics-agent
Umask:\t0022
State:\tS (sleeping)
VmPeak:\t  120000 kB
VmSize:\t  118000 kB
VmHWM:\t    9000 kB
VmRSS:\t    8000 kB
VmData:\t   40000 kB
VmStk:\t     132 kB
Threads:\t5
voluntary_ctxt_switches:\t150
nonvoluntary_ctxt_switches:\t3
";

    const STAT: &str = "4242 (metrics (agent)) S 1 4242 4242 0 -1 4194560 1200 0 3 0 57 21 0 0 20 0 5 0 100 120832000 2000";

    fn value_of(metrics: &[Metric], id: &str) -> String {
        metrics
            .iter()
            .find(|m| m.id == id)
            .map(Metric::format_value)
            .unwrap_or_else(|| panic!("{id} missing"))
    }

    #[test]
    fn test_parse_status() {
        let metrics = parse_status(STATUS);
        assert_eq!(metrics.len(), 8);
        assert!(metrics.iter().all(|m| m.kind() == MetricKind::Gauge));
        assert_eq!(value_of(&metrics, "HeapBytes"), (40000u64 * 1024).to_string());
        assert_eq!(value_of(&metrics, "StackBytes"), (132u64 * 1024).to_string());
        assert_eq!(value_of(&metrics, "ResidentBytes"), (8000u64 * 1024).to_string());
        assert_eq!(value_of(&metrics, "Threads"), "5");
        assert_eq!(value_of(&metrics, "NonvoluntaryCtxSwitches"), "3");
    }

    #[test]
    fn test_parse_status_skips_unknown_and_malformed_lines() {
        let metrics = parse_status("VmRSS:\tlots kB\nFoo:\t1\nThreads:\t2\n");
        assert_eq!(metrics, vec![Metric::gauge("Threads", 2.0)]);
    }

    #[test]
    fn test_parse_stat() {
        let metrics = parse_stat(STAT).unwrap();
        assert_eq!(value_of(&metrics, "MinorFaults"), "1200");
        assert_eq!(value_of(&metrics, "MajorFaults"), "3");
        assert_eq!(value_of(&metrics, "UserTimeTicks"), "57");
        assert_eq!(value_of(&metrics, "SystemTimeTicks"), "21");
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert!(matches!(
            parse_stat("1 (a) S 1 2"),
            Err(SampleError::Parse { .. })
        ));
        assert!(parse_stat("garbage").is_err());
    }

    #[test]
    fn test_missing_proc_dir_is_unavailable() {
        let mut sampler = ProcessSampler::new("/nonexistent/proc/self");
        assert!(matches!(
            sampler.sample(),
            Err(SampleError::Unavailable { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sample_own_process() {
        let metrics = ProcessSampler::default().sample().unwrap();
        assert!(metrics.iter().any(|m| m.id == "ResidentBytes"));
        assert!(metrics.iter().any(|m| m.id == "UserTimeTicks"));
    }
}
