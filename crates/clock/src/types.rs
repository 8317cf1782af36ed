//! Job definitions and scheduler snapshots.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

/// Zero-argument callable run by the scheduler. Arguments are captured.
pub type JobTask = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Where a due job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// On the thread calling `update_jobs`, before it returns.
    #[default]
    Inline,
    /// On a worker; the scan does not wait for it or observe its result.
    Detached,
}

impl ExecutionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Detached => "detached",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for [`Scheduler::add_job`](crate::Scheduler::add_job).
#[derive(Clone)]
pub struct JobCreate {
    pub name: String,
    pub interval: Duration,
    /// Maximum number of runs; `0` means unlimited.
    pub limit: u64,
    pub mode: ExecutionMode,
    pub task: JobTask,
}

impl JobCreate {
    pub fn new<F>(name: impl Into<String>, interval: Duration, task: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            interval,
            limit: 0,
            mode: ExecutionMode::Inline,
            task: Arc::new(task),
        }
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn detached(self) -> Self {
        self.mode(ExecutionMode::Detached)
    }
}

impl fmt::Debug for JobCreate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCreate")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("limit", &self.limit)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Read-only view of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    pub interval_ms: u64,
    pub limit: u64,
    pub mode: ExecutionMode,
    pub run_count: u64,
    pub last_run_ms: u64,
}

/// Summary of the whole scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub job_count: usize,
    pub detached_count: usize,
    /// Effective (non-throttled) scans so far.
    pub scans: u64,
    pub last_scan_ms: u64,
}

/// What a single `update_jobs` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The call returned early because of the minimum scan interval.
    pub throttled: bool,
    /// Jobs started during the scan, inline and detached.
    pub executed: usize,
    /// Jobs purged after reaching their limit.
    pub removed: Vec<String>,
}

impl ScanReport {
    pub(crate) fn throttled() -> Self {
        Self {
            throttled: true,
            ..Self::default()
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let job = JobCreate::new("tick", Duration::from_millis(100), || Ok(()));
        assert_eq!(job.limit, 0);
        assert_eq!(job.mode, ExecutionMode::Inline);

        let job = job.limit(5).detached();
        assert_eq!(job.limit, 5);
        assert_eq!(job.mode, ExecutionMode::Detached);
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&ExecutionMode::Detached).unwrap();
        assert_eq!(json, "\"detached\"");
        let back: ExecutionMode = serde_json::from_str("\"inline\"").unwrap();
        assert_eq!(back, ExecutionMode::Inline);
    }
}
