//! The job table and its tick-driven scan.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use tessera_metrics::{clock as clock_metrics, counter, gauge, histogram, labels};

use crate::{
    Error, Result,
    clock::{Clock, SystemClock, duration_ms},
    types::{ExecutionMode, JobCreate, JobInfo, JobTask, ScanReport, SchedulerStatus},
};

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Scans closer together than this are skipped.
    pub min_scan_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_scan_interval: Duration::from_millis(16),
        }
    }
}

struct Job {
    name: String,
    interval_ms: u64,
    limit: u64,
    mode: ExecutionMode,
    task: JobTask,
    last_run_ms: u64,
    run_count: u64,
}

impl Job {
    fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_run_ms) >= self.interval_ms
    }

    fn is_exhausted(&self) -> bool {
        self.limit > 0 && self.run_count >= self.limit
    }

    fn info(&self) -> JobInfo {
        JobInfo {
            name: self.name.clone(),
            interval_ms: self.interval_ms,
            limit: self.limit,
            mode: self.mode,
            run_count: self.run_count,
            last_run_ms: self.last_run_ms,
        }
    }
}

struct ScanState {
    last_scan_ms: u64,
    scans: u64,
}

/// Table of named periodic jobs.
///
/// Jobs run in insertion order. The table lock is held only while reading or
/// updating job metadata, never while a job runs, so a job may add or remove
/// jobs on the scheduler that runs it.
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    min_scan_ms: u64,
    jobs: Mutex<Vec<Job>>,
    scan: Mutex<ScanState>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            min_scan_ms: duration_ms(config.min_scan_interval),
            clock,
            jobs: Mutex::new(Vec::new()),
            scan: Mutex::new(ScanState {
                last_scan_ms: now,
                scans: 0,
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a job. Its first run is one interval from now.
    pub fn add_job(&self, create: JobCreate) -> Result<()> {
        let now = self.clock.now_ms();
        let mut jobs = self.jobs();
        if jobs.iter().any(|j| j.name == create.name) {
            return Err(Error::duplicate_job(create.name));
        }
        info!(
            name = %create.name,
            interval_ms = duration_ms(create.interval),
            limit = create.limit,
            mode = %create.mode,
            "job scheduled"
        );
        jobs.push(Job {
            name: create.name,
            interval_ms: duration_ms(create.interval),
            limit: create.limit,
            mode: create.mode,
            task: create.task,
            last_run_ms: now,
            run_count: 0,
        });
        #[cfg(feature = "metrics")]
        gauge!(clock_metrics::JOBS_SCHEDULED).set(jobs.len() as f64);
        Ok(())
    }

    /// Remove one job. Returns whether it existed.
    pub fn remove_job(&self, name: &str) -> bool {
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|j| j.name != name);
        let removed = jobs.len() != before;
        if removed {
            debug!(name, "job removed");
            #[cfg(feature = "metrics")]
            gauge!(clock_metrics::JOBS_SCHEDULED).set(jobs.len() as f64);
        }
        removed
    }

    /// Drop every job. Detached runs already handed off keep going.
    pub fn clear_jobs(&self) {
        let mut jobs = self.jobs();
        let count = jobs.len();
        jobs.clear();
        info!(count, "job table cleared");
        #[cfg(feature = "metrics")]
        gauge!(clock_metrics::JOBS_SCHEDULED).set(0.0);
    }

    pub fn has_job(&self, name: &str) -> bool {
        self.jobs().iter().any(|j| j.name == name)
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    pub fn job_infos(&self) -> Vec<JobInfo> {
        self.jobs().iter().map(Job::info).collect()
    }

    pub fn status(&self) -> SchedulerStatus {
        let (job_count, detached_count) = {
            let jobs = self.jobs();
            let detached = jobs
                .iter()
                .filter(|j| j.mode == ExecutionMode::Detached)
                .count();
            (jobs.len(), detached)
        };
        let scan = self.scan.lock().unwrap_or_else(|e| e.into_inner());
        SchedulerStatus {
            job_count,
            detached_count,
            scans: scan.scans,
            last_scan_ms: scan.last_scan_ms,
        }
    }

    /// Run every due job. Call once per host tick.
    ///
    /// Returns immediately when the previous effective scan was less than the
    /// minimum scan interval ago. Jobs that reached their limit are removed
    /// before this returns, even when an inline job failed. An inline failure
    /// stops the scan and is returned; jobs after it stay due.
    pub fn update_jobs(&self) -> Result<ScanReport> {
        let now = self.clock.now_ms();
        {
            let mut scan = self.scan.lock().unwrap_or_else(|e| e.into_inner());
            if now.saturating_sub(scan.last_scan_ms) < self.min_scan_ms {
                #[cfg(feature = "metrics")]
                counter!(clock_metrics::THROTTLED_SCANS_TOTAL).increment(1);
                return Ok(ScanReport::throttled());
            }
            scan.last_scan_ms = now;
            scan.scans += 1;
        }

        let _span = tracing::debug_span!("update_jobs", now_ms = now).entered();
        let started = Instant::now();

        let due: Vec<String> = self
            .jobs()
            .iter()
            .filter(|j| j.is_due(now))
            .map(|j| j.name.clone())
            .collect();

        let mut report = ScanReport::default();
        let mut failure = None;
        for name in due {
            let Some((task, mode)) = self.begin_run(&name, now) else {
                continue;
            };
            report.executed += 1;
            #[cfg(feature = "metrics")]
            counter!(clock_metrics::EXECUTIONS_TOTAL, labels::MODE => mode.as_str()).increment(1);

            let outcome = match mode {
                ExecutionMode::Inline => {
                    task().map_err(|source| Error::job_failed(name.as_str(), source))
                },
                ExecutionMode::Detached => dispatch_detached(&name, task),
            };
            if let Err(e) = outcome {
                warn!(name = %name, error = %e, "job failed, stopping scan");
                #[cfg(feature = "metrics")]
                counter!(clock_metrics::FAILURES_TOTAL).increment(1);
                failure = Some(e);
                break;
            }
        }

        report.removed = self.purge_exhausted();

        let elapsed = started.elapsed();
        debug!(
            executed = report.executed,
            removed = report.removed.len(),
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "scan complete"
        );
        #[cfg(feature = "metrics")]
        histogram!(clock_metrics::SCAN_DURATION_SECONDS).record(elapsed.as_secs_f64());

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Re-check a job picked for this scan and record the run.
    ///
    /// Earlier jobs in the same scan may have removed or replaced it.
    fn begin_run(&self, name: &str, now: u64) -> Option<(JobTask, ExecutionMode)> {
        let mut jobs = self.jobs();
        let job = jobs.iter_mut().find(|j| j.name == name)?;
        if !job.is_due(now) || job.is_exhausted() {
            return None;
        }
        job.last_run_ms = now;
        job.run_count += 1;
        Some((Arc::clone(&job.task), job.mode))
    }

    fn purge_exhausted(&self) -> Vec<String> {
        let mut jobs = self.jobs();
        let mut removed = Vec::new();
        jobs.retain(|j| {
            if j.is_exhausted() {
                removed.push(j.name.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            for name in &removed {
                info!(name = %name, "job reached its limit and was removed");
            }
            #[cfg(feature = "metrics")]
            gauge!(clock_metrics::JOBS_SCHEDULED).set(jobs.len() as f64);
        }
        removed
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Hand a job to a worker without waiting for it.
///
/// Inside a tokio runtime the job goes to the blocking pool; otherwise it gets
/// its own named thread. Errors are only logged.
fn dispatch_detached(name: &str, task: JobTask) -> Result<()> {
    let job_name = name.to_string();
    let run = move || {
        if let Err(e) = task() {
            warn!(name = %job_name, error = %e, "detached job failed");
            #[cfg(feature = "metrics")]
            counter!(clock_metrics::DETACHED_FAILURES_TOTAL).increment(1);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            drop(handle.spawn_blocking(run));
            Ok(())
        },
        Err(_) => std::thread::Builder::new()
            .name(format!("job:{name}"))
            .spawn(run)
            .map(drop)
            .map_err(|source| Error::spawn(name, source)),
    }
}
