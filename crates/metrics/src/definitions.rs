//! Metric name and label definitions.
//!
//! All names carry the `tessera_` prefix. Label keys shared across metrics live
//! in [`labels`].

/// Scheduler metrics
pub mod clock {
    /// Total number of job executions started, labelled by `mode`
    pub const EXECUTIONS_TOTAL: &str = "tessera_clock_executions_total";
    /// Inline jobs that returned an error
    pub const FAILURES_TOTAL: &str = "tessera_clock_failures_total";
    /// Detached jobs that returned an error in their own thread
    pub const DETACHED_FAILURES_TOTAL: &str = "tessera_clock_detached_failures_total";
    /// Scans skipped because of the minimum scan interval
    pub const THROTTLED_SCANS_TOTAL: &str = "tessera_clock_throttled_scans_total";
    /// Duration of an effective `update_jobs` scan in seconds
    pub const SCAN_DURATION_SECONDS: &str = "tessera_clock_scan_duration_seconds";
    /// Number of jobs currently in the table
    pub const JOBS_SCHEDULED: &str = "tessera_clock_jobs_scheduled";
}

/// Plugin lifecycle metrics
pub mod plugins {
    /// Plugins mounted successfully
    pub const MOUNTS_TOTAL: &str = "tessera_plugins_mounts_total";
    /// Plugins that failed to load or instantiate, labelled by `stage`
    pub const MOUNT_FAILURES_TOTAL: &str = "tessera_plugins_mount_failures_total";
    /// Hot reloads attempted
    pub const RELOADS_TOTAL: &str = "tessera_plugins_reloads_total";
    /// Plugins unmounted
    pub const UNMOUNTS_TOTAL: &str = "tessera_plugins_unmounts_total";
    /// `update()` calls that returned an error
    pub const UPDATE_ERRORS_TOTAL: &str = "tessera_plugins_update_errors_total";
    /// Duration of a full `update_all` pass in seconds
    pub const UPDATE_DURATION_SECONDS: &str = "tessera_plugins_update_duration_seconds";
    /// Number of plugins currently registered
    pub const MOUNTED: &str = "tessera_plugins_mounted";
}

/// Common label keys
pub mod labels {
    pub const MODE: &str = "mode";
    pub const PLUGIN: &str = "plugin";
    pub const STAGE: &str = "stage";
}

/// Histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Per-tick work: 50µs to 1s. Anything near a frame (16ms) is already slow.
    pub static TICK_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.000_05, 0.000_1, 0.000_5, 0.001, 0.002, 0.004, 0.008, 0.016, 0.033, 0.1, 0.25, 1.0,
        ]
    });
}
