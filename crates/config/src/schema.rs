//! Config schema types (scheduler, host loop, plugins, metrics).

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub scheduler: SchedulerConfig,
    pub host: HostConfig,
    pub plugins: PluginsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Calls to `update_jobs` closer together than this are skipped.
    pub min_scan_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_scan_interval_ms: 16,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn min_scan_interval(&self) -> Duration {
        Duration::from_millis(self.min_scan_interval_ms)
    }
}

/// How the "update all plugins" job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    #[default]
    Inline,
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Ticks per second of the host loop.
    pub tick_rate_hz: u32,
    /// Cadence of the plugin update job.
    pub update_interval_ms: u64,
    pub update_mode: UpdateMode,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            update_interval_ms: 100,
            update_mode: UpdateMode::Inline,
        }
    }
}

impl HostConfig {
    /// Time between two ticks. `None` when the tick rate is zero.
    #[must_use]
    pub fn tick_period(&self) -> Option<Duration> {
        (self.tick_rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz)))
    }

    #[must_use]
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for plugin directories. Relative paths resolve
    /// against the working directory.
    pub root: PathBuf,
    /// File whose presence marks a directory as a plugin.
    pub entry_file: String,
    /// Directory names never treated as plugins.
    pub exclude: Vec<String>,
    /// Keep a plugin's window open across hot reloads.
    pub preserve_open_on_reload: bool,
    /// Reload plugins whose directory changes on disk.
    pub watch: bool,
    /// Register the plugins shipped inside the binary.
    pub bundled: bool,
    /// Where dynamic libraries are copied before loading. Defaults to a
    /// directory under the system temp dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_dir: Option<PathBuf>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("plugins"),
            entry_file: "plugin.toml".into(),
            exclude: ["target", ".git", "__pycache__", "node_modules"]
                .into_iter()
                .map(String::from)
                .collect(),
            preserve_open_on_reload: false,
            watch: true,
            bundled: true,
            shadow_dir: None,
        }
    }
}

impl PluginsConfig {
    #[must_use]
    pub fn shadow_dir(&self) -> PathBuf {
        self.shadow_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tessera-shadow"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install a recorder at startup.
    pub enabled: bool,
    /// Labels added to every metric.
    pub labels: BTreeMap<String, String>,
    /// Write the Prometheus text exposition here periodically, for a
    /// node-exporter style textfile collector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub textfile: Option<PathBuf>,
    pub write_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            labels: BTreeMap::new(),
            textfile: None,
            write_interval_ms: 15_000,
        }
    }
}

impl MetricsConfig {
    #[must_use]
    pub fn write_interval(&self) -> Duration {
        Duration::from_millis(self.write_interval_ms)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: TesseraConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, TesseraConfig::default());
        assert_eq!(cfg.scheduler.min_scan_interval_ms, 16);
        assert_eq!(cfg.host.tick_rate_hz, 60);
        assert_eq!(cfg.host.update_interval_ms, 100);
        assert_eq!(cfg.plugins.entry_file, "plugin.toml");
        assert!(cfg.plugins.exclude.iter().any(|e| e == "__pycache__"));
        assert!(!cfg.plugins.preserve_open_on_reload);
        assert_eq!(cfg.metrics.write_interval_ms, 15_000);
        assert!(cfg.metrics.textfile.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg: TesseraConfig = toml::from_str(
            r#"
            [host]
            update_mode = "detached"

            [plugins]
            root = "/opt/tessera/plugins"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.host.update_mode, UpdateMode::Detached);
        assert_eq!(cfg.host.tick_rate_hz, 60);
        assert_eq!(cfg.plugins.root, PathBuf::from("/opt/tessera/plugins"));
        assert!(cfg.plugins.watch);
    }

    #[test]
    fn metrics_labels_are_a_table() {
        let cfg: TesseraConfig =
            toml::from_str("[metrics]\nenabled = true\nlabels = { host = \"desk\" }\n").unwrap();
        assert!(cfg.metrics.enabled);
        assert_eq!(cfg.metrics.labels.get("host").map(String::as_str), Some("desk"));
    }

    #[test]
    fn tick_period_from_rate() {
        let host = HostConfig::default();
        let period = host.tick_period().unwrap();
        assert!(period > Duration::from_millis(16) && period < Duration::from_millis(17));

        let stopped = HostConfig {
            tick_rate_hz: 0,
            ..HostConfig::default()
        };
        assert!(stopped.tick_period().is_none());
    }
}
