//! The host loop: one scheduler, one plugin manager, one tick.

use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    anyhow::Context,
    tessera_clock::{ExecutionMode, JobCreate, Scheduler, SchedulerConfig},
    tessera_common::{
        plugin::{Host, Icon, Signal, SignalContext},
        resources::ResourceHandle,
    },
    tessera_config::{TesseraConfig, UpdateMode},
    tessera_plugins::{
        BuiltinLoader, ChainLoader, DiscoveryOptions, DylibLoader, ManagerOptions, MountReport,
        PluginManager, ReloadOptions, bundled,
    },
    tokio::{sync::mpsc, time::MissedTickBehavior},
    tracing::{debug, info, trace, warn},
};

/// Name of the job that drives every plugin's `update()`.
pub const UPDATE_JOB: &str = "update_plugins";

/// Name of the job that writes the metrics textfile.
#[cfg(feature = "metrics")]
pub const METRICS_JOB: &str = "write_metrics";

// ── Host services ───────────────────────────────────────────────────────────

struct Asset {
    owner: String,
    path: PathBuf,
}

/// The services plugins get at construction.
///
/// There is no drawing surface here, so icons are only validated and
/// tracked: a handle stays live until its owner releases it.
pub struct DesktopHost {
    plugins_root: PathBuf,
    next_handle: AtomicU64,
    assets: Mutex<BTreeMap<u64, Asset>>,
}

impl DesktopHost {
    pub fn new(plugins_root: impl Into<PathBuf>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            next_handle: AtomicU64::new(1),
            assets: Mutex::new(BTreeMap::new()),
        }
    }

    fn assets(&self) -> MutexGuard<'_, BTreeMap<u64, Asset>> {
        self.assets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Handles currently held by `owner`.
    pub fn live_handles(&self, owner: &str) -> usize {
        self.assets().values().filter(|a| a.owner == owner).count()
    }

    /// Drop a handle, refusing when it belongs to another plugin.
    pub fn release_checked(
        &self,
        owner: &str,
        handle: ResourceHandle,
    ) -> tessera_common::Result<bool> {
        let mut assets = self.assets();
        match assets.get(&handle.0) {
            None => Ok(false),
            Some(asset) if asset.owner != owner => {
                Err(tessera_common::Error::ForeignResource {
                    owner: owner.to_string(),
                    handle: handle.0,
                })
            },
            Some(_) => {
                if let Some(asset) = assets.remove(&handle.0) {
                    trace!(owner, %handle, path = %asset.path.display(), "asset released");
                }
                Ok(true)
            },
        }
    }
}

impl Host for DesktopHost {
    fn plugin_dir(&self, plugin: &str) -> PathBuf {
        self.plugins_root.join(plugin)
    }

    fn load_icon(&self, owner: &str, path: &Path) -> anyhow::Result<Icon> {
        let (width, height) = png_dimensions(path)
            .with_context(|| format!("failed to load icon {}", path.display()))?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.assets().insert(id, Asset {
            owner: owner.to_string(),
            path: path.to_path_buf(),
        });
        debug!(owner, handle = id, width, height, "icon loaded");
        Ok(Icon {
            handle: ResourceHandle(id),
            width,
            height,
        })
    }

    fn release(&self, owner: &str, handle: ResourceHandle) {
        if let Err(e) = self.release_checked(owner, handle) {
            warn!(error = %e, "asset release refused");
        }
    }
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Width and height from a PNG header. Other formats read as 0x0.
fn png_dimensions(path: &Path) -> std::io::Result<(u32, u32)> {
    let mut header = [0u8; 24];
    let mut file = std::fs::File::open(path)?;
    let read = file.read(&mut header)?;
    if read < header.len() || header[..8] != PNG_SIGNATURE || &header[12..16] != b"IHDR" {
        return Ok((0, 0));
    }
    let width = u32::from_be_bytes([header[16], header[17], header[18], header[19]]);
    let height = u32::from_be_bytes([header[20], header[21], header[22], header[23]]);
    Ok((width, height))
}

// ── Wiring ──────────────────────────────────────────────────────────────────

/// Build a manager for `config`: bundled plugins (when enabled) in front of
/// dynamic libraries.
pub fn build_manager(config: &TesseraConfig, host: Arc<dyn Host>) -> PluginManager {
    let builtin = if config.plugins.bundled {
        bundled::builtin_loader()
    } else {
        BuiltinLoader::new()
    };
    let dylib = DylibLoader::new(config.plugins.shadow_dir());
    dylib.cleanup_shadows();

    PluginManager::new(
        ManagerOptions {
            root: config.plugins.root.clone(),
            discovery: DiscoveryOptions {
                entry_file: config.plugins.entry_file.clone(),
                exclude: config.plugins.exclude.clone(),
            },
            reload: ReloadOptions {
                preserve_open: config.plugins.preserve_open_on_reload,
            },
        },
        host,
        Box::new(ChainLoader::new(builtin, dylib)),
    )
}

/// Replace `path` with `contents` so a collector never reads a partial file.
#[cfg(feature = "metrics")]
pub fn write_textfile(path: &Path, contents: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn lock(manager: &Mutex<PluginManager>) -> MutexGuard<'_, PluginManager> {
    manager.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Host loop ───────────────────────────────────────────────────────────────

/// Owns the scheduler and the plugin manager and drives both.
///
/// The manager sits behind a mutex only so the update job can run detached;
/// mounting and reloading happen on the loop's own task.
pub struct HostLoop {
    config: TesseraConfig,
    scheduler: Arc<Scheduler>,
    manager: Arc<Mutex<PluginManager>>,
}

impl HostLoop {
    pub fn new(config: TesseraConfig) -> Self {
        let host = Arc::new(DesktopHost::new(config.plugins.root.clone()));
        let manager = build_manager(&config, host);
        let scheduler = Scheduler::new(SchedulerConfig {
            min_scan_interval: config.scheduler.min_scan_interval(),
        });
        Self::with_parts(config, Arc::new(scheduler), manager)
    }

    pub fn with_parts(
        config: TesseraConfig,
        scheduler: Arc<Scheduler>,
        manager: PluginManager,
    ) -> Self {
        Self {
            config,
            scheduler,
            manager: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn manager(&self) -> MutexGuard<'_, PluginManager> {
        lock(&self.manager)
    }

    /// Mount every discoverable plugin, logging each failure.
    pub fn mount(&self) -> MountReport {
        let mut manager = self.manager();
        let report = manager.mount_all();
        for (name, e) in &report.failed {
            warn!(name = %name, error = %e, "plugin not mounted");
        }
        if let Err(e) = manager.load_all() {
            warn!(error = %e, "restoring plugin state failed");
        }
        report
    }

    /// Register the job that calls `update_all` every update interval.
    pub fn register_update_job(&self) -> tessera_clock::Result<()> {
        let manager = Arc::clone(&self.manager);
        let mode = match self.config.host.update_mode {
            UpdateMode::Inline => ExecutionMode::Inline,
            UpdateMode::Detached => ExecutionMode::Detached,
        };
        self.scheduler.add_job(
            JobCreate::new(UPDATE_JOB, self.config.host.update_interval(), move || {
                lock(&manager).update_all()?;
                Ok(())
            })
            .mode(mode),
        )
    }

    /// Register the job that rewrites `path` with `render()` every
    /// `metrics.write_interval_ms`. Write failures are logged; they never
    /// stop the scan that also drives plugin updates.
    #[cfg(feature = "metrics")]
    pub fn register_metrics_export<F>(&self, path: PathBuf, render: F) -> tessera_clock::Result<()>
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        info!(path = %path.display(), "exporting metrics to textfile");
        self.scheduler.add_job(JobCreate::new(
            METRICS_JOB,
            self.config.metrics.write_interval(),
            move || {
                if let Err(e) = write_textfile(&path, &render()) {
                    warn!(error = %format!("{e:#}"), "metrics textfile not written");
                }
                Ok(())
            },
        ))
    }

    /// One frame. Job errors are logged and never end the loop.
    pub fn tick(&self) {
        match self.scheduler.update_jobs() {
            Ok(report) if report.executed > 0 => {
                trace!(executed = report.executed, "jobs ran");
            },
            Ok(_) => {},
            Err(e) => warn!(error = %e, "tick failed"),
        }
    }

    /// React to plugin directories that changed on disk: reload what can be
    /// mounted, unmount what disappeared.
    pub fn apply_changes(&self, changed: impl IntoIterator<Item = String>) {
        let mut manager = self.manager();
        for name in manager.reload_candidates(changed) {
            if manager.find_source(&name).is_none() {
                if manager.unmount(&name) {
                    info!(name = %name, "plugin removed from disk");
                }
                continue;
            }
            match manager.hot_reload(&name) {
                Ok(()) => info!(name = %name, "plugin reloaded"),
                Err(e) => warn!(name = %name, error = %e, "plugin reload failed"),
            }
        }
    }

    /// Forward `signal`, persist, unmount everything, drop all jobs.
    pub fn shutdown(&self, signal: Signal) {
        let mut manager = self.manager();
        let ctx = SignalContext::now(manager.len());
        manager.forward_signal(signal, &ctx);
        if let Err(e) = manager.save_all() {
            warn!(error = %e, "saving plugin state failed");
        }
        manager.shutdown();
        drop(manager);
        self.scheduler.clear_jobs();
    }

    /// Run until interrupted or terminated. A hangup reloads every plugin.
    pub async fn run(self) -> anyhow::Result<()> {
        let period = self
            .config
            .host
            .tick_period()
            .context("host.tick_rate_hz must be greater than zero")?;

        let report = self.mount();
        info!(
            mounted = report.mounted.len(),
            failed = report.failed.len(),
            "host ready"
        );
        self.register_update_job()?;

        let (_watcher, mut changes) = self.watch();
        let mut signals = Signals::install()?;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let signal = loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                Some(name) = next_change(&mut changes) => {
                    let mut batch = vec![name];
                    if let Some(rx) = changes.as_mut() {
                        while let Ok(more) = rx.try_recv() {
                            batch.push(more);
                        }
                    }
                    self.apply_changes(batch);
                },
                signal = signals.recv() => match signal? {
                    Signal::Hangup => {
                        let mut manager = self.manager();
                        let ctx = SignalContext::now(manager.len());
                        manager.forward_signal(Signal::Hangup, &ctx);
                        let report = manager.reload_all();
                        info!(
                            reloaded = report.mounted.len(),
                            failed = report.failed.len(),
                            "plugins reloaded on hangup"
                        );
                    },
                    other => break other,
                },
            }
        };

        info!(%signal, "shutting down");
        self.shutdown(signal);
        Ok(())
    }

    #[cfg(feature = "file-watcher")]
    fn watch(
        &self,
    ) -> (
        Option<tessera_plugins::watcher::PluginWatcher>,
        Option<mpsc::UnboundedReceiver<String>>,
    ) {
        if !self.config.plugins.watch {
            return (None, None);
        }
        let options = DiscoveryOptions {
            entry_file: self.config.plugins.entry_file.clone(),
            exclude: self.config.plugins.exclude.clone(),
        };
        match tessera_plugins::watcher::PluginWatcher::start(&self.config.plugins.root, options) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                warn!(error = %e, "plugin watcher unavailable; hot reload on change is off");
                (None, None)
            },
        }
    }

    #[cfg(not(feature = "file-watcher"))]
    fn watch(&self) -> ((), Option<mpsc::UnboundedReceiver<String>>) {
        if self.config.plugins.watch {
            debug!("built without file-watcher; plugins.watch ignored");
        }
        ((), None)
    }
}

async fn next_change(rx: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Process signals the host reacts to.
struct Signals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            Ok(Self {
                terminate: signal(SignalKind::terminate())?,
                hangup: signal(SignalKind::hangup())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn recv(&mut self) -> std::io::Result<Signal> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.map(|()| Signal::Interrupt),
                _ = self.terminate.recv() => Ok(Signal::Terminate),
                _ = self.hangup.recv() => Ok(Signal::Hangup),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| Signal::Interrupt)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        tessera_clock::ManualClock,
        tessera_common::plugin::Plugin,
        tessera_plugins::PluginState,
    };

    use super::*;

    struct Counter {
        updates: Arc<AtomicU64>,
        deleted: Arc<AtomicU64>,
    }

    impl Plugin for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn mount(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn update(&mut self) -> anyhow::Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn delete(&mut self) {
            self.deleted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        clock: Arc<ManualClock>,
        updates: Arc<AtomicU64>,
        deleted: Arc<AtomicU64>,
        host: HostLoop,
    }

    fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = TesseraConfig::default();
        config.plugins.root = tmp.path().to_path_buf();
        config.plugins.bundled = false;

        let updates = Arc::new(AtomicU64::new(0));
        let deleted = Arc::new(AtomicU64::new(0));
        let loader = {
            let (updates, deleted) = (Arc::clone(&updates), Arc::clone(&deleted));
            BuiltinLoader::new().with("counter", move |_| {
                Ok(Box::new(Counter {
                    updates: Arc::clone(&updates),
                    deleted: Arc::clone(&deleted),
                }))
            })
        };
        let manager = PluginManager::new(
            ManagerOptions {
                root: tmp.path().to_path_buf(),
                ..ManagerOptions::default()
            },
            Arc::new(DesktopHost::new(tmp.path())),
            Box::new(loader),
        );
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = Scheduler::with_clock(SchedulerConfig::default(), clock.clone());
        Harness {
            _tmp: tmp,
            clock,
            updates,
            deleted,
            host: HostLoop::with_parts(config, Arc::new(scheduler), manager),
        }
    }

    #[test]
    fn update_job_drives_plugins() {
        let h = harness();
        assert_eq!(h.host.mount().mounted, vec!["counter"]);
        h.host.register_update_job().unwrap();

        // 60 fps for one second with the default 100 ms cadence.
        for _ in 0..60 {
            h.clock.advance(Duration::from_millis(17));
            h.host.tick();
        }
        assert_eq!(h.updates.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn update_job_is_registered_once() {
        let h = harness();
        h.host.register_update_job().unwrap();
        assert!(h.host.register_update_job().is_err());
        assert!(h.host.scheduler().has_job(UPDATE_JOB));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn metrics_textfile_is_rewritten_each_interval() {
        let h = harness();
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("tessera.prom");
        let renders = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&renders);
        h.host
            .register_metrics_export(path.clone(), move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("tessera_renders_total {n}\n")
            })
            .unwrap();
        assert!(h.host.scheduler().has_job(METRICS_JOB));

        h.clock.advance(Duration::from_millis(14_000));
        h.host.tick();
        assert!(!path.exists());

        h.clock.advance(Duration::from_millis(1_000));
        h.host.tick();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tessera_renders_total 1\n");

        h.clock.advance(Duration::from_millis(15_000));
        h.host.tick();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "tessera_renders_total 2\n");
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn unwritable_textfile_does_not_fail_the_scan() {
        let h = harness();
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("nope/tessera.prom");
        assert!(write_textfile(&path, "x 1\n").is_err());

        h.host
            .register_metrics_export(path, || "x 1\n".to_string())
            .unwrap();
        h.clock.advance(Duration::from_millis(15_000));
        let report = h.host.scheduler().update_jobs().unwrap();
        assert_eq!(report.executed, 1);
    }

    #[test]
    fn shutdown_unmounts_and_clears_jobs() {
        let h = harness();
        h.host.mount();
        h.host.register_update_job().unwrap();
        h.host.shutdown(Signal::Interrupt);

        assert!(h.host.manager().is_empty());
        assert!(h.host.scheduler().is_empty());
        assert_eq!(h.deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn changes_reload_and_ignore_unknown() {
        let h = harness();
        h.host.mount();
        h.host.manager().set_opened("counter", true).unwrap();

        h.host
            .apply_changes(["counter".to_string(), "ghost".to_string()]);

        assert_eq!(h.deleted.load(Ordering::SeqCst), 1);
        let manager = h.host.manager();
        assert_eq!(manager.names(), vec!["counter"]);
        assert_eq!(manager.get("counter").unwrap().state(), PluginState::Mounted);
    }

    #[test]
    fn icons_are_owned() {
        let tmp = tempfile::tempdir().unwrap();
        let icon = tmp.path().join("icon.png");
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend_from_slice(&[0, 0, 0, 13]);
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&32u32.to_be_bytes());
        png.extend_from_slice(&24u32.to_be_bytes());
        std::fs::write(&icon, png).unwrap();

        let host = DesktopHost::new(tmp.path());
        let loaded = host.load_icon("alpha", &icon).unwrap();
        assert_eq!((loaded.width, loaded.height), (32, 24));
        assert_eq!(host.live_handles("alpha"), 1);

        assert!(matches!(
            host.release_checked("beta", loaded.handle),
            Err(tessera_common::Error::ForeignResource { .. })
        ));
        assert!(host.release_checked("alpha", loaded.handle).unwrap());
        assert!(!host.release_checked("alpha", loaded.handle).unwrap());
    }

    #[test]
    fn missing_icon_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let host = DesktopHost::new(tmp.path());
        assert!(host.load_icon("alpha", &tmp.path().join("nope.png")).is_err());
        assert_eq!(host.live_handles("alpha"), 0);
    }
}
