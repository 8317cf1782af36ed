//! The plugin registry and the operations that drive it.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use {
    tessera_common::{
        plugin::{Host, Icon, Plugin, Signal, SignalContext, validate_plugin_name},
        resources::ResourceHandle,
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use tessera_metrics::{counter, gauge, histogram, labels, plugins as plugin_metrics};

use crate::{
    Error, MountStage, Result,
    discovery::{Discovery, DiscoveryIter, DiscoveryOptions, PluginSource},
    instance::LoadedPlugin,
    loader::PluginLoader,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadOptions {
    /// Reopen a plugin after hot reload if it was open before.
    pub preserve_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerOptions {
    pub root: PathBuf,
    pub discovery: DiscoveryOptions,
    pub reload: ReloadOptions,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("plugins"),
            discovery: DiscoveryOptions::default(),
            reload: ReloadOptions::default(),
        }
    }
}

/// Per-name outcome of a batch mount or reload.
#[derive(Debug, Default)]
pub struct MountReport {
    pub mounted: Vec<String>,
    /// Already registered; left untouched.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl MountReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_names(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|(name, _)| name.as_str())
    }
}

/// Owns every mounted plugin, keyed by directory name.
///
/// Iteration order (and therefore update order) is alphabetical by name. All
/// methods take `&mut self`; callers that share the manager across threads
/// wrap it in a mutex and keep reloads on one thread.
pub struct PluginManager {
    discovery: Discovery,
    reload: ReloadOptions,
    host: Arc<dyn Host>,
    loader: Box<dyn PluginLoader>,
    registry: BTreeMap<String, LoadedPlugin>,
}

impl PluginManager {
    pub fn new(options: ManagerOptions, host: Arc<dyn Host>, loader: Box<dyn PluginLoader>) -> Self {
        Self {
            discovery: Discovery::new(options.root, options.discovery),
            reload: options.reload,
            host,
            loader,
            registry: BTreeMap::new(),
        }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Lazily list plugin directories under the root.
    pub fn discover(&self) -> DiscoveryIter<'_> {
        self.discovery.iter()
    }

    /// Every mountable plugin: directories plus loader-provided built-ins,
    /// sorted by name. A built-in wins over a directory of the same name.
    pub fn sources(&self) -> Vec<PluginSource> {
        let mut by_name: BTreeMap<String, PluginSource> = self
            .discover()
            .map(|source| (source.name.clone(), source))
            .collect();
        for name in self.loader.provided() {
            by_name.insert(
                name.clone(),
                PluginSource::builtin(name, self.discovery.root()),
            );
        }
        by_name.into_values().collect()
    }

    pub fn find_source(&self, name: &str) -> Option<PluginSource> {
        if self.loader.provided().iter().any(|n| n == name) {
            return Some(PluginSource::builtin(name, self.discovery.root()));
        }
        self.discovery.find(name)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<&LoadedPlugin> {
        self.registry.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &LoadedPlugin> {
        self.registry.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn reload_options(&self) -> ReloadOptions {
        self.reload
    }

    // ── Mounting ────────────────────────────────────────────────────────────

    /// Mount every discoverable plugin that is not registered yet.
    ///
    /// Failures are collected per name and never stop the batch.
    pub fn mount_all(&mut self) -> MountReport {
        let _span = tracing::info_span!("mount_all", root = %self.discovery.root().display())
            .entered();
        let started = Instant::now();
        let mut report = MountReport::default();

        for source in self.sources() {
            if self.registry.contains_key(&source.name) {
                report.skipped.push(source.name);
                continue;
            }
            let name = source.name.clone();
            match self.mount_source(&source) {
                Ok(()) => report.mounted.push(name),
                Err(e) => {
                    warn!(name = %name, error = %e, "plugin failed to mount");
                    report.failed.push((name, e));
                },
            }
        }

        info!(
            mounted = report.mounted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "plugins mounted"
        );
        debug!(elapsed_ms = started.elapsed().as_millis(), "mount_all finished");
        report
    }

    /// Mount one plugin by name. Mounting a registered plugin does nothing.
    pub fn mount(&mut self, name: &str) -> Result<()> {
        if self.registry.contains_key(name) {
            debug!(name, "plugin already mounted");
            return Ok(());
        }
        validate_plugin_name(name)?;
        let source = self
            .find_source(name)
            .ok_or_else(|| Error::not_registered(name))?;
        self.mount_source(&source)
    }

    fn mount_source(&mut self, source: &PluginSource) -> Result<()> {
        let loaded = match self.instantiate(source) {
            Ok(loaded) => loaded,
            Err(e) => {
                #[cfg(feature = "metrics")]
                {
                    let stage = match &e {
                        Error::PluginInstantiation { stage, .. } => stage.as_str(),
                        _ => "load",
                    };
                    counter!(plugin_metrics::MOUNT_FAILURES_TOTAL, labels::STAGE => stage)
                        .increment(1);
                }
                return Err(e);
            },
        };
        info!(
            name = %source.name,
            version = %loaded.version(),
            dynamic = loaded.is_dynamic(),
            "plugin mounted"
        );
        self.registry.insert(source.name.clone(), loaded);
        #[cfg(feature = "metrics")]
        {
            counter!(plugin_metrics::MOUNTS_TOTAL).increment(1);
            gauge!(plugin_metrics::MOUNTED).set(self.registry.len() as f64);
        }
        Ok(())
    }

    /// Load, construct, `pre_mount`, `mount`. A half-built instance gets
    /// `delete()` before the error is returned.
    fn instantiate(&mut self, source: &PluginSource) -> Result<LoadedPlugin> {
        let name = source.name.as_str();
        let unit = self.loader.load(source)?;

        let host: Arc<dyn Host> = match unit.manifest {
            Some(ref manifest) => Arc::new(ManifestHost {
                inner: Arc::clone(&self.host),
                name: source.name.clone(),
                icon: source.dir.join(&manifest.icon),
            }),
            None => Arc::clone(&self.host),
        };
        let mut plugin: Box<dyn Plugin> = (unit.factory)(host)
            .map_err(|e| Error::instantiation(name, MountStage::Construct, &e))?;

        if plugin.name() != name {
            warn!(
                name,
                reported = plugin.name(),
                "plugin reports a different name; registering under its directory name"
            );
        }

        if let Err(e) = plugin.pre_mount() {
            plugin.delete();
            return Err(Error::instantiation(name, MountStage::PreMount, &e));
        }
        if let Err(e) = plugin.mount() {
            plugin.delete();
            return Err(Error::instantiation(name, MountStage::Mount, &e));
        }

        Ok(LoadedPlugin::new(
            source.name.clone(),
            source.dir.clone(),
            source.kind,
            plugin,
            unit.manifest,
            unit.library,
        ))
    }

    // ── Teardown ────────────────────────────────────────────────────────────

    /// `delete()` and drop the instance. Unknown names are ignored; returns
    /// whether anything was unmounted.
    pub fn unmount(&mut self, name: &str) -> bool {
        let Some(mut loaded) = self.registry.remove(name) else {
            return false;
        };
        loaded.delete();
        drop(loaded);
        info!(name, "plugin unmounted");
        #[cfg(feature = "metrics")]
        {
            counter!(plugin_metrics::UNMOUNTS_TOTAL).increment(1);
            gauge!(plugin_metrics::MOUNTED).set(self.registry.len() as f64);
        }
        true
    }

    /// Unmount everything, last name first. Returns how many were unmounted.
    pub fn shutdown(&mut self) -> usize {
        let names: Vec<String> = self.registry.keys().rev().cloned().collect();
        let count = names.iter().filter(|name| self.unmount(name)).count();
        info!(count, "all plugins unmounted");
        count
    }

    /// Replace a plugin with a fresh instance built from the code on disk.
    ///
    /// The old instance is deleted and dropped, and its cached code evicted,
    /// before anything new is loaded. If the new instance fails to mount the
    /// plugin stays unmounted.
    pub fn hot_reload(&mut self, name: &str) -> Result<()> {
        let _span = tracing::info_span!("hot_reload", name).entered();
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        counter!(plugin_metrics::RELOADS_TOTAL).increment(1);

        validate_plugin_name(name)?;
        let source = self
            .find_source(name)
            .ok_or_else(|| Error::not_registered(name))?;

        let was_open = self.registry.get(name).is_some_and(LoadedPlugin::is_opened);
        self.unmount(name);
        self.loader.evict(name);

        self.mount_source(&source)?;

        if self.reload.preserve_open
            && was_open
            && let Some(loaded) = self.registry.get_mut(name)
        {
            loaded.set_opened(true);
        }

        debug!(elapsed_ms = started.elapsed().as_millis(), "hot reload finished");
        Ok(())
    }

    /// Hot reload every discoverable plugin, reporting per name.
    pub fn reload_all(&mut self) -> MountReport {
        let mut report = MountReport::default();
        for source in self.sources() {
            match self.hot_reload(&source.name) {
                Ok(()) => report.mounted.push(source.name),
                Err(e) => report.failed.push((source.name, e)),
            }
        }
        report
    }

    // ── Delegation ──────────────────────────────────────────────────────────

    /// Call `update()` on every instance in registry order.
    ///
    /// Every instance is updated even when an earlier one fails; the names of
    /// the failing ones are returned together.
    pub fn update_all(&mut self) -> Result<()> {
        let started = Instant::now();
        let failed = self.run_hook("update", |p| p.update());
        #[cfg(feature = "metrics")]
        {
            histogram!(plugin_metrics::UPDATE_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            if !failed.is_empty() {
                counter!(plugin_metrics::UPDATE_ERRORS_TOTAL).increment(failed.len() as u64);
            }
        }
        tracing::trace!(elapsed_us = started.elapsed().as_micros(), "plugins updated");
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::UpdateFailed { names: failed })
        }
    }

    pub fn render_all(&mut self) -> Result<()> {
        self.hook_result("render", |p| p.render())
    }

    pub fn save_all(&mut self) -> Result<()> {
        self.hook_result("save", |p| p.save())
    }

    pub fn load_all(&mut self) -> Result<()> {
        self.hook_result("load", |p| p.load())
    }

    fn hook_result(
        &mut self,
        hook: &'static str,
        f: impl Fn(&mut dyn Plugin) -> anyhow::Result<()>,
    ) -> Result<()> {
        let names = self.run_hook(hook, f);
        if names.is_empty() {
            Ok(())
        } else {
            Err(Error::HookFailed { hook, names })
        }
    }

    fn run_hook(
        &mut self,
        hook: &'static str,
        f: impl Fn(&mut dyn Plugin) -> anyhow::Result<()>,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for (name, loaded) in &mut self.registry {
            if let Err(e) = f(loaded.plugin_mut()) {
                warn!(name = %name, hook, error = %format!("{e:#}"), "plugin hook failed");
                failed.push(name.clone());
            }
        }
        failed
    }

    // ── Visibility ──────────────────────────────────────────────────────────

    pub fn set_opened(&mut self, name: &str, opened: bool) -> Result<()> {
        let loaded = self
            .registry
            .get_mut(name)
            .ok_or_else(|| Error::not_registered(name))?;
        if loaded.set_opened(opened) {
            debug!(name, opened, "plugin visibility changed");
        }
        Ok(())
    }

    /// Flip visibility; returns the new state.
    pub fn toggle(&mut self, name: &str) -> Result<bool> {
        let opened = !self
            .registry
            .get(name)
            .ok_or_else(|| Error::not_registered(name))?
            .is_opened();
        self.set_opened(name, opened)?;
        Ok(opened)
    }

    // ── Signals ─────────────────────────────────────────────────────────────

    /// Deliver `signal` to every instance that handles signals. Returns how
    /// many received it; handler errors are logged.
    pub fn forward_signal(&mut self, signal: Signal, ctx: &SignalContext) -> usize {
        let mut delivered = 0;
        for (name, loaded) in &mut self.registry {
            let Some(handler) = loaded.plugin_mut().signal_handler() else {
                continue;
            };
            delivered += 1;
            if let Err(e) = handler.handle_signal(signal, ctx) {
                warn!(name = %name, %signal, error = %e, "plugin signal handler failed");
            }
        }
        debug!(%signal, delivered, "signal forwarded to plugins");
        delivered
    }

    /// Names whose changes should trigger a reload: registered plugins plus
    /// anything newly discoverable.
    pub fn reload_candidates(&self, changed: impl IntoIterator<Item = String>) -> BTreeSet<String> {
        changed
            .into_iter()
            .filter(|name| self.registry.contains_key(name) || self.find_source(name).is_some())
            .collect()
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("root", &self.discovery.root())
            .field("registered", &self.registry.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Host view handed to a plugin that shipped a manifest: its own icon comes
/// from `plugin.toml`, everything else goes to the real host.
struct ManifestHost {
    inner: Arc<dyn Host>,
    name: String,
    icon: PathBuf,
}

impl Host for ManifestHost {
    fn plugin_dir(&self, plugin: &str) -> PathBuf {
        self.inner.plugin_dir(plugin)
    }

    fn plugin_icon(&self, plugin: &str) -> PathBuf {
        if plugin == self.name {
            self.icon.clone()
        } else {
            self.inner.plugin_icon(plugin)
        }
    }

    fn load_icon(&self, owner: &str, path: &Path) -> anyhow::Result<Icon> {
        self.inner.load_icon(owner, path)
    }

    fn release(&self, owner: &str, handle: ResourceHandle) {
        self.inner.release(owner, handle);
    }
}
