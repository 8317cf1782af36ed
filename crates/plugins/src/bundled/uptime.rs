//! `uptime`: counts update ticks and logs a heartbeat.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    tessera_common::{
        plugin::{Host, Plugin, Signal, SignalContext, SignalHandler},
        resources::OwnedResources,
    },
    tracing::{debug, info},
};

pub const NAME: &str = "uptime";

/// Updates between two heartbeat log lines.
const HEARTBEAT_EVERY: u64 = 600;

pub struct UptimePlugin {
    resources: OwnedResources,
    mounted_at: Option<Instant>,
    updates: u64,
    saved_updates: Option<u64>,
}

impl UptimePlugin {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            resources: OwnedResources::new(host, NAME),
            mounted_at: None,
            updates: 0,
            saved_updates: None,
        }
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn uptime(&self) -> Duration {
        self.mounted_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

impl Plugin for UptimePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn pre_mount(&mut self) -> anyhow::Result<()> {
        // Optional: only present when the user drops an icon into plugins/uptime/.
        if self.resources.plugin_icon_path().is_file() {
            self.resources.load_plugin_icon()?;
        }
        Ok(())
    }

    fn mount(&mut self) -> anyhow::Result<()> {
        self.mounted_at = Some(Instant::now());
        Ok(())
    }

    fn update(&mut self) -> anyhow::Result<()> {
        self.updates += 1;
        if self.updates.is_multiple_of(HEARTBEAT_EVERY) {
            info!(updates = self.updates, uptime_s = self.uptime().as_secs(), "heartbeat");
        }
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        self.saved_updates = Some(self.updates);
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<()> {
        if let Some(saved) = self.saved_updates {
            self.updates = saved;
        }
        Ok(())
    }

    fn delete(&mut self) {
        self.resources.release_all();
        debug!(updates = self.updates, "uptime plugin deleted");
    }

    fn on_visibility_changed(&mut self, opened: bool) {
        debug!(opened, "uptime window visibility changed");
    }

    fn signal_handler(&mut self) -> Option<&mut dyn SignalHandler> {
        Some(self)
    }
}

impl SignalHandler for UptimePlugin {
    fn handle_signal(&mut self, signal: Signal, _ctx: &SignalContext) -> anyhow::Result<()> {
        info!(
            %signal,
            updates = self.updates,
            uptime_s = self.uptime().as_secs(),
            "stopping"
        );
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use {
        super::*,
        tessera_common::{plugin::Icon, resources::ResourceHandle},
    };

    struct NoAssets;

    impl Host for NoAssets {
        fn plugin_dir(&self, plugin: &str) -> PathBuf {
            PathBuf::from("/nonexistent").join(plugin)
        }

        fn load_icon(&self, _owner: &str, path: &Path) -> anyhow::Result<Icon> {
            anyhow::bail!("unexpected icon load: {}", path.display())
        }

        fn release(&self, _owner: &str, _handle: ResourceHandle) {}
    }

    #[test]
    fn counts_updates_and_restores_saved_state() {
        let mut plugin = UptimePlugin::new(Arc::new(NoAssets));
        plugin.pre_mount().unwrap();
        plugin.mount().unwrap();
        plugin.update().unwrap();
        plugin.update().unwrap();
        plugin.save().unwrap();
        plugin.update().unwrap();
        assert_eq!(plugin.updates(), 3);

        plugin.load().unwrap();
        assert_eq!(plugin.updates(), 2);
    }

    #[test]
    fn handles_signals() {
        let mut plugin = UptimePlugin::new(Arc::new(NoAssets));
        let handler = plugin.signal_handler().unwrap();
        handler
            .handle_signal(Signal::Terminate, &SignalContext::now(1))
            .unwrap();
    }
}
