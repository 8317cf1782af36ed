//! A minimal dynamically loaded plugin.
//!
//! Loads its icon in `pre_mount`, counts updates, and keeps the count in
//! `state.txt` inside its own directory across `save`/`load`.

use std::{path::PathBuf, sync::Arc};

use tessera_common::{
    plugin::{Host, Plugin, Signal, SignalContext, SignalHandler},
    resources::OwnedResources,
};

pub const NAME: &str = "hello-plugin";

pub struct HelloPlugin {
    resources: OwnedResources,
    updates: u64,
    opened: bool,
    last_signal: Option<Signal>,
}

impl HelloPlugin {
    pub fn new(host: Arc<dyn Host>) -> anyhow::Result<Self> {
        Ok(Self {
            resources: OwnedResources::new(host, NAME),
            updates: 0,
            opened: false,
            last_signal: None,
        })
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn last_signal(&self) -> Option<Signal> {
        self.last_signal
    }

    fn state_file(&self) -> PathBuf {
        self.resources.host().plugin_dir(NAME).join("state.txt")
    }
}

impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn pre_mount(&mut self) -> anyhow::Result<()> {
        self.resources.load_plugin_icon()?;
        Ok(())
    }

    fn mount(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&mut self) -> anyhow::Result<()> {
        self.updates += 1;
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        std::fs::write(self.state_file(), self.updates.to_string())?;
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<()> {
        match std::fs::read_to_string(self.state_file()) {
            Ok(raw) => self.updates = raw.trim().parse()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn delete(&mut self) {
        self.resources.release_all();
    }

    fn on_visibility_changed(&mut self, opened: bool) {
        self.opened = opened;
    }

    fn signal_handler(&mut self) -> Option<&mut dyn SignalHandler> {
        Some(self)
    }
}

impl SignalHandler for HelloPlugin {
    fn handle_signal(&mut self, signal: Signal, _ctx: &SignalContext) -> anyhow::Result<()> {
        self.last_signal = Some(signal);
        Ok(())
    }
}

tessera_common::declare_plugin!(HelloPlugin::new);

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::Mutex,
    };

    use tessera_common::{plugin::Icon, resources::ResourceHandle};

    use super::*;

    #[derive(Default)]
    struct DirHost {
        root: PathBuf,
        live: Mutex<Vec<u64>>,
    }

    impl Host for DirHost {
        fn plugin_dir(&self, plugin: &str) -> PathBuf {
            self.root.join(plugin)
        }

        fn load_icon(&self, _owner: &str, path: &Path) -> anyhow::Result<Icon> {
            anyhow::ensure!(path.is_file(), "missing {}", path.display());
            let mut live = self.live.lock().unwrap();
            live.push(live.len() as u64 + 1);
            Ok(Icon {
                handle: ResourceHandle(live.len() as u64),
                width: 16,
                height: 16,
            })
        }

        fn release(&self, _owner: &str, handle: ResourceHandle) {
            self.live.lock().unwrap().retain(|h| *h != handle.0);
        }
    }

    fn plugin_dir() -> (tempfile::TempDir, Arc<DirHost>) {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(NAME).join("assets");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("icon.png"), b"png").unwrap();
        let host = Arc::new(DirHost {
            root: tmp.path().to_path_buf(),
            ..DirHost::default()
        });
        (tmp, host)
    }

    #[test]
    fn entry_point_builds_the_plugin() {
        let (_tmp, host) = plugin_dir();
        let plugin = tessera_plugin_entry(host).unwrap();
        assert_eq!(plugin.name(), NAME);
        assert_eq!(tessera_plugin_api_version, tessera_common::plugin::PLUGIN_API_VERSION);
    }

    #[test]
    fn icon_is_released_on_delete() {
        let (_tmp, host) = plugin_dir();
        let mut plugin = HelloPlugin::new(host.clone()).unwrap();
        plugin.pre_mount().unwrap();
        assert_eq!(host.live.lock().unwrap().len(), 1);
        plugin.delete();
        assert!(host.live.lock().unwrap().is_empty());
    }

    #[test]
    fn update_count_survives_save_and_load() {
        let (_tmp, host) = plugin_dir();
        let mut first = HelloPlugin::new(host.clone()).unwrap();
        first.update().unwrap();
        first.update().unwrap();
        first.save().unwrap();

        let mut second = HelloPlugin::new(host).unwrap();
        second.load().unwrap();
        assert_eq!(second.updates(), 2);
    }

    #[test]
    fn remembers_signals() {
        let (_tmp, host) = plugin_dir();
        let mut plugin = HelloPlugin::new(host).unwrap();
        plugin
            .signal_handler()
            .unwrap()
            .handle_signal(Signal::Terminate, &SignalContext::now(1))
            .unwrap();
        assert_eq!(plugin.last_signal(), Some(Signal::Terminate));
    }
}
