//! Plugin capability contract.
//!
//! A plugin is any type implementing [`Plugin`]. It is produced by a
//! [`PluginFactory`] that receives a handle to the [`Host`]; built-in plugins
//! register their factory directly, dynamic-library plugins export it through
//! [`declare_plugin!`](crate::declare_plugin).
//!
//! Lifecycle, driven by the plugin manager:
//!
//! ```text
//! factory(host) -> pre_mount() -> mount() -> { update() / render() / save() / load() }* -> delete()
//! ```
//!
//! `delete()` is terminal: the instance is dropped right after it returns.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, resources::ResourceHandle};

/// Bumped whenever the layout of the contract changes in a way that breaks
/// already-built plugin libraries.
pub const PLUGIN_API_VERSION: u32 = 2;

/// Exported symbol holding the plugin's factory function.
pub const ENTRY_SYMBOL: &str = "tessera_plugin_entry";

/// Exported symbol holding the [`PLUGIN_API_VERSION`] the plugin was built with.
pub const API_VERSION_SYMBOL: &str = "tessera_plugin_api_version";

/// Icon location, relative to the plugin directory, when the plugin's
/// manifest does not name one.
pub const DEFAULT_ICON: &str = "assets/icon.png";

/// Function every plugin unit exposes to create its instance.
pub type PluginFactory = fn(Arc<dyn Host>) -> anyhow::Result<Box<dyn Plugin>>;

/// An icon registered with the host's asset loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icon {
    pub handle: ResourceHandle,
    pub width: u32,
    pub height: u32,
}

/// Services the host offers to plugins. Handed to the factory at construction.
pub trait Host: Send + Sync {
    /// Directory the named plugin was discovered in.
    fn plugin_dir(&self, plugin: &str) -> PathBuf;

    /// Icon the named plugin should show. The plugin manager answers this
    /// from the plugin's manifest; hosts only supply the fallback.
    fn plugin_icon(&self, plugin: &str) -> PathBuf {
        self.plugin_dir(plugin).join(DEFAULT_ICON)
    }

    /// Load an image through the host's asset loader and register it as an icon
    /// owned by `owner`.
    fn load_icon(&self, owner: &str, path: &Path) -> anyhow::Result<Icon>;

    /// Release a resource previously handed out by [`Host::load_icon`].
    fn release(&self, owner: &str, handle: ResourceHandle);
}

/// Process signals the host forwards to plugins before shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Interrupt,
    Terminate,
    Hangup,
}

impl Signal {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::Hangup => "hangup",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra information delivered alongside a [`Signal`].
#[derive(Debug, Clone)]
pub struct SignalContext {
    pub received_at: SystemTime,
    /// Number of plugins the signal is being forwarded to.
    pub recipients: usize,
}

impl SignalContext {
    #[must_use]
    pub fn now(recipients: usize) -> Self {
        Self {
            received_at: SystemTime::now(),
            recipients,
        }
    }
}

/// Optional hook for plugins that want to react to process signals.
pub trait SignalHandler {
    fn handle_signal(&mut self, signal: Signal, ctx: &SignalContext) -> anyhow::Result<()>;
}

/// The capability contract.
///
/// Only `name`, `version`, `mount`, `update` and `delete` are mandatory; the
/// remaining hooks default to doing nothing.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Acquire host resources (icons, handles) before the plugin is mounted.
    fn pre_mount(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn mount(&mut self) -> anyhow::Result<()>;

    fn update(&mut self) -> anyhow::Result<()>;

    fn render(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn load(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release everything acquired in `pre_mount` / `mount`.
    fn delete(&mut self);

    /// Called when the host opens or closes the plugin's window.
    fn on_visibility_changed(&mut self, _opened: bool) {}

    /// Plugins that handle signals return themselves here.
    fn signal_handler(&mut self) -> Option<&mut dyn SignalHandler> {
        None
    }
}

impl fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

/// Check that a directory name can be used as a plugin name.
///
/// Names become registry keys, log fields and shadow-copy file names, so they
/// must be non-empty, free of path separators and not start with a dot.
pub fn validate_plugin_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_plugin_name(name, "empty"));
    }
    if name.starts_with('.') {
        return Err(Error::invalid_plugin_name(name, "hidden directory"));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::invalid_plugin_name(name, "contains a path separator"));
    }
    if name.chars().any(char::is_control) {
        return Err(Error::invalid_plugin_name(name, "contains control characters"));
    }
    Ok(())
}

/// Export a plugin from a `cdylib` crate.
///
/// `$constructor` is a function `fn(Arc<dyn Host>) -> anyhow::Result<T>` where
/// `T: Plugin + 'static`. The macro emits the entry and API-version symbols the
/// dynamic loader looks up.
///
/// Host and plugin must be built by the same compiler against the same version
/// of this crate: the contract crosses the library boundary as Rust trait
/// objects.
///
/// ```ignore
/// tessera_common::declare_plugin!(HelloPlugin::new);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:path) => {
        #[allow(unsafe_code, non_upper_case_globals)]
        #[unsafe(no_mangle)]
        pub static tessera_plugin_api_version: u32 = $crate::plugin::PLUGIN_API_VERSION;

        #[allow(unsafe_code)]
        #[unsafe(no_mangle)]
        pub fn tessera_plugin_entry(
            host: ::std::sync::Arc<dyn $crate::plugin::Host>,
        ) -> $crate::anyhow::Result<::std::boxed::Box<dyn $crate::plugin::Plugin>> {
            let plugin = $constructor(host)?;
            Ok(::std::boxed::Box::new(plugin))
        }

        const _: $crate::plugin::PluginFactory = tessera_plugin_entry;
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    impl Plugin for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        fn mount(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn update(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn delete(&mut self) {}
    }

    #[test]
    fn optional_hooks_default_to_noop() {
        let mut plugin = Quiet;
        plugin.pre_mount().unwrap();
        plugin.render().unwrap();
        plugin.save().unwrap();
        plugin.load().unwrap();
        assert!(plugin.signal_handler().is_none());
    }

    #[test]
    fn debug_shows_identity() {
        let plugin: Box<dyn Plugin> = Box::new(Quiet);
        let rendered = format!("{plugin:?}");
        assert!(rendered.contains("quiet"));
        assert!(rendered.contains("0.1.0"));
    }

    #[test]
    fn signal_serializes_lowercase() {
        let json = serde_json::to_string(&Signal::Interrupt).unwrap();
        assert_eq!(json, "\"interrupt\"");
        assert_eq!(Signal::Hangup.to_string(), "hangup");
    }

    #[test]
    fn plugin_names_are_checked() {
        assert!(validate_plugin_name("alpha").is_ok());
        assert!(validate_plugin_name("hello-world_2").is_ok());
        assert!(validate_plugin_name("").is_err());
        assert!(validate_plugin_name(".git").is_err());
        assert!(validate_plugin_name("a/b").is_err());
        assert!(validate_plugin_name("a\\b").is_err());
    }
}
