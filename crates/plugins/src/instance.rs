//! A mounted plugin and its lifecycle state.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    libloading::Library,
    serde::Serialize,
    tessera_common::plugin::Plugin,
};

use crate::{discovery::SourceKind, manifest::PluginManifest};

/// Where an instance is in its lifecycle.
///
/// `Unloaded` is only ever observed on an instance that is being torn down;
/// registered instances are `Mounted`, `Opened` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Unloaded,
    Mounted,
    Opened,
    Closed,
}

impl PluginState {
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Opened
    }
}

/// A registered plugin instance.
pub struct LoadedPlugin {
    // Declared before `library`: the instance's code lives in the library, so
    // it has to be dropped first.
    plugin: Box<dyn Plugin>,
    name: String,
    dir: PathBuf,
    kind: SourceKind,
    state: PluginState,
    manifest: Option<PluginManifest>,
    library: Option<Arc<Library>>,
}

impl LoadedPlugin {
    pub(crate) fn new(
        name: String,
        dir: PathBuf,
        kind: SourceKind,
        plugin: Box<dyn Plugin>,
        manifest: Option<PluginManifest>,
        library: Option<Arc<Library>>,
    ) -> Self {
        Self {
            plugin,
            name,
            dir,
            kind,
            state: PluginState::Mounted,
            manifest,
            library,
        }
    }

    /// Registry key (the directory name).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the plugin reports about itself.
    pub fn reported_name(&self) -> &str {
        self.plugin.name()
    }

    pub fn version(&self) -> &str {
        self.plugin.version()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn is_opened(&self) -> bool {
        self.state.is_open()
    }

    pub fn is_dynamic(&self) -> bool {
        self.library.is_some()
    }

    pub fn description(&self) -> Option<&str> {
        self.manifest.as_ref()?.description.as_deref()
    }

    pub fn manifest(&self) -> Option<&PluginManifest> {
        self.manifest.as_ref()
    }

    pub(crate) fn plugin_mut(&mut self) -> &mut dyn Plugin {
        self.plugin.as_mut()
    }

    /// Change visibility. Returns `false` when nothing changed.
    pub(crate) fn set_opened(&mut self, opened: bool) -> bool {
        if self.is_opened() == opened {
            return false;
        }
        self.state = if opened {
            PluginState::Opened
        } else {
            PluginState::Closed
        };
        self.plugin.on_visibility_changed(opened);
        true
    }

    /// Run `delete()`; the instance must be dropped right after.
    pub(crate) fn delete(&mut self) {
        self.plugin.delete();
        self.state = PluginState::Unloaded;
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("state", &self.state)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
