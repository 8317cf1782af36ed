//! Tracking of host resources acquired by a plugin.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::plugin::{Host, Icon};

/// Opaque identifier of a resource the host handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resources a plugin acquired from its host.
///
/// Paths are resolved against the plugin's own directory. Everything still held
/// is released when the value is dropped, so a plugin that forgets to clean up
/// in `delete()` does not leak host assets across hot reloads.
pub struct OwnedResources {
    host: Arc<dyn Host>,
    owner: String,
    handles: Vec<ResourceHandle>,
}

impl OwnedResources {
    pub fn new(host: Arc<dyn Host>, owner: impl Into<String>) -> Self {
        Self {
            host,
            owner: owner.into(),
            handles: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Load an icon from a path relative to the plugin directory.
    pub fn load_icon(&mut self, relative: impl AsRef<Path>) -> anyhow::Result<Icon> {
        let path = self.host.plugin_dir(&self.owner).join(relative);
        self.acquire_icon(&path)
    }

    /// Where this plugin's own icon lives, as configured for it.
    pub fn plugin_icon_path(&self) -> PathBuf {
        self.host.plugin_icon(&self.owner)
    }

    /// Load this plugin's own icon (see [`Host::plugin_icon`]).
    pub fn load_plugin_icon(&mut self) -> anyhow::Result<Icon> {
        let path = self.plugin_icon_path();
        self.acquire_icon(&path)
    }

    fn acquire_icon(&mut self, path: &Path) -> anyhow::Result<Icon> {
        let icon = self.host.load_icon(&self.owner, path)?;
        self.handles.push(icon.handle);
        Ok(icon)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release one handle early. Returns `false` if it is not held here.
    pub fn release(&mut self, handle: ResourceHandle) -> bool {
        let Some(pos) = self.handles.iter().position(|h| *h == handle) else {
            return false;
        };
        self.handles.swap_remove(pos);
        self.host.release(&self.owner, handle);
        true
    }

    /// Release everything, newest first.
    pub fn release_all(&mut self) {
        while let Some(handle) = self.handles.pop() {
            self.host.release(&self.owner, handle);
        }
    }
}

impl Drop for OwnedResources {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            tracing::debug!(
                owner = %self.owner,
                count = self.handles.len(),
                "releasing leftover plugin resources"
            );
            self.release_all();
        }
    }
}

impl fmt::Debug for OwnedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedResources")
            .field("owner", &self.owner)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}
