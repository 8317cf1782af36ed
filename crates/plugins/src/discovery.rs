//! Plugin directory discovery.
//!
//! A directory directly under the plugin root is a plugin when it contains the
//! entry file. Everything else is skipped without complaint: plain files,
//! hidden or excluded directories, and directories missing the entry file.

use std::{
    fs::ReadDir,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

/// Where a plugin's code comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A directory under the plugin root.
    Directory,
    /// Compiled into the host binary.
    Builtin,
}

/// A discoverable plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    /// Directory name; the registry key.
    pub name: String,
    pub dir: PathBuf,
    /// Entry file inside `dir`. `None` for built-ins.
    pub entry: Option<PathBuf>,
    pub kind: SourceKind,
}

impl PluginSource {
    #[must_use]
    pub fn builtin(name: impl Into<String>, root: &Path) -> Self {
        let name = name.into();
        Self {
            dir: root.join(&name),
            name,
            entry: None,
            kind: SourceKind::Builtin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub entry_file: String,
    pub exclude: Vec<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            entry_file: "plugin.toml".into(),
            exclude: ["target", ".git", "__pycache__", "node_modules"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl DiscoveryOptions {
    #[must_use]
    pub fn is_excluded(&self, name: &str) -> bool {
        name.starts_with('.') || self.exclude.iter().any(|e| e == name)
    }
}

/// Lazy listing of the plugin directories under a root.
///
/// Iterating reads the directory as it goes; iterating again rescans, so the
/// same value can be reused after plugins are added or removed on disk.
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    options: DiscoveryOptions,
}

impl Discovery {
    pub fn new(root: impl Into<PathBuf>, options: DiscoveryOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    pub fn iter(&self) -> DiscoveryIter<'_> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => Some(entries),
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "plugin root not readable");
                None
            },
        };
        DiscoveryIter {
            discovery: self,
            entries,
        }
    }

    /// Look up a single plugin by name without scanning the whole root.
    pub fn find(&self, name: &str) -> Option<PluginSource> {
        if tessera_common::plugin::validate_plugin_name(name).is_err()
            || self.options.is_excluded(name)
        {
            return None;
        }
        self.source_for(name.to_string(), self.root.join(name))
    }

    /// Discovered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.iter().map(|s| s.name).collect();
        names.sort();
        names
    }

    fn source_for(&self, name: String, dir: PathBuf) -> Option<PluginSource> {
        if !dir.is_dir() {
            return None;
        }
        let entry = dir.join(&self.options.entry_file);
        if !entry.is_file() {
            return None;
        }
        Some(PluginSource {
            name,
            dir,
            entry: Some(entry),
            kind: SourceKind::Directory,
        })
    }
}

impl<'a> IntoIterator for &'a Discovery {
    type IntoIter = DiscoveryIter<'a>;
    type Item = PluginSource;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct DiscoveryIter<'a> {
    discovery: &'a Discovery,
    entries: Option<ReadDir>,
}

impl Iterator for DiscoveryIter<'_> {
    type Item = PluginSource;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "failed to read plugin root entry");
                    continue;
                },
            };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if self.discovery.options.is_excluded(&name)
                || tessera_common::plugin::validate_plugin_name(&name).is_err()
            {
                continue;
            }
            if let Some(source) = self.discovery.source_for(name, entry.path()) {
                return Some(source);
            }
        }
        None
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {rstest::rstest, std::fs};

    use super::*;

    fn plugin_dir(root: &Path, name: &str) {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join("plugin.toml"), "").unwrap();
    }

    #[test]
    fn finds_only_directories_with_entry_file() {
        let tmp = tempfile::tempdir().unwrap();
        plugin_dir(tmp.path(), "alpha");
        plugin_dir(tmp.path(), "beta");
        fs::create_dir_all(tmp.path().join("empty")).unwrap();
        fs::write(tmp.path().join("plugin.toml"), "").unwrap();

        let d = Discovery::new(tmp.path(), DiscoveryOptions::default());
        assert_eq!(d.names(), vec!["alpha", "beta"]);
    }

    #[rstest]
    #[case("target")]
    #[case("__pycache__")]
    #[case(".git")]
    #[case(".hidden")]
    fn excluded_names_are_skipped(#[case] name: &str) {
        let tmp = tempfile::tempdir().unwrap();
        plugin_dir(tmp.path(), name);
        plugin_dir(tmp.path(), "alpha");

        let d = Discovery::new(tmp.path(), DiscoveryOptions::default());
        assert_eq!(d.names(), vec!["alpha"]);
        assert!(d.find(name).is_none());
    }

    #[test]
    fn iteration_is_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        plugin_dir(tmp.path(), "alpha");
        let d = Discovery::new(tmp.path(), DiscoveryOptions::default());
        assert_eq!(d.iter().count(), 1);

        plugin_dir(tmp.path(), "beta");
        assert_eq!(d.iter().count(), 2);
        assert_eq!((&d).into_iter().count(), 2);
    }

    #[test]
    fn custom_entry_file() {
        let tmp = tempfile::tempdir().unwrap();
        plugin_dir(tmp.path(), "alpha");
        fs::create_dir_all(tmp.path().join("gamma")).unwrap();
        fs::write(tmp.path().join("gamma/manifest.toml"), "").unwrap();

        let d = Discovery::new(tmp.path(), DiscoveryOptions {
            entry_file: "manifest.toml".into(),
            ..DiscoveryOptions::default()
        });
        assert_eq!(d.names(), vec!["gamma"]);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let d = Discovery::new("/definitely/not/a/plugin/root", DiscoveryOptions::default());
        assert_eq!(d.iter().count(), 0);
        assert!(d.find("alpha").is_none());
    }

    #[test]
    fn find_rejects_path_like_names() {
        let tmp = tempfile::tempdir().unwrap();
        plugin_dir(tmp.path(), "alpha");
        let d = Discovery::new(tmp.path(), DiscoveryOptions::default());
        assert!(d.find("alpha").is_some());
        assert!(d.find("../alpha").is_none());
        assert!(d.find("").is_none());
    }
}
