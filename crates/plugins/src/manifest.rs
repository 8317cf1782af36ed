//! `plugin.toml` parsing.
//!
//! ```toml
//! library = "target/release/libhello_plugin.so"   # optional
//! entry_symbol = "tessera_plugin_entry"           # optional
//! description = "Says hello"
//! icon = "assets/icon.png"
//! ```

use std::{
    env::consts::{DLL_PREFIX, DLL_SUFFIX},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_icon() -> PathBuf {
    PathBuf::from(tessera_common::plugin::DEFAULT_ICON)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PluginManifest {
    /// Dynamic library, relative to the plugin directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
    /// Overrides the exported factory symbol name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Icon handed to the host's asset loader, relative to the plugin directory.
    #[serde(default = "default_icon")]
    pub icon: PathBuf,
}

impl Default for PluginManifest {
    fn default() -> Self {
        Self {
            library: None,
            entry_symbol: None,
            description: None,
            icon: default_icon(),
        }
    }
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Absolute path of the library for the plugin in `dir` named `name`.
    ///
    /// Without an explicit `library`, the platform library name of the
    /// directory name is looked up in `dir` (`hello-plugin` becomes
    /// `libhello_plugin.so` on Linux).
    #[must_use]
    pub fn library_path(&self, dir: &Path, name: &str) -> PathBuf {
        match &self.library {
            Some(lib) => dir.join(lib),
            None => dir.join(default_library_file(name)),
        }
    }

    pub fn entry_symbol(&self) -> &str {
        self.entry_symbol
            .as_deref()
            .unwrap_or(tessera_common::plugin::ENTRY_SYMBOL)
    }

    /// Reject manifests whose paths point outside the plugin directory.
    pub fn check_paths(&self, name: &str) -> Result<()> {
        let escapes = |p: &Path| {
            p.is_absolute()
                || p
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
        };
        if let Some(lib) = &self.library
            && escapes(lib)
        {
            return Err(Error::plugin_load(
                name,
                format!("library path {} leaves the plugin directory", lib.display()),
            ));
        }
        if escapes(&self.icon) {
            return Err(Error::plugin_load(
                name,
                format!("icon path {} leaves the plugin directory", self.icon.display()),
            ));
        }
        Ok(())
    }
}

/// Platform file name of a `cdylib` built from a crate called `name`.
#[must_use]
pub fn default_library_file(name: &str) -> String {
    format!("{DLL_PREFIX}{}{DLL_SUFFIX}", name.replace('-', "_"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_manifest_uses_defaults() {
        let m = PluginManifest::parse("").unwrap();
        assert_eq!(m, PluginManifest::default());
        assert_eq!(m.icon, PathBuf::from("assets/icon.png"));
        assert_eq!(m.entry_symbol(), "tessera_plugin_entry");
    }

    #[test]
    fn default_library_follows_platform_naming() {
        let m = PluginManifest::default();
        let path = m.library_path(Path::new("/p/hello-plugin"), "hello-plugin");
        let file = path.file_name().unwrap().to_str().unwrap();
        assert!(file.contains("hello_plugin"));
        assert!(file.starts_with(DLL_PREFIX));
        assert!(file.ends_with(DLL_SUFFIX));
    }

    #[test]
    fn explicit_library_is_relative_to_dir() {
        let m = PluginManifest::parse("library = \"build/libx.so\"\ndescription = \"x\"\n").unwrap();
        assert_eq!(
            m.library_path(Path::new("/p/x"), "x"),
            PathBuf::from("/p/x/build/libx.so")
        );
        assert_eq!(m.description.as_deref(), Some("x"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PluginManifest::parse("libary = \"x\"\n").is_err());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let m = PluginManifest::parse("library = \"../other/libx.so\"\n").unwrap();
        assert!(matches!(m.check_paths("x"), Err(Error::PluginLoad { .. })));

        let m = PluginManifest::parse("icon = \"/etc/passwd\"\n").unwrap();
        assert!(m.check_paths("x").is_err());

        assert!(PluginManifest::default().check_paths("x").is_ok());
    }
}
