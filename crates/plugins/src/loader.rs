//! Turning a [`PluginSource`] into a factory.
//!
//! [`DylibLoader`] opens `cdylib` plugins built with
//! [`declare_plugin!`](tessera_common::declare_plugin). [`BuiltinLoader`] maps
//! names to factories compiled into the host. [`ChainLoader`] asks built-ins
//! first and falls back to dynamic libraries.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    libloading::{Library, Symbol},
    tessera_common::plugin::{API_VERSION_SYMBOL, Host, PLUGIN_API_VERSION, Plugin, PluginFactory},
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    discovery::{PluginSource, SourceKind},
    manifest::PluginManifest,
};

/// Factory callable; closures are allowed so built-ins can capture state.
pub type BoxedFactory = Arc<dyn Fn(Arc<dyn Host>) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// A loaded plugin unit, ready to construct instances.
#[derive(Clone)]
pub struct PluginUnit {
    pub factory: BoxedFactory,
    /// Keeps the code mapped for as long as an instance exists.
    pub library: Option<Arc<Library>>,
    pub manifest: Option<PluginManifest>,
}

impl PluginUnit {
    pub fn from_factory<F>(factory: F) -> Self
    where
        F: Fn(Arc<dyn Host>) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            library: None,
            manifest: None,
        }
    }
}

impl std::fmt::Debug for PluginUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginUnit")
            .field("dynamic", &self.library.is_some())
            .field("manifest", &self.manifest)
            .finish_non_exhaustive()
    }
}

/// Loads plugin code.
pub trait PluginLoader: Send {
    /// Load the unit for `source`. Implementations may return a cached unit.
    fn load(&mut self, source: &PluginSource) -> Result<PluginUnit>;

    /// Forget any cached unit for `name` so the next `load` reads fresh code.
    fn evict(&mut self, name: &str);

    /// Names this loader can provide without a directory on disk.
    fn provided(&self) -> Vec<String> {
        Vec::new()
    }
}

// ── Built-in ────────────────────────────────────────────────────────────────

/// Factories compiled into the host.
#[derive(Default, Clone)]
pub struct BuiltinLoader {
    factories: BTreeMap<String, BoxedFactory>,
}

impl BuiltinLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Arc<dyn Host>) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Arc<dyn Host>) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl PluginLoader for BuiltinLoader {
    fn load(&mut self, source: &PluginSource) -> Result<PluginUnit> {
        let factory = self
            .factories
            .get(&source.name)
            .ok_or_else(|| Error::plugin_load(&source.name, "no built-in factory registered"))?;
        Ok(PluginUnit {
            factory: Arc::clone(factory),
            library: None,
            manifest: None,
        })
    }

    fn evict(&mut self, _name: &str) {}

    fn provided(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

// ── Dynamic library ─────────────────────────────────────────────────────────

struct CachedLibrary {
    unit: PluginUnit,
    shadow_path: PathBuf,
}

/// Loads `cdylib` plugins.
///
/// The library named by the manifest is copied to a uniquely named shadow file
/// before it is opened. The original can then be rebuilt in place, and a hot
/// reload maps the new code instead of getting the already-loaded image back
/// from the platform loader.
pub struct DylibLoader {
    shadow_dir: PathBuf,
    cache: HashMap<String, CachedLibrary>,
}

impl DylibLoader {
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn shadow_dir(&self) -> &Path {
        &self.shadow_dir
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    /// Remove shadow copies not backing a cached library. Returns how many
    /// files were deleted.
    pub fn cleanup_shadows(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.shadow_dir) else {
            return 0;
        };
        let active: Vec<&Path> = self.cache.values().map(|c| c.shadow_path.as_path()).collect();
        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || active.contains(&path.as_path()) {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => debug!(path = %path.display(), error = %e, "shadow copy still in use"),
            }
        }
        if deleted > 0 {
            info!(deleted, dir = %self.shadow_dir.display(), "removed stale plugin shadow copies");
        }
        deleted
    }

    fn shadow_copy(&self, name: &str, library: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.shadow_dir)?;
        let file = format!(
            "{name}-{}{}",
            uuid::Uuid::new_v4().simple(),
            std::env::consts::DLL_SUFFIX
        );
        let shadow = self.shadow_dir.join(file);
        std::fs::copy(library, &shadow).map_err(|e| {
            Error::plugin_load(name, format!("failed to copy {}: {e}", library.display()))
        })?;
        Ok(shadow)
    }

    fn open(&self, source: &PluginSource) -> Result<CachedLibrary> {
        let name = source.name.as_str();
        let entry = source
            .entry
            .as_deref()
            .ok_or_else(|| Error::plugin_load(name, "no entry file"))?;
        let manifest = PluginManifest::load(entry)
            .map_err(|e| Error::plugin_load(name, format!("invalid {}: {e}", entry.display())))?;
        manifest.check_paths(name)?;

        let library_path = manifest.library_path(&source.dir, name);
        if !library_path.is_file() {
            return Err(Error::plugin_load(
                name,
                format!("library not found: {}", library_path.display()),
            ));
        }

        let shadow_path = self.shadow_copy(name, &library_path)?;
        match open_library(name, &shadow_path, manifest.entry_symbol()) {
            Ok((library, factory)) => {
                debug!(
                    name,
                    library = %library_path.display(),
                    shadow = %shadow_path.display(),
                    "plugin library opened"
                );
                let library = Arc::new(library);
                let keepalive = Arc::clone(&library);
                let unit = PluginUnit {
                    factory: Arc::new(move |host| {
                        let _mapped = &keepalive;
                        factory(host)
                    }),
                    library: Some(library),
                    manifest: Some(manifest),
                };
                Ok(CachedLibrary { unit, shadow_path })
            },
            Err(e) => {
                remove_shadow(&shadow_path);
                Err(e)
            },
        }
    }
}

impl PluginLoader for DylibLoader {
    fn load(&mut self, source: &PluginSource) -> Result<PluginUnit> {
        if source.kind == SourceKind::Builtin {
            return Err(Error::plugin_load(&source.name, "built-in plugin has no library"));
        }
        if let Some(cached) = self.cache.get(&source.name) {
            return Ok(cached.unit.clone());
        }
        let opened = self.open(source)?;
        let unit = opened.unit.clone();
        self.cache.insert(source.name.clone(), opened);
        Ok(unit)
    }

    fn evict(&mut self, name: &str) {
        if let Some(cached) = self.cache.remove(name) {
            debug!(name, "evicting cached plugin library");
            let shadow = cached.shadow_path;
            // Mapped until the last instance goes away; the file itself can
            // only be removed once that happens on some platforms.
            drop(cached.unit);
            remove_shadow(&shadow);
        }
    }
}

fn remove_shadow(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        debug!(path = %path.display(), error = %e, "shadow copy not removed");
    }
}

/// Open `path` and resolve its factory.
#[allow(unsafe_code)]
fn open_library(name: &str, path: &Path, entry_symbol: &str) -> Result<(Library, PluginFactory)> {
    // SAFETY: loading a plugin runs its initialisers. Plugins are trusted code
    // placed in the plugin root by the user.
    let library = unsafe { Library::new(path) }
        .map_err(|e| Error::plugin_load(name, format!("failed to open {}: {e}", path.display())))?;

    // SAFETY: `declare_plugin!` exports this symbol as a `u32` static.
    let version = unsafe {
        let symbol: Symbol<'_, *const u32> = library
            .get(API_VERSION_SYMBOL.as_bytes())
            .map_err(|e| Error::plugin_load(name, format!("missing {API_VERSION_SYMBOL}: {e}")))?;
        **symbol
    };
    if version != PLUGIN_API_VERSION {
        return Err(Error::plugin_load(
            name,
            format!("api version mismatch: plugin={version}, host={PLUGIN_API_VERSION}"),
        ));
    }

    // SAFETY: the version check above ties the symbol to the `PluginFactory`
    // signature of this build of the contract. The returned fn pointer is only
    // called while `library` is kept alive by the unit.
    let factory = unsafe {
        let symbol: Symbol<'_, PluginFactory> = library
            .get(entry_symbol.as_bytes())
            .map_err(|e| Error::plugin_load(name, format!("missing entry symbol {entry_symbol}: {e}")))?;
        *symbol
    };

    Ok((library, factory))
}

// ── Chain ───────────────────────────────────────────────────────────────────

/// Built-ins first, then dynamic libraries.
pub struct ChainLoader {
    builtin: BuiltinLoader,
    dylib: DylibLoader,
}

impl ChainLoader {
    pub fn new(builtin: BuiltinLoader, dylib: DylibLoader) -> Self {
        Self { builtin, dylib }
    }

    pub fn dylib(&self) -> &DylibLoader {
        &self.dylib
    }
}

impl PluginLoader for ChainLoader {
    fn load(&mut self, source: &PluginSource) -> Result<PluginUnit> {
        if self.builtin.contains(&source.name) {
            if source.kind == SourceKind::Directory {
                warn!(name = %source.name, "directory shadowed by built-in plugin of the same name");
            }
            return self.builtin.load(source);
        }
        self.dylib.load(source)
    }

    fn evict(&mut self, name: &str) {
        self.builtin.evict(name);
        self.dylib.evict(name);
    }

    fn provided(&self) -> Vec<String> {
        self.builtin.provided()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    struct Stub;

    impl Plugin for Stub {
        fn name(&self) -> &str {
            "stub"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn mount(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn update(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn delete(&mut self) {}
    }

    fn dir_source(root: &Path, name: &str, manifest: &str) -> PluginSource {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        let entry = dir.join("plugin.toml");
        fs::write(&entry, manifest).unwrap();
        PluginSource {
            name: name.into(),
            dir,
            entry: Some(entry),
            kind: SourceKind::Directory,
        }
    }

    #[test]
    fn builtin_loader_serves_registered_names() {
        let mut loader = BuiltinLoader::new().with("stub", |_| Ok(Box::new(Stub)));
        assert_eq!(loader.provided(), vec!["stub"]);

        let unit = loader.load(&PluginSource::builtin("stub", Path::new("/p"))).unwrap();
        assert!(unit.library.is_none());

        let err = loader
            .load(&PluginSource::builtin("other", Path::new("/p")))
            .unwrap_err();
        assert!(matches!(err, Error::PluginLoad { ref name, .. } if name == "other"));
    }

    #[test]
    fn dylib_loader_reports_missing_library() {
        let tmp = tempfile::tempdir().unwrap();
        let source = dir_source(tmp.path(), "ghost", "");
        let mut loader = DylibLoader::new(tmp.path().join("shadow"));

        let err = loader.load(&source).unwrap_err();
        assert!(err.to_string().contains("library not found"), "{err}");
        assert!(!loader.is_cached("ghost"));
    }

    #[test]
    fn dylib_loader_reports_bad_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let source = dir_source(tmp.path(), "broken", "library = [");
        let mut loader = DylibLoader::new(tmp.path().join("shadow"));
        assert!(matches!(loader.load(&source), Err(Error::PluginLoad { .. })));
    }

    #[test]
    fn dylib_loader_rejects_non_library_and_cleans_shadow() {
        let tmp = tempfile::tempdir().unwrap();
        let source = dir_source(tmp.path(), "fake", "library = \"fake.bin\"\n");
        fs::write(source.dir.join("fake.bin"), b"not a shared object").unwrap();
        let shadow_dir = tmp.path().join("shadow");
        let mut loader = DylibLoader::new(&shadow_dir);

        let err = loader.load(&source).unwrap_err();
        assert!(err.to_string().contains("failed to open"), "{err}");
        assert_eq!(fs::read_dir(&shadow_dir).unwrap().count(), 0);
    }

    #[test]
    fn cleanup_removes_stale_shadows() {
        let tmp = tempfile::tempdir().unwrap();
        let shadow_dir = tmp.path().join("shadow");
        fs::create_dir_all(&shadow_dir).unwrap();
        fs::write(shadow_dir.join("old-1234.so"), b"").unwrap();
        fs::write(shadow_dir.join("old-5678.so"), b"").unwrap();

        let loader = DylibLoader::new(&shadow_dir);
        assert_eq!(loader.cleanup_shadows(), 2);
        assert_eq!(loader.cleanup_shadows(), 0);
    }

    #[test]
    fn chain_prefers_builtin() {
        let tmp = tempfile::tempdir().unwrap();
        let source = dir_source(tmp.path(), "stub", "");
        let mut chain = ChainLoader::new(
            BuiltinLoader::new().with("stub", |_| Ok(Box::new(Stub))),
            DylibLoader::new(tmp.path().join("shadow")),
        );

        assert!(chain.load(&source).is_ok());
        assert_eq!(chain.provided(), vec!["stub"]);

        let other = dir_source(tmp.path(), "other", "");
        assert!(chain.load(&other).is_err());
    }
}
