//! Loads the `hello-plugin` demo as a real shared library.
//!
//! The demo is not a default workspace member; build it first with
//! `cargo build -p hello-plugin`. Tests skip when the library is missing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeMap,
    env::consts::{DLL_PREFIX, DLL_SUFFIX},
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    tessera_common::{
        plugin::{Host, Icon},
        resources::ResourceHandle,
    },
    tessera_plugins::{DylibLoader, ManagerOptions, PluginManager},
};

const NAME: &str = "hello-plugin";

fn built_library() -> Option<PathBuf> {
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target"));
    let file = format!("{DLL_PREFIX}hello_plugin{DLL_SUFFIX}");
    let found = ["debug", "release"]
        .iter()
        .map(|profile| target.join(profile).join(&file))
        .find(|path| path.is_file());
    if found.is_none() {
        eprintln!("skipping: {file} not built (cargo build -p hello-plugin)");
    }
    found
}

#[derive(Default)]
struct AssetHost {
    root: PathBuf,
    next: AtomicU64,
    live: Mutex<BTreeMap<u64, PathBuf>>,
}

impl Host for AssetHost {
    fn plugin_dir(&self, plugin: &str) -> PathBuf {
        self.root.join(plugin)
    }

    fn load_icon(&self, _owner: &str, path: &Path) -> anyhow::Result<Icon> {
        anyhow::ensure!(path.is_file(), "missing {}", path.display());
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(id, path.to_path_buf());
        Ok(Icon {
            handle: ResourceHandle(id),
            width: 16,
            height: 16,
        })
    }

    fn release(&self, _owner: &str, handle: ResourceHandle) {
        self.live.lock().unwrap().remove(&handle.0);
    }
}

struct Installed {
    _tmp: tempfile::TempDir,
    host: Arc<AssetHost>,
    shadow_dir: PathBuf,
    plugin_dir: PathBuf,
    manager: PluginManager,
}

impl Installed {
    fn shadows(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.shadow_dir)
            .map(|entries| entries.flatten().map(|e| e.path()).collect())
            .unwrap_or_default()
    }

    fn live_icons(&self) -> Vec<PathBuf> {
        self.host.live.lock().unwrap().values().cloned().collect()
    }
}

/// Lay out `<root>/hello-plugin/` the way a user would install it, with the
/// icon somewhere other than the default location.
fn install(library: &Path) -> Installed {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("plugins");
    let plugin_dir = root.join(NAME);
    fs::create_dir_all(plugin_dir.join("img")).unwrap();
    fs::write(plugin_dir.join("img/hello.png"), b"png").unwrap();
    fs::write(
        plugin_dir.join("plugin.toml"),
        "description = \"Greets on mount\"\nicon = \"img/hello.png\"\n",
    )
    .unwrap();
    fs::copy(library, plugin_dir.join(library.file_name().unwrap())).unwrap();

    let shadow_dir = tmp.path().join("shadow");
    let host = Arc::new(AssetHost {
        root: root.clone(),
        ..AssetHost::default()
    });
    let manager = PluginManager::new(
        ManagerOptions {
            root,
            ..ManagerOptions::default()
        },
        host.clone(),
        Box::new(DylibLoader::new(&shadow_dir)),
    );
    Installed {
        _tmp: tmp,
        host,
        shadow_dir,
        plugin_dir,
        manager,
    }
}

#[test]
fn mounts_the_built_library() {
    let Some(library) = built_library() else {
        return;
    };
    let mut p = install(&library);

    let report = p.manager.mount_all();
    assert_eq!(report.mounted, vec![NAME]);
    assert!(report.failed.is_empty());

    let loaded = p.manager.get(NAME).unwrap();
    assert!(loaded.is_dynamic());
    assert_eq!(loaded.description(), Some("Greets on mount"));
    assert_eq!(p.live_icons(), vec![p.plugin_dir.join("img/hello.png")]);
    assert_eq!(p.shadows().len(), 1);

    p.manager.update_all().unwrap();
    p.manager.save_all().unwrap();
    assert_eq!(fs::read_to_string(p.plugin_dir.join("state.txt")).unwrap(), "1");
}

#[test]
fn remount_reuses_the_cached_library() {
    let Some(library) = built_library() else {
        return;
    };
    let mut p = install(&library);

    p.manager.mount(NAME).unwrap();
    let first = p.shadows();
    assert!(p.manager.unmount(NAME));
    assert!(p.live_icons().is_empty());

    p.manager.mount(NAME).unwrap();
    assert_eq!(p.shadows(), first);
}

#[test]
fn hot_reload_swaps_the_shadow_copy() {
    let Some(library) = built_library() else {
        return;
    };
    let mut p = install(&library);
    p.manager.mount_all();
    let before = p.shadows();

    for _ in 0..3 {
        p.manager.hot_reload(NAME).unwrap();
        assert_eq!(p.shadows().len(), 1);
        assert_eq!(p.live_icons().len(), 1);
    }
    assert_ne!(p.shadows(), before);

    assert!(p.manager.unmount(NAME));
    assert!(p.live_icons().is_empty());
}
