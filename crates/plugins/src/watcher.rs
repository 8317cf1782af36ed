//! Filesystem watcher for the plugin root.
//!
//! Changes under a plugin directory are debounced and reported as the name of
//! that plugin. The watcher never reloads anything itself: the host drains the
//! receiver on its own thread and calls `hot_reload`.

use std::{
    collections::BTreeSet,
    path::{Component, Path, PathBuf},
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{Result, discovery::DiscoveryOptions};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the plugin root. Must be kept alive for events to keep arriving.
pub struct PluginWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    root: PathBuf,
}

impl PluginWatcher {
    /// Start watching `root`. The receiver yields plugin names, at most once
    /// per name per debounced batch.
    pub fn start(
        root: &Path,
        options: DiscoveryOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<String>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched_root = root.to_path_buf();

        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let mut changed = BTreeSet::new();
                    for event in events {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            if let Some(name) = plugin_name_for(&watched_root, path, &options) {
                                changed.insert(name);
                            }
                        }
                    }
                    for name in changed {
                        debug!(name = %name, "plugin source changed");
                        if tx.send(name).is_err() {
                            break;
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "plugin watcher error");
                    }
                },
            }
        })?;

        debouncer.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching plugin root");

        Ok((
            Self {
                _debouncer: debouncer,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Plugin directory a changed path belongs to: the first component below
/// `root`, unless it is excluded or the change is the root itself.
pub fn plugin_name_for(root: &Path, path: &Path, options: &DiscoveryOptions) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let Some(Component::Normal(first)) = relative.components().next() else {
        return None;
    };
    let name = first.to_str()?;
    if options.is_excluded(name) {
        return None;
    }
    // A plain file at the top level is not a plugin.
    if relative.components().count() == 1 && root.join(name).is_file() {
        return None;
    }
    Some(name.to_string())
}
