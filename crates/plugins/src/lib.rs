//! Plugin discovery, loading and lifecycle.
//!
//! A plugin lives in its own directory under the plugin root and is marked by
//! an entry file (`plugin.toml` by default). The [`PluginManager`] discovers
//! those directories, loads their code through a [`PluginLoader`], and drives
//! each instance through mount, update, hot reload and unmount.

pub mod bundled;
pub mod discovery;
pub mod error;
pub mod instance;
pub mod loader;
pub mod manager;
pub mod manifest;
#[cfg(feature = "file-watcher")]
pub mod watcher;

pub use {
    discovery::{Discovery, DiscoveryOptions, PluginSource, SourceKind},
    error::{Error, MountStage, Result},
    instance::{LoadedPlugin, PluginState},
    loader::{BoxedFactory, BuiltinLoader, ChainLoader, DylibLoader, PluginLoader, PluginUnit},
    manager::{ManagerOptions, MountReport, PluginManager, ReloadOptions},
    manifest::PluginManifest,
};
