use std::fmt;

use thiserror::Error;

/// Step of instantiation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStage {
    Construct,
    PreMount,
    Mount,
}

impl MountStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Construct => "construct",
            Self::PreMount => "pre_mount",
            Self::Mount => "mount",
        }
    }
}

impl fmt::Display for MountStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    /// Rejected before touching the filesystem, e.g. an invalid plugin name.
    #[error(transparent)]
    Common(#[from] tessera_common::Error),

    #[cfg(feature = "file-watcher")]
    #[error(transparent)]
    Notify(#[from] notify_debouncer_full::notify::Error),

    #[error("plugin not registered: {name}")]
    NotRegistered { name: String },

    #[error("failed to load plugin {name}: {reason}")]
    PluginLoad { name: String, reason: String },

    #[error("failed to instantiate plugin {name} during {stage}: {reason}")]
    PluginInstantiation {
        name: String,
        stage: MountStage,
        reason: String,
    },

    #[error("update failed for: {}", names.join(", "))]
    UpdateFailed { names: Vec<String> },

    #[error("{hook} failed for: {}", names.join(", "))]
    HookFailed {
        hook: &'static str,
        names: Vec<String>,
    },
}

impl Error {
    #[must_use]
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    #[must_use]
    pub fn plugin_load(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::PluginLoad {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a hook error; the whole `anyhow` chain ends up in `reason`.
    #[must_use]
    pub fn instantiation(name: impl Into<String>, stage: MountStage, source: &anyhow::Error) -> Self {
        Self::PluginInstantiation {
            name: name.into(),
            stage,
            reason: format!("{source:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
