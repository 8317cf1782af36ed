use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("job already scheduled: {name}")]
    DuplicateJob { name: String },

    #[error("job {name} failed: {source}")]
    JobFailed {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to start detached job {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn duplicate_job(name: impl Into<String>) -> Self {
        Self::DuplicateJob { name: name.into() }
    }

    #[must_use]
    pub fn job_failed(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::JobFailed {
            name: name.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source,
        }
    }

    /// Name of the job this error is about, if any.
    #[must_use]
    pub fn job_name(&self) -> Option<&str> {
        match self {
            Self::DuplicateJob { name } | Self::JobFailed { name, .. } | Self::Spawn { name, .. } => {
                Some(name)
            },
            Self::Message { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
