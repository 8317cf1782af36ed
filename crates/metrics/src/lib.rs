//! Metrics for tessera.
//!
//! Every crate records through the `metrics` facade using the names in
//! [`clock`] and [`plugins`]. Nothing is collected until a recorder is
//! installed; with the `prometheus` feature [`init_metrics`] installs one whose
//! output can be rendered as text.
//!
//! ```rust,ignore
//! use tessera_metrics::{counter, clock};
//!
//! counter!(clock::EXECUTIONS_TOTAL, "mode" => "inline").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
