//! Shared types used across all tessera crates.
//!
//! The [`plugin`] module is the capability contract every mountable plugin
//! implements. Plugin crates built as dynamic libraries depend on this crate
//! alone and export themselves with [`declare_plugin!`].

pub mod error;
pub mod plugin;
pub mod resources;

pub use anyhow;
pub use error::{Error, FromMessage, Result, TesseraError};
