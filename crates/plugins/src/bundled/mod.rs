//! Plugins compiled into the host binary.

pub mod uptime;

use crate::loader::BuiltinLoader;

/// A [`BuiltinLoader`] with every bundled plugin registered.
#[must_use]
pub fn builtin_loader() -> BuiltinLoader {
    BuiltinLoader::new().with(uptime::NAME, |host| Ok(Box::new(uptime::UptimePlugin::new(host))))
}
