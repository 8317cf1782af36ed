//! CLI commands for plugin inspection.

use std::sync::Arc;

use {
    clap::Subcommand,
    tessera_config::TesseraConfig,
    tessera_plugins::{PluginManifest, PluginSource, SourceKind},
};

use crate::host::{DesktopHost, build_manager};

#[derive(Subcommand)]
pub enum PluginAction {
    /// List every plugin the host would mount.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Mount one plugin in isolation, then unmount it.
    Check {
        /// Plugin name (its directory name).
        name: String,
    },
}

pub fn handle_plugins(action: &PluginAction, config: TesseraConfig) -> anyhow::Result<()> {
    let host = Arc::new(DesktopHost::new(config.plugins.root.clone()));
    let mut manager = build_manager(&config, host);

    match action {
        PluginAction::List { json } => {
            let sources = manager.sources();
            if *json {
                let entries: Vec<serde_json::Value> = sources.iter().map(describe).collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if sources.is_empty() {
                println!("No plugins found under {}.", config.plugins.root.display());
            } else {
                for source in &sources {
                    let entry = describe(source);
                    let detail = entry["description"]
                        .as_str()
                        .or_else(|| entry["error"].as_str())
                        .unwrap_or("");
                    let kind = entry["kind"].as_str().unwrap_or("");
                    println!("  {:<20} {kind:<9} {detail}", source.name);
                }
            }
        },
        PluginAction::Check { name } => {
            manager.mount(name)?;
            if let Some(loaded) = manager.get(name) {
                println!("Name:     {}", loaded.name());
                if loaded.reported_name() != loaded.name() {
                    println!("Reports:  {}", loaded.reported_name());
                }
                println!("Version:  {}", loaded.version());
                println!("Dynamic:  {}", loaded.is_dynamic());
                println!("Path:     {}", loaded.dir().display());
                if let Some(description) = loaded.description() {
                    println!("About:    {description}");
                }
            }
            manager.unmount(name);
            println!("\n{name} mounted and unmounted cleanly.");
        },
    }

    Ok(())
}

fn describe(source: &PluginSource) -> serde_json::Value {
    let kind = match source.kind {
        SourceKind::Directory => "directory",
        SourceKind::Builtin => "builtin",
    };
    let mut entry = serde_json::json!({
        "name": source.name,
        "kind": kind,
        "path": source.dir,
    });
    let Some(ref manifest_path) = source.entry else {
        return entry;
    };
    match PluginManifest::load(manifest_path) {
        Ok(manifest) => {
            let library = manifest.library_path(&source.dir, &source.name);
            entry["description"] = serde_json::json!(manifest.description);
            entry["library"] = serde_json::json!(library);
            entry["built"] = serde_json::json!(library.is_file());
        },
        Err(e) => {
            entry["error"] = serde_json::json!(e.to_string());
        },
    }
    entry
}
