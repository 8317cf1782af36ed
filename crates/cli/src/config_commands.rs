use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use tessera_config::{Severity, TesseraConfig, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file, env substitution and CLI
    /// overrides applied).
    Show {
        /// Print JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration file and report errors/warnings.
    Validate {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the path of the config file in use, or where one would go.
    Path,
}

pub fn handle_config(
    action: &ConfigAction,
    explicit: Option<&Path>,
    load: impl FnOnce() -> Result<TesseraConfig>,
) -> Result<()> {
    match action {
        ConfigAction::Show { json } => show(&load()?, *json),
        ConfigAction::Validate { verbose } => check(explicit, *verbose),
        ConfigAction::Path => {
            let path = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(tessera_config::find_or_default_config_path);
            println!("{}", path.display());
            Ok(())
        },
    }
}

fn show(config: &TesseraConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(explicit: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate(explicit);

    match result.config_path {
        Some(ref path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{label}{RESET} {}", d.message);
        } else {
            eprintln!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message);
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s)");
    }
    Ok(())
}
