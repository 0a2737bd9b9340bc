use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
};

use chathook_config::{
    HostConfig, OptionStore,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print an option value.
    Get { key: String },
    /// Set an option and save the config file.
    Set { key: String, value: String },
    /// Remove an option and save the config file.
    Unset { key: String },
    /// List all options, optionally only those starting with a prefix.
    List { prefix: Option<String> },
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction, config: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(config, verbose),
        ConfigAction::Get { key } => {
            let (host, _) = load(config)?;
            match host.options.get(&key) {
                Some(value) => {
                    println!("{value}");
                    Ok(())
                },
                None => anyhow::bail!("option '{key}' is not set"),
            }
        },
        ConfigAction::Set { key, value } => {
            if key.trim().is_empty() || key.chars().any(char::is_whitespace) {
                anyhow::bail!("option names must be non-empty and contain no whitespace");
            }
            update(config, |store| {
                store.set(key.as_str(), value.as_str());
            })
        },
        ConfigAction::Unset { key } => update(config, |store| {
            if store.unset(&key).is_none() {
                eprintln!("option '{key}' was not set");
            }
        }),
        ConfigAction::List { prefix } => {
            let (host, _) = load(config)?;
            let store = OptionStore::from_map(host.options);
            let prefix = prefix.unwrap_or_default();
            for (key, value) in store.with_prefix(&prefix) {
                println!("{key} = {value}");
            }
            Ok(())
        },
        ConfigAction::Path => {
            let (_, path) = load(config)?;
            println!("{}", path.display());
            Ok(())
        },
    }
}

/// Load the config at `path`, or the discovered one, along with the path
/// saves should go to.
pub fn load(path: Option<&Path>) -> Result<(HostConfig, PathBuf)> {
    match path {
        Some(path) => {
            let config = if path.exists() {
                chathook_config::load_config(path)
                    .with_context(|| format!("failed to load {}", path.display()))?
            } else {
                HostConfig::default()
            };
            Ok((config, path.to_path_buf()))
        },
        None => {
            let (config, found) = chathook_config::discover_and_load();
            let path = found.unwrap_or_else(chathook_config::find_or_default_config_path);
            Ok((config, path))
        },
    }
}

fn update(path: Option<&Path>, change: impl FnOnce(&mut OptionStore)) -> Result<()> {
    let (mut config, path) = load(path)?;
    let mut store = OptionStore::from_map(std::mem::take(&mut config.options));
    change(&mut store);
    if !store.is_dirty() {
        return Ok(());
    }
    config.options = store.to_map();
    chathook_config::save_config_to(&config, &path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("Saved {}", path.display());
    Ok(())
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
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

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
