use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::HostConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "chathook.toml",
    "chathook.yaml",
    "chathook.yml",
    "chathook.json",
];

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Use `dir` instead of the platform config directory.
pub fn set_config_dir(dir: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = Some(dir);
}

pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner()) = None;
}

/// Returns the user-global config directory (`~/.config/chathook/`), or the
/// override set with [`set_config_dir`].
pub fn config_dir() -> Option<PathBuf> {
    let override_dir = CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    override_dir.or_else(|| {
        directories::ProjectDirs::from("", "", "chathook").map(|d| d.config_dir().to_path_buf())
    })
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./chathook.{toml,yaml,yml,json}` (project-local)
/// 2. `<config dir>/chathook.{toml,yaml,yml,json}` (user-global)
///
/// Returns the config together with the file it came from, or defaults and
/// `None` when nothing usable was found.
pub fn discover_and_load() -> (HostConfig, Option<PathBuf>) {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return (cfg, Some(path)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    (HostConfig::default(), None)
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path() -> PathBuf {
    if let Some(path) = find_config_file() {
        return path;
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chathook.toml")
}

/// Serialize `config` and write it to `path`, in the format implied by the
/// extension. Creates parent directories if needed.
pub fn save_config_to(config: &HostConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    let body = match ext {
        "toml" => toml::to_string_pretty(config)?,
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        other => return Err(Error::unsupported_format(path, other)),
    };
    std::fs::write(path, body)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// Write `config` to the discovered (or default) config path.
pub fn save_config(config: &HostConfig) -> Result<PathBuf> {
    let path = find_or_default_config_path();
    save_config_to(config, &path)?;
    Ok(path)
}

fn parse_config(raw: &str, path: &Path) -> Result<HostConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::unsupported_format(path, other)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/chathook.toml");

        let mut cfg = HostConfig::default();
        cfg.options.insert("webbrowser".into(), "firefox".into());
        cfg.process.default_timeout_ms = 500;
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let yaml = dir.path().join("chathook.yaml");
        std::fs::write(&yaml, "options:\n  webbrowser: lynx\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().options["webbrowser"], "lynx");

        let json = dir.path().join("chathook.json");
        std::fs::write(&json, r#"{"dispatch": {"max_depth": 4}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().dispatch.max_depth, 4);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chathook.ini");
        std::fs::write(&path, "x=1").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { ref ext, .. } if ext == "ini"));
    }

    #[test]
    fn missing_file_error_names_path() {
        let err = load_config(Path::new("/nonexistent/chathook.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chathook.toml"));
    }
}
