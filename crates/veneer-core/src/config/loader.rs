use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::Config;
use crate::error::ConfigError;

/// Returns the data directory: `<config dir>/veneer/`.
pub fn data_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("veneer"))
}

/// Returns the directory holding named target files.
pub fn targets_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("Targets"))
}

/// Resolves the configuration argument to a file path.
///
/// An existing path is used as-is. A bare name is looked up in
/// [`targets_dir`] with `.json` appended when missing. No argument
/// selects `default.json` in the data directory.
pub fn resolve_path(arg: Option<&str>) -> Option<PathBuf> {
    let Some(arg) = arg.map(str::trim).filter(|a| !a.is_empty()) else {
        return data_dir().map(|d| d.join("default.json"));
    };
    let direct = Path::new(arg);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    let name = if arg.ends_with(".json") {
        arg.to_string()
    } else {
        format!("{arg}.json")
    };
    targets_dir().map(|d| d.join(name))
}

/// Reads and parses a configuration file.
pub fn try_load(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Loads a configuration file, falling back to defaults when it cannot be
/// read. The result is always finalized.
pub fn load(path: Option<&Path>) -> Config {
    let Some(path) = path else {
        tracing::info!("No config file specified, using defaults");
        let mut config = Config::default();
        config.finalize();
        return config;
    };
    match try_load(path) {
        Ok(config) => {
            tracing::debug!("Read config file {}", path.display());
            config
        }
        Err(e) => {
            tracing::error!("Couldn't open settings file: {e}");
            tracing::debug!("Using defaults");
            let mut config = Config::default();
            config.finalize();
            config
        }
    }
}

/// Parses a configuration document.
///
/// Only a document that is not JSON at all is an error. Inside a valid
/// document every field is merged individually: unknown keys are ignored
/// and a value of the wrong type is skipped with a warning, leaving that
/// one field at its default.
pub fn from_str(content: &str) -> Result<Config, serde_json::Error> {
    let document: Value = serde_json::from_str(content)?;
    let mut config = Config::default();

    if let Value::Object(root) = &document {
        if let Some(version) = root.get("version").and_then(Value::as_u64)
            && version != 1
        {
            tracing::warn!("Config version {version} doesn't match application version");
        }

        let mut top = Map::new();
        for (key, value) in root {
            match key.as_str() {
                "launch" => config.launch = merge_section(&config.launch, key, value),
                "devices" => config.devices = merge_section(&config.devices, key, value),
                "controller" => {
                    config.controller = merge_section(&config.controller, key, value)
                }
                "window" => config.window = merge_section(&config.window, key, value),
                "logging" => config.logging = merge_section(&config.logging, key, value),
                _ => {
                    top.insert(key.clone(), value.clone());
                }
            }
        }
        config = merge_fields(&config, "", &top);
    }

    config.finalize();
    Ok(config)
}

fn merge_section<T>(current: &T, section: &str, value: &Value) -> T
where
    T: Serialize + DeserializeOwned + Clone,
{
    match value {
        Value::Object(fields) => merge_fields(current, section, fields),
        Value::Null => current.clone(),
        _ => {
            tracing::warn!("Err parsing \"{section}\"; expected an object");
            current.clone()
        }
    }
}

/// Overlays `fields` onto `current` one key at a time, keeping every
/// accepted key and rejecting only the ones that fail to deserialize.
fn merge_fields<T>(current: &T, section: &str, fields: &Map<String, Value>) -> T
where
    T: Serialize + DeserializeOwned + Clone,
{
    let Ok(Value::Object(mut accepted)) = serde_json::to_value(current) else {
        return current.clone();
    };
    let mut result = current.clone();

    for (key, value) in fields {
        if value.is_null() {
            continue;
        }
        let mut candidate = accepted.clone();
        candidate.insert(key.clone(), value.clone());
        match serde_json::from_value::<T>(Value::Object(candidate.clone())) {
            Ok(parsed) => {
                accepted = candidate;
                result = parsed;
            }
            Err(e) => {
                let name = if section.is_empty() {
                    key.clone()
                } else {
                    format!("{section}.{key}")
                };
                tracing::warn!("Err parsing \"{name}\"; {e}");
            }
        }
    }
    result
}
