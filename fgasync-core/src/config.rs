//! Layered configuration loading.
//!
//! Resolution order (lowest to highest priority):
//! 1. `{stem}.yaml` (base)
//! 2. `{stem}-{profile}.yaml` (profile override)
//! 3. `.env` then `.env.{profile}` (loaded into the process environment,
//!    never overwriting variables that are already set)
//! 4. Environment variables with the configured prefix
//!
//! Environment keys map onto the YAML tree by splitting sections on `__` and
//! turning the remaining `_` into `-`:
//! `FGASYNC_CONTROLLER__MAX_CONCURRENT_RECONCILES` → `controller.max-concurrent-reconciles`.
//!
//! String values may contain `${VAR}`, `${env:VAR}` or `${file:/path}`
//! placeholders, resolved after all layers are merged.

use crate::error::OperatorError;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ConfigError {
    /// A file could not be read.
    Load(String),
    /// YAML could not be parsed or did not match the target type.
    Parse(String),
    /// A `${...}` placeholder could not be resolved.
    Placeholder(String),
    /// A value is syntactically fine but not acceptable.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "Config load error: {msg}"),
            ConfigError::Parse(msg) => write!(f, "Config parse error: {msg}"),
            ConfigError::Placeholder(msg) => write!(f, "Config placeholder error: {msg}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for OperatorError {
    fn from(err: ConfigError) -> Self {
        OperatorError::fatal(err.to_string()).with_source(err)
    }
}

/// Where and how to load configuration from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    dir: PathBuf,
    file_stem: String,
    profile: String,
    env_prefix: String,
    read_env: bool,
}

impl ConfigSource {
    /// Look for `{file_stem}.yaml` in the working directory, profile `dev`,
    /// environment prefix `FGASYNC`.
    pub fn new(file_stem: impl Into<String>) -> Self {
        Self {
            dir: PathBuf::from("."),
            file_stem: file_stem.into(),
            profile: "dev".to_string(),
            env_prefix: "FGASYNC".to_string(),
            read_env: true,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Default profile; `{PREFIX}_PROFILE` still wins when set.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Ignore `.env` files and environment variables.
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    /// The profile that [`load`](Self::load) will use.
    pub fn active_profile(&self) -> String {
        if self.read_env {
            if let Ok(profile) = std::env::var(format!("{}_PROFILE", self.env_prefix)) {
                return profile;
            }
        }
        self.profile.clone()
    }

    pub fn load<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let profile = self.active_profile();
        let mut tree = Value::Mapping(Mapping::new());

        merge_file(&mut tree, &self.dir.join(format!("{}.yaml", self.file_stem)))?;
        merge_file(
            &mut tree,
            &self.dir.join(format!("{}-{profile}.yaml", self.file_stem)),
        )?;

        if self.read_env {
            let _ = dotenvy::from_path(self.dir.join(".env"));
            let _ = dotenvy::from_path(self.dir.join(format!(".env.{profile}")));
            overlay_env(&mut tree, &self.env_prefix, std::env::vars());
        }

        resolve_placeholders(&mut tree)?;
        serde_yaml::from_value(tree).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a YAML string with no other layers (useful for testing).
    pub fn from_yaml_str<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
        let mut tree: Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        if tree.is_null() {
            tree = Value::Mapping(Mapping::new());
        }
        resolve_placeholders(&mut tree)?;
        serde_yaml::from_value(tree).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Load `fgasync.yaml` and its layers from the working directory.
pub fn load_config<T: DeserializeOwned>() -> Result<T, ConfigError> {
    ConfigSource::new("fgasync").load()
}

fn merge_file(tree: &mut Value, path: &Path) -> Result<(), ConfigError> {
    if !path.exists() {
        return Ok(());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
    let overlay: Value = serde_yaml::from_str(&content)
        .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
    if !overlay.is_null() {
        merge(tree, overlay);
    }
    Ok(())
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; anything
/// else replaces.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn overlay_env(tree: &mut Value, prefix: &str, vars: impl Iterator<Item = (String, String)>) {
    let prefix = format!("{prefix}_");
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(&prefix) else {
            continue;
        };
        if rest == "PROFILE" || rest.is_empty() {
            continue;
        }
        let path: Vec<String> = rest
            .split("__")
            .map(|segment| segment.to_lowercase().replace('_', "-"))
            .collect();
        // Typed scalars: "8" becomes a number, "true" a bool.
        let value = serde_yaml::from_str::<Value>(&raw)
            .ok()
            .filter(|v| !v.is_mapping() && !v.is_sequence() && !v.is_null())
            .unwrap_or(Value::String(raw));
        set_path(tree, &path, value);
    }
}

fn set_path(tree: &mut Value, path: &[String], value: Value) {
    let Some((head, tail)) = path.split_first() else {
        *tree = value;
        return;
    };
    if !tree.is_mapping() {
        *tree = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(map) = tree {
        let key = Value::String(head.clone());
        let child = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        set_path(child, tail, value);
    }
}

fn resolve_placeholders(tree: &mut Value) -> Result<(), ConfigError> {
    match tree {
        Value::String(s) if s.contains("${") => {
            *s = resolve_string(s)?;
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, value) in map.iter_mut() {
                resolve_placeholders(value)?;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for value in seq.iter_mut() {
                resolve_placeholders(value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve_string(value: &str) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Placeholder(format!("unclosed placeholder in: {value}")))?;
        let reference = result[start + 2..start + end].trim().to_string();
        let resolved = resolve_reference(&reference)?;
        result = format!("{}{}{}", &result[..start], resolved, &result[start + end + 1..]);
    }
    Ok(result)
}

fn resolve_reference(reference: &str) -> Result<String, ConfigError> {
    if let Some(path) = reference.strip_prefix("file:") {
        std::fs::read_to_string(path.trim())
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::Placeholder(format!("secret file '{}': {e}", path.trim())))
    } else {
        let var = reference.strip_prefix("env:").unwrap_or(reference).trim();
        std::env::var(var).map_err(|_| ConfigError::Placeholder(format!("env var {var} is not set")))
    }
}
