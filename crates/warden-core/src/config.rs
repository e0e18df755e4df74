//! Settings
//!
//! Layered, later wins:
//! 1. Built-in defaults
//! 2. `warden.toml` (or an explicit path), explicit keys only
//! 3. `WARDEN_*` environment variables
//!
//! ```toml
//! data_dir = "data"
//!
//! [sweep]
//! interval_secs = 30
//!
//! [sentence]
//! max_secs = 86400
//! allow_permanent = true
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{sentence::Sentence, Error, Result};

pub const DEFAULT_CONFIG_FILE: &str = "warden.toml";
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576; // 1 MB
const MAX_SWEEP_INTERVAL_SECS: u64 = 3_600;

const VALID_KEYS: &[&str] = &[
    "data_dir",
    "sweep.interval_secs",
    "sentence.max_secs",
    "sentence.allow_permanent",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding `zones.json` and `restrictions.json`
    pub data_dir: PathBuf,
    pub sweep: SweepSettings,
    pub sentence: SentenceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSettings {
    pub interval_secs: u64,
}

/// Caller-side limits for newly issued sentences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceSettings {
    pub max_secs: u64,
    pub allow_permanent: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sweep: SweepSettings::default(),
            sentence: SentenceSettings::default(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for SentenceSettings {
    fn default() -> Self {
        Self {
            max_secs: 86_400,
            allow_permanent: true,
        }
    }
}

// Partial forms: only keys present in the file are `Some`.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialSettings {
    pub data_dir: Option<PathBuf>,
    pub sweep: Option<PartialSweepSettings>,
    pub sentence: Option<PartialSentenceSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialSweepSettings {
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialSentenceSettings {
    pub max_secs: Option<u64>,
    pub allow_permanent: Option<bool>,
}

impl Settings {
    pub fn merge_partial(&mut self, partial: PartialSettings) {
        if let Some(data_dir) = partial.data_dir {
            self.data_dir = data_dir;
        }
        if let Some(sweep) = partial.sweep {
            if let Some(interval_secs) = sweep.interval_secs {
                self.sweep.interval_secs = interval_secs;
            }
        }
        if let Some(sentence) = partial.sentence {
            if let Some(max_secs) = sentence.max_secs {
                self.sentence.max_secs = max_secs;
            }
            if let Some(allow_permanent) = sentence.allow_permanent {
                self.sentence.allow_permanent = allow_permanent;
            }
        }
    }

    /// Apply `WARDEN_*` overrides from the process environment.
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply `WARDEN_*` overrides from an arbitrary lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("WARDEN_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }

        if let Some(value) = lookup("WARDEN_SWEEP_INTERVAL_SECS") {
            self.sweep.interval_secs = value.trim().parse().map_err(|e| {
                Error::InvalidConfig(format!("Invalid WARDEN_SWEEP_INTERVAL_SECS value: {e}"))
            })?;
        }

        if let Some(value) = lookup("WARDEN_MAX_SENTENCE_SECS") {
            self.sentence.max_secs = value.trim().parse().map_err(|e| {
                Error::InvalidConfig(format!("Invalid WARDEN_MAX_SENTENCE_SECS value: {e}"))
            })?;
        }

        if let Some(value) = lookup("WARDEN_ALLOW_PERMANENT") {
            self.sentence.allow_permanent = parse_bool(&value).ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "Invalid WARDEN_ALLOW_PERMANENT value: '{value}' (expected true or false)"
                ))
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SWEEP_INTERVAL_SECS).contains(&self.sweep.interval_secs) {
            return Err(Error::InvalidConfig(format!(
                "sweep.interval_secs must be between 1 and {MAX_SWEEP_INTERVAL_SECS}, got {}",
                self.sweep.interval_secs
            )));
        }
        if self.sentence.max_secs == 0 {
            return Err(Error::InvalidConfig(
                "sentence.max_secs must be greater than 0".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data_dir cannot be empty".to_string()));
        }
        Ok(())
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }

    /// Check a sentence a caller is about to issue against the limits.
    pub fn check_sentence(&self, sentence: Sentence) -> Result<()> {
        match sentence {
            Sentence::Permanent if !self.sentence.allow_permanent => Err(
                Error::InvalidDuration("permanent sentences are disabled".to_string()),
            ),
            Sentence::Permanent => Ok(()),
            Sentence::Seconds(secs) if secs > self.sentence.max_secs => {
                Err(Error::InvalidDuration(format!(
                    "{sentence} exceeds the maximum of {}",
                    Sentence::Seconds(self.sentence.max_secs)
                )))
            }
            Sentence::Seconds(_) => Ok(()),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reject keys that are neither a known key nor a parent table of one.
pub fn validate_key(key: &str) -> Result<()> {
    let known = VALID_KEYS
        .iter()
        .any(|valid| key == *valid || valid.starts_with(&format!("{key}.")));
    if known {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "Unknown configuration key: '{key}'. Valid keys: {}",
            VALID_KEYS.join(", ")
        )))
    }
}

fn extract_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let toml::Value::Table(table) = value else {
        return Vec::new();
    };
    table
        .iter()
        .flat_map(|(key, val)| {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            let nested = extract_keys(val, &full_key);
            std::iter::once(full_key).chain(nested)
        })
        .collect()
}

/// Read a TOML file into its explicit-key partial form.
pub async fn load_partial_toml_file(path: &Path) -> Result<PartialSettings> {
    let metadata = tokio::fs::symlink_metadata(path).await.map_err(|e| {
        Error::Persistence(format!(
            "Failed to read config file metadata {}: {e}",
            path.display()
        ))
    })?;

    if metadata.file_type().is_symlink() {
        return Err(Error::InvalidConfig(format!(
            "Config file {} is a symbolic link, refusing to follow it",
            path.display()
        )));
    }
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(Error::InvalidConfig(format!(
            "Config file {} exceeds maximum size of {MAX_CONFIG_FILE_SIZE} bytes",
            path.display()
        )));
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Persistence(format!(
            "Failed to read config file {}: {e}",
            path.display()
        ))
    })?;

    let value: toml::Value = toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })?;
    extract_keys(&value, "")
        .iter()
        .try_for_each(|key| validate_key(key))?;

    toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!("Failed to parse config: {}: {e}", path.display()))
    })
}

/// Load settings from defaults, a config file and the environment.
///
/// With no explicit path, `warden.toml` in the working directory is used if
/// present. An explicit path must exist.
pub async fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();

    match path {
        Some(path) => settings.merge_partial(load_partial_toml_file(path).await?),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if tokio::fs::try_exists(default_path).await.unwrap_or(false) {
                settings.merge_partial(load_partial_toml_file(default_path).await?);
            }
        }
    }

    settings.apply_env_vars()?;
    settings.validate()?;
    Ok(settings)
}
