use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Overrides the default config location when set.
pub const CONFIG_ENV_VAR: &str = "SCRIBEWATCH_CONFIG";

/// Resolved once at startup and shared read-only afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WatchConfig {
    pub watched_path: PathBuf,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub ignore_directories: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    pub destination_path: PathBuf,
    pub service_url: String,
    #[serde(default)]
    pub postprocess_enabled: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_logger_name")]
    pub logger_name: String,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_include_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    1000
}

fn default_logger_name() -> String {
    "scribewatch".to_string()
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_in_flight() -> usize {
    1
}

impl WatchConfig {
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: WatchConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "max_in_flight",
                reason: "must be greater than zero".to_string(),
            });
        }
        let url = reqwest::Url::parse(&self.service_url).map_err(|e| ConfigError::Invalid {
            field: "service_url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid {
                field: "service_url",
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(ConfigError::Invalid {
                    field: "include_patterns/exclude_patterns",
                    reason: format!("`{pattern}`: {e}"),
                });
            }
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `$SCRIBEWATCH_CONFIG`, else `~/.config/scribewatch/config.json`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    let mut config_path = dirs::home_dir().ok_or(ConfigError::NoHomeDirectory)?;
    config_path.push(".config/scribewatch/config.json");
    Ok(config_path)
}

pub fn get_config() -> Result<WatchConfig, ConfigError> {
    WatchConfig::from_file(&config_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"{
        "watched_path": "/srv/incoming",
        "destination_path": "/srv/chunks",
        "service_url": "http://localhost:8000/transcribe"
    }"#;

    #[test]
    fn test_defaults_applied() {
        let config = WatchConfig::from_json_str(MINIMAL).unwrap();
        assert!(!config.recursive);
        assert_eq!(config.include_patterns, vec!["*".to_string()]);
        assert!(config.exclude_patterns.is_empty());
        assert!(config.ignore_directories);
        assert!(!config.case_sensitive);
        assert!(!config.postprocess_enabled);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.logger_name, "scribewatch");
        assert_eq!(config.debounce(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_in_flight, 1);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "watched_path": "/srv/incoming",
            "recursive": true,
            "include_patterns": ["*.wav", "*.mp3"],
            "exclude_patterns": ["*.tmp"],
            "ignore_directories": false,
            "case_sensitive": true,
            "destination_path": "/srv/chunks",
            "service_url": "https://asr.internal/v1/transcribe",
            "postprocess_enabled": true,
            "chunk_size": 256,
            "logger_name": "ingest",
            "debounce_ms": 50,
            "request_timeout_secs": 5,
            "max_in_flight": 4
        }"#;
        let config = WatchConfig::from_json_str(json).unwrap();
        assert!(config.recursive);
        assert_eq!(config.include_patterns.len(), 2);
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(config.max_in_flight, 4);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let json = MINIMAL.replace("\"watched_path\"", "\"chunk_size\": 0, \"watched_path\"");
        match WatchConfig::from_json_str(&json) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "chunk_size"),
            other => panic!("expected invalid chunk_size, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_service_url_rejected() {
        let json = MINIMAL.replace("http://localhost:8000/transcribe", "ftp://example.com");
        assert!(matches!(
            WatchConfig::from_json_str(&json),
            Err(ConfigError::Invalid { field: "service_url", .. })
        ));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let json = MINIMAL.replace("\"watched_path\"", "\"include_patterns\": [\"[\"], \"watched_path\"");
        assert!(matches!(
            WatchConfig::from_json_str(&json),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let json = r#"{ "watched_path": "/srv/incoming" }"#;
        assert!(matches!(WatchConfig::from_json_str(json), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = WatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.watched_path, PathBuf::from("/srv/incoming"));

        let missing = WatchConfig::from_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
