use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_PROGRESS_THROTTLE, KEYFRAME_JPEG_QUALITY,
    KEYFRAME_MAX_COUNT, KEYFRAME_MAX_WIDTH, KEYFRAME_MIN_COUNT, KEYFRAME_SECONDS_PER_FRAME,
};
use super::media_policy::MediaPolicy;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },
}

/// How a job's frames are driven through source, stages and sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Sequential,
    Threaded,
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(ExecutorKind::Sequential),
            "threaded" => Ok(ExecutorKind::Threaded),
            other => Err(format!(
                "executor must be 'sequential' or 'threaded', got '{other}'"
            )),
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::Sequential => write!(f, "sequential"),
            ExecutorKind::Threaded => write!(f, "threaded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeSettings {
    pub enabled: bool,
    pub seconds_per_keyframe: f64,
    pub min_count: usize,
    pub max_count: usize,
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for KeyframeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            seconds_per_keyframe: KEYFRAME_SECONDS_PER_FRAME,
            min_count: KEYFRAME_MIN_COUNT,
            max_count: KEYFRAME_MAX_COUNT,
            max_width: KEYFRAME_MAX_WIDTH,
            jpeg_quality: KEYFRAME_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub media_policy: MediaPolicy,
    pub executor: ExecutorKind,
    pub channel_capacity: usize,
    pub keyframes: KeyframeSettings,
    pub progress_throttle: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            media_policy: MediaPolicy::default(),
            executor: ExecutorKind::Threaded,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            keyframes: KeyframeSettings::default(),
            progress_throttle: DEFAULT_PROGRESS_THROTTLE,
        }
    }
}

impl Settings {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Stepwise").join("settings.json"))
    }

    /// Loads settings from the platform config directory, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        Self::config_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default()
    }

    /// Loads settings from an explicit file. Unlike [`Settings::load`],
    /// a missing or malformed file is an error.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `STEPWISE_*` environment overrides on top of file settings.
    pub fn with_env_overrides(self) -> Result<Self, SettingsError> {
        self.with_overrides(|var| std::env::var(var).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        if let Some(value) = lookup("STEPWISE_ALLOWED_EXTENSIONS") {
            self.media_policy.allowed_extensions = value
                .split(',')
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(value) = lookup("STEPWISE_MAX_CONTENT_LENGTH") {
            self.media_policy.max_content_length =
                value.trim().parse().map_err(|_| SettingsError::Env {
                    var: "STEPWISE_MAX_CONTENT_LENGTH",
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup("STEPWISE_EXECUTOR") {
            self.executor = value.parse().map_err(|_| SettingsError::Env {
                var: "STEPWISE_EXECUTOR",
                value: value.clone(),
            })?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.executor, ExecutorKind::Threaded);
        assert_eq!(settings.channel_capacity, 8);
        assert!(settings.keyframes.enabled);
        assert_eq!(settings.keyframes.max_width, 1200);
        assert_eq!(settings.media_policy.max_content_length, 104_857_600);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"executor": "sequential", "keyframes": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(settings.executor, ExecutorKind::Sequential);
        assert!(!settings.keyframes.enabled);
        assert_eq!(settings.keyframes.jpeg_quality, 80);
        assert_eq!(settings.channel_capacity, 8);
    }

    #[test]
    fn test_load_from_missing_file_is_error() {
        let err = Settings::load_from(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
    }

    #[test]
    fn test_load_from_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
    }

    #[test]
    fn test_load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"channel_capacity": 2}"#).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap().channel_capacity, 2);
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::default()
            .with_overrides(env(&[
                ("STEPWISE_ALLOWED_EXTENSIONS", "MP4, webm,"),
                ("STEPWISE_MAX_CONTENT_LENGTH", "2048"),
                ("STEPWISE_EXECUTOR", "Sequential"),
            ]))
            .unwrap();
        assert_eq!(
            settings.media_policy.allowed_extensions,
            vec!["mp4".to_string(), "webm".to_string()]
        );
        assert_eq!(settings.media_policy.max_content_length, 2048);
        assert_eq!(settings.executor, ExecutorKind::Sequential);
    }

    #[test]
    fn test_env_override_rejects_bad_number() {
        let err = Settings::default()
            .with_overrides(env(&[("STEPWISE_MAX_CONTENT_LENGTH", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Env {
                var: "STEPWISE_MAX_CONTENT_LENGTH",
                ..
            }
        ));
    }
}
