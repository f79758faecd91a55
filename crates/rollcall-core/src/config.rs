//! Shared configuration for the daemon and the CLI.
//!
//! Resolution order (lowest to highest): built-in defaults, the TOML file at
//! `$ROLLCALL_CONFIG` or `$XDG_CONFIG_HOME/rollcall/config.toml`, then
//! `ROLLCALL_*` environment variables.

use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::types::Subject;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("subject catalog is empty")]
    NoSubjects,
    #[error("scan_interval_secs must be at least 1")]
    ZeroScanInterval,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ArcFace ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance below which a descriptor matches a student.
    pub match_threshold: f32,
    /// Pause between recognition scans.
    pub scan_interval_secs: u64,
    /// Frames discarded after opening the camera (auto exposure settling).
    pub warmup_frames: usize,
    /// Use random descriptors and matches instead of the ONNX model.
    pub demo_mode: bool,
    pub subjects: Vec<Subject>,
}

/// On-disk shape of `config.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    scan_interval_secs: Option<u64>,
    warmup_frames: Option<usize>,
    demo_mode: Option<bool>,
    subjects: Option<Vec<Subject>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            db_path: data_dir().join("attendance.db"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            scan_interval_secs: 3,
            warmup_frames: 4,
            demo_mode: false,
            subjects: default_subjects(),
        }
    }
}

impl Config {
    /// Load defaults, the config file (if present), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            config.apply_toml(&text, &path)?;
            tracing::debug!(path = %path.display(), "loaded config file");
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.subjects.is_empty() {
            return Err(ConfigError::NoSubjects);
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::ZeroScanInterval);
        }
        Ok(())
    }

    fn apply_toml(&mut self, text: &str, path: &Path) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.scan_interval_secs {
            self.scan_interval_secs = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.demo_mode {
            self.demo_mode = v;
        }
        if let Some(v) = file.subjects {
            self.subjects = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.match_threshold = env_parse("ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.scan_interval_secs = env_parse("ROLLCALL_SCAN_INTERVAL_SECS", self.scan_interval_secs);
        self.warmup_frames = env_parse("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        if let Ok(v) = std::env::var("ROLLCALL_DEMO_MODE") {
            match parse_flag(&v) {
                Some(flag) => self.demo_mode = flag,
                None => tracing::warn!(value = %v, "ignoring unrecognised ROLLCALL_DEMO_MODE"),
            }
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn subject(&self, code: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.code == code)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("rollcall")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("ROLLCALL_CONFIG") {
        return PathBuf::from(p);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("rollcall/config.toml")
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

fn default_subjects() -> Vec<Subject> {
    vec![
        Subject::new("math", "Mathematics"),
        Subject::new("physics", "Physics"),
        Subject::new("cs", "Computer Science"),
        Subject::new("english", "English"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
        assert_eq!(config.scan_interval_secs, 3);
        assert!(!config.demo_mode);
        assert!(config.subject("math").is_some());
        assert!(config.arcface_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_toml_overrides_only_given_keys() {
        let mut config = Config::default();
        let text = r#"
            camera_device = "/dev/video4"
            match_threshold = 1.1

            [[subjects]]
            code = "bio"
            name = "Biology"
        "#;
        config.apply_toml(text, Path::new("config.toml")).unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert!((config.match_threshold - 1.1).abs() < 1e-6);
        assert_eq!(config.scan_interval_secs, 3);
        assert_eq!(config.subjects, vec![Subject::new("bio", "Biology")]);
        assert!(config.subject("math").is_none());
    }

    #[test]
    fn test_toml_rejects_unknown_key() {
        let mut config = Config::default();
        let err = config
            .apply_toml("threshold = 0.5", Path::new("config.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_flag() {
        for on in ["1", "true", "TRUE", "yes", "on"] {
            assert_eq!(parse_flag(on), Some(true), "{on}");
        }
        for off in ["0", "false", "False", "no", "off", ""] {
            assert_eq!(parse_flag(off), Some(false), "{off}");
        }
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_validate_rejects_zero_interval_and_empty_catalog() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.apply_toml("scan_interval_secs = 0", Path::new("config.toml")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ZeroScanInterval)));

        let config = Config {
            subjects: Vec::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::NoSubjects)));
    }
}
