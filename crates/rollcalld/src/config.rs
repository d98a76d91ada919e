use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the daemon configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rollcall/rollcalld.toml";

/// Daemon configuration.
///
/// Loaded from an optional TOML file, then overridden by `ROLLCALL_*`
/// environment variables. Every key has a default, so an empty or missing
/// file is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing the SCRFD ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Seconds before the same person may trigger another attendance write.
    pub attendance_cooldown_secs: u64,
    /// Seconds before the same person may be counted again during an evacuation.
    pub evacuation_cooldown_secs: u64,
    pub attendance_min_confidence: f32,
    pub login_min_confidence: f32,
    pub evacuation_min_confidence: f32,
    /// Frame reads attempted per enrollment capture before giving up.
    pub capture_attempts: u32,
    pub capture_retry_ms: u64,
    /// Engine tick and acquisition back-off interval.
    pub poll_interval_ms: u64,
    /// Sweep samples required before finalize; 0 disables the requirement.
    pub sweep_min_samples: usize,
    /// Sweep captures a client is expected to attempt.
    pub sweep_attempts: usize,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 1280,
            frame_height: 720,
            model_dir: rollcall_core::default_model_dir(),
            db_path: default_data_dir().join("attendance.db"),
            attendance_cooldown_secs: 30,
            evacuation_cooldown_secs: 30,
            attendance_min_confidence: 0.6,
            login_min_confidence: 0.6,
            evacuation_min_confidence: 0.5,
            capture_attempts: 10,
            capture_retry_ms: 100,
            poll_interval_ms: 30,
            sweep_min_samples: 0,
            sweep_attempts: 45,
            session_bus: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
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
}

impl Config {
    /// Load the file named by `ROLLCALL_CONFIG` (or the default path), then
    /// apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse a TOML config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `ROLLCALL_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        self.frame_width = env_parse("ROLLCALL_FRAME_WIDTH", self.frame_width);
        self.frame_height = env_parse("ROLLCALL_FRAME_HEIGHT", self.frame_height);
        self.attendance_cooldown_secs =
            env_parse("ROLLCALL_ATTENDANCE_COOLDOWN_SECS", self.attendance_cooldown_secs);
        self.evacuation_cooldown_secs =
            env_parse("ROLLCALL_EVACUATION_COOLDOWN_SECS", self.evacuation_cooldown_secs);
        self.attendance_min_confidence =
            env_parse("ROLLCALL_ATTENDANCE_MIN_CONFIDENCE", self.attendance_min_confidence);
        self.login_min_confidence =
            env_parse("ROLLCALL_LOGIN_MIN_CONFIDENCE", self.login_min_confidence);
        self.evacuation_min_confidence =
            env_parse("ROLLCALL_EVACUATION_MIN_CONFIDENCE", self.evacuation_min_confidence);
        self.capture_attempts = env_parse("ROLLCALL_CAPTURE_ATTEMPTS", self.capture_attempts);
        self.capture_retry_ms = env_parse("ROLLCALL_CAPTURE_RETRY_MS", self.capture_retry_ms);
        self.poll_interval_ms = env_parse("ROLLCALL_POLL_INTERVAL_MS", self.poll_interval_ms);
        self.sweep_min_samples = env_parse("ROLLCALL_SWEEP_MIN_SAMPLES", self.sweep_min_samples);
        self.sweep_attempts = env_parse("ROLLCALL_SWEEP_ATTEMPTS", self.sweep_attempts);
        if let Ok(v) = std::env::var("ROLLCALL_SESSION_BUS") {
            self.session_bus = v != "0";
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn attendance_cooldown(&self) -> Duration {
        Duration::from_secs(self.attendance_cooldown_secs)
    }

    pub fn evacuation_cooldown(&self) -> Duration {
        Duration::from_secs(self.evacuation_cooldown_secs)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!((config.frame_width, config.frame_height), (1280, 720));
        assert_eq!(config.attendance_cooldown(), Duration::from_secs(30));
        assert_eq!(config.capture_attempts, 10);
        assert_eq!(config.sweep_min_samples, 0);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_toml_overrides_selected_keys() {
        let config = Config::from_toml(
            r#"
            camera_device = "/dev/video4"
            evacuation_min_confidence = 0.7
            sweep_min_samples = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.camera_device, "/dev/video4");
        assert!((config.evacuation_min_confidence - 0.7).abs() < 1e-6);
        assert_eq!(config.sweep_min_samples, 30);
        assert!((config.login_min_confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(Config::from_toml("frame_width = \"wide\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::from_file(Path::new("/nonexistent/rollcalld.toml")).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(30));
    }

    #[test]
    fn test_scrfd_path_under_model_dir() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::default()
        };
        assert_eq!(config.scrfd_model_path(), "/opt/models/det_10g.onnx");
    }
}
