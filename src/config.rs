use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "herdwatch.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("confidence threshold {0} outside [0.1, 0.9]")]
    ConfidenceOutOfRange(f32),
    #[error("alarm window size must be at least 1")]
    EmptyWindow,
    #[error("trigger threshold {threshold} must be below window size {window}")]
    ThresholdTooHigh { threshold: usize, window: usize },
    #[error("cooldown must be a non-negative number of seconds, got {0}")]
    InvalidCooldown(f64),
    #[error("no tracked classes configured")]
    NoTrackedClasses,
    #[error("tracked class '{0}' is not a detector label")]
    UnknownClass(String),
    #[error("source kind '{0:?}' needs a path")]
    MissingSourcePath(SourceKind),
}

fn default_confidence_threshold() -> f32 {
    0.2
}

fn default_tracked_classes() -> Vec<String> {
    ["bird", "cat", "cow", "dog", "horse", "sheep"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_labels() -> Vec<String> {
    [
        "background",
        "aeroplane",
        "bicycle",
        "bird",
        "boat",
        "bottle",
        "bus",
        "car",
        "cat",
        "chair",
        "cow",
        "dining-table",
        "dog",
        "horse",
        "motorbike",
        "person",
        "potted plant",
        "sheep",
        "sofa",
        "train",
        "monitor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_tracked_classes")]
    pub tracked_classes: Vec<String>,
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            tracked_classes: default_tracked_classes(),
            labels: default_labels(),
        }
    }
}

/// When an active alert may fire again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearmPolicy {
    /// Clear once the window's positive count is no longer above the threshold.
    #[default]
    BelowThreshold,
    /// Clear only on stop or reset.
    OnReset,
}

fn default_window_size() -> usize {
    36
}

fn default_trigger_threshold() -> usize {
    15
}

fn default_cooldown_secs() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_trigger_threshold")]
    pub trigger_threshold: usize,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: f64,
    #[serde(default)]
    pub rearm: RearmPolicy,
    #[serde(default)]
    pub require_full_window: bool,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            trigger_threshold: default_trigger_threshold(),
            cooldown_secs: default_cooldown_secs(),
            rearm: RearmPolicy::default(),
            require_full_window: false,
        }
    }
}

/// What happens to sessions still open when a run stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenSessionPolicy {
    /// Close with the stop time as end time.
    #[default]
    Close,
    Discard,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub on_stop: OpenSessionPolicy,
}

fn default_siren_path() -> PathBuf {
    PathBuf::from("siren/Siren.wav")
}

fn default_siren_player() -> String {
    "ffplay".to_string()
}

fn default_siren_args() -> Vec<String> {
    ["-nodisp", "-autoexit", "-loglevel", "quiet"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SirenConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_siren_path")]
    pub path: PathBuf,
    #[serde(default = "default_siren_player")]
    pub player: String,
    #[serde(default = "default_siren_args")]
    pub args: Vec<String>,
}

impl Default for SirenConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_siren_path(),
            player: default_siren_player(),
            args: default_siren_args(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

fn default_drain_timeout_secs() -> u64 {
    15
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub siren: SirenConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    /// How long a finished run waits for deliveries still in flight.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            siren: SirenConfig::default(),
            sms: SmsConfig::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Recorded per-frame detections, one JSON object per line.
    #[default]
    Replay,
    Camera,
    File,
}

fn default_max_consecutive_errors() -> u32 {
    10
}

fn default_loop_pause_ms() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub device: i32,
    #[serde(default)]
    pub frame_interval_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_loop_pause_ms")]
    pub loop_pause_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            path: None,
            device: 0,
            frame_interval_ms: 0,
            max_consecutive_errors: default_max_consecutive_errors(),
            loop_pause_ms: default_loop_pause_ms(),
        }
    }
}

fn default_model_path() -> String {
    "models/detector.onnx".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let theta = self.detection.confidence_threshold;
        if !(0.1..=0.9).contains(&theta) {
            return Err(ConfigError::ConfidenceOutOfRange(theta));
        }

        if self.alarm.window_size == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if self.alarm.trigger_threshold >= self.alarm.window_size {
            return Err(ConfigError::ThresholdTooHigh {
                threshold: self.alarm.trigger_threshold,
                window: self.alarm.window_size,
            });
        }
        let cooldown = self.alarm.cooldown_secs;
        if !cooldown.is_finite() || cooldown < 0.0 {
            return Err(ConfigError::InvalidCooldown(cooldown));
        }

        if self.detection.tracked_classes.is_empty() {
            return Err(ConfigError::NoTrackedClasses);
        }
        for class in &self.detection.tracked_classes {
            if !self.detection.labels.contains(class) {
                return Err(ConfigError::UnknownClass(class.clone()));
            }
        }

        if self.source.kind != SourceKind::Camera && self.source.path.is_none() {
            return Err(ConfigError::MissingSourcePath(self.source.kind));
        }

        Ok(())
    }
}
