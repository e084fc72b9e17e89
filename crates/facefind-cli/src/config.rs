use facefind_core::detector::{DEFAULT_CONFIDENCE, RELAXED_CONFIDENCE};
use facefind_core::matcher::DEFAULT_DISTANCE_THRESHOLD;
use facefind_core::recognizer::ARCFACE_EMBEDDING_DIM;
use facefind_core::{DetectionThresholds, DetectorBackend, MatchEngine};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0}")]
    UnknownBackend(#[from] facefind_core::detector::DetectorError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration: optional TOML file, then `FACEFIND_*` overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Detectors tried with enforced detection, in order.
    pub detector_priority: Vec<DetectorBackend>,
    /// Cosine distance below which two faces match.
    pub distance_threshold: f64,
    /// Length every stored and queried embedding must have.
    pub embedding_dimension: usize,
    /// Detector confidence required in enforced mode.
    pub detection_confidence: f32,
    /// Detector confidence accepted in best-effort mode.
    pub relaxed_confidence: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facefind_core::default_model_dir(),
            detector_priority: DetectorBackend::DEFAULT_PRIORITY.to_vec(),
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            embedding_dimension: ARCFACE_EMBEDDING_DIM,
            detection_confidence: DEFAULT_CONFIDENCE,
            relaxed_confidence: RELAXED_CONFIDENCE,
        }
    }
}

impl Config {
    /// Load from `FACEFIND_CONFIG` (or the XDG default path, if present),
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os("FACEFIND_CONFIG").map(PathBuf::from);
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `FACEFIND_*` variables looked up through `lookup`.
    ///
    /// Unparsable numbers are ignored with a warning; unknown detector names fail.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("FACEFIND_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(list) = lookup("FACEFIND_DETECTOR_PRIORITY") {
            self.detector_priority = list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
        }
        env_parse(&lookup, "FACEFIND_DISTANCE_THRESHOLD", &mut self.distance_threshold);
        env_parse(&lookup, "FACEFIND_EMBEDDING_DIMENSION", &mut self.embedding_dimension);
        env_parse(&lookup, "FACEFIND_DETECTION_CONFIDENCE", &mut self.detection_confidence);
        env_parse(&lookup, "FACEFIND_RELAXED_CONFIDENCE", &mut self.relaxed_confidence);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.distance_threshold > 0.0 && self.distance_threshold <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "distance_threshold must be in (0, 2], got {}",
                self.distance_threshold
            )));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Invalid("embedding_dimension must be positive".into()));
        }
        if self.detector_priority.is_empty() {
            return Err(ConfigError::Invalid("detector_priority must name at least one detector".into()));
        }
        for (name, value) in [
            ("detection_confidence", self.detection_confidence),
            ("relaxed_confidence", self.relaxed_confidence),
        ] {
            if !(value > 0.0 && value < 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1), got {value}")));
            }
        }
        Ok(())
    }

    pub fn match_engine(&self) -> MatchEngine {
        MatchEngine::new(self.distance_threshold, self.embedding_dimension)
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            enforced: self.detection_confidence,
            best_effort: self.relaxed_confidence,
        }
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facefind/config.toml")
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable setting"),
        }
    }
}
