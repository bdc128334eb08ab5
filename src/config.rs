use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::faces::FaceSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub matching: MatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call timeout for every provider request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Prefix for the per-owner external collection id.
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
}

fn default_provider_endpoint() -> String {
    "http://127.0.0.1:8085/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_collection_prefix() -> String {
    "picface-user-".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_provider_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            collection_prefix: default_collection_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Detections below this confidence (0-100) are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_max_faces")]
    pub max_faces: usize,

    /// Fraction of the face size added on each side before cropping.
    #[serde(default = "default_crop_padding")]
    pub crop_padding: f64,

    /// JPEG quality for face crops sent to the provider.
    #[serde(default = "default_crop_quality")]
    pub crop_quality: u8,
}

fn default_min_confidence() -> f64 {
    90.0
}

fn default_max_faces() -> usize {
    10
}

fn default_crop_padding() -> f64 {
    0.2
}

fn default_crop_quality() -> u8 {
    90
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_faces: default_max_faces(),
            crop_padding: default_crop_padding(),
            crop_quality: default_crop_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_suggest_threshold")]
    pub suggest_threshold: f64,

    #[serde(default = "default_autotag_threshold")]
    pub autotag_threshold: f64,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_suggest_threshold() -> f64 {
    80.0
}

fn default_autotag_threshold() -> f64 {
    90.0
}

fn default_max_candidates() -> usize {
    5
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            suggest_threshold: default_suggest_threshold(),
            autotag_threshold: default_autotag_threshold(),
            max_candidates: default_max_candidates(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("picface")
        .join("picface.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            provider: ProviderConfig::default(),
            detection: DetectionConfig::default(),
            matching: MatchingConfig::default(),
        }
    }
}

impl Config {
    /// Load from `PICFACE_CONFIG` or the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        for (name, value) in [
            ("suggest_threshold", m.suggest_threshold),
            ("autotag_threshold", m.autotag_threshold),
            ("min_confidence", self.detection.min_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be between 0 and 100, got {}", name, value);
            }
        }
        if m.suggest_threshold > m.autotag_threshold {
            bail!(
                "suggest_threshold ({}) must not exceed autotag_threshold ({})",
                m.suggest_threshold,
                m.autotag_threshold
            );
        }
        if m.max_candidates == 0 {
            bail!("max_candidates must be at least 1");
        }
        if self.detection.max_faces == 0 {
            bail!("max_faces must be at least 1");
        }
        if !self.detection.crop_padding.is_finite() || self.detection.crop_padding < 0.0 {
            bail!("crop_padding must be a non-negative number");
        }
        if self.provider.timeout_secs == 0 {
            bail!("provider timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn face_settings(&self) -> FaceSettings {
        FaceSettings {
            min_detection_confidence: self.detection.min_confidence,
            max_faces: self.detection.max_faces,
            crop_padding: self.detection.crop_padding,
            crop_quality: self.detection.crop_quality,
            suggest_threshold: self.matching.suggest_threshold,
            autotag_threshold: self.matching.autotag_threshold,
            max_candidates: self.matching.max_candidates,
            collection_prefix: self.provider.collection_prefix.clone(),
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("picface")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PICFACE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
