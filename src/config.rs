use serde::Deserialize;
use std::{fs, path::Path};
use tracing::info;

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub gst: GstSection,
    #[serde(default)]
    pub llm: LlmSection,
}

fn default_db_path() -> String {
    "auditstore/invoices.db".to_string()
}

/// Thresholds for the rule-based checks.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Amount above `avg * unusual_multiplier` raises UNUSUAL_AMOUNT.
    #[serde(default = "default_unusual_multiplier")]
    pub unusual_multiplier: f64,
    /// Amount above `avg * elevated_multiplier` is reported but not flagged.
    #[serde(default = "default_elevated_multiplier")]
    pub elevated_multiplier: f64,
    /// Values that mean "no GSTIN" when they are all an invoice carries.
    #[serde(default = "default_placeholders")]
    pub missing_gst_placeholders: Vec<String>,
}

fn default_unusual_multiplier() -> f64 {
    3.0
}

fn default_elevated_multiplier() -> f64 {
    2.0
}

fn default_placeholders() -> Vec<String> {
    vec!["N/A".to_string(), "Unknown".to_string(), String::new()]
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            unusual_multiplier: default_unusual_multiplier(),
            elevated_multiplier: default_elevated_multiplier(),
            missing_gst_placeholders: default_placeholders(),
        }
    }
}

impl DetectionConfig {
    /// Multipliers must be positive and `elevated <= unusual`, otherwise the
    /// Elevated verdict can never be reached.
    pub fn validate(&self) -> Result<()> {
        let (elevated, unusual) = (self.elevated_multiplier, self.unusual_multiplier);
        if !(elevated.is_finite() && elevated > 0.0 && unusual.is_finite() && unusual > 0.0) {
            return Err(AuditError::InvalidConfig(format!(
                "multipliers must be positive numbers (elevated {elevated}, unusual {unusual})"
            )));
        }
        if elevated > unusual {
            return Err(AuditError::InvalidConfig(format!(
                "elevated_multiplier {elevated} is above unusual_multiplier {unusual}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GstBackend {
    Rapidapi,
    Offline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GstSection {
    #[serde(default = "default_gst_backend")]
    pub backend: GstBackend,
    #[serde(default = "default_gst_url")]
    pub base_url: String,
    #[serde(default = "default_gst_host")]
    pub host: String,
    #[serde(default = "default_gst_timeout")]
    pub timeout_secs: u64,
}

fn default_gst_backend() -> GstBackend {
    GstBackend::Rapidapi
}

fn default_gst_url() -> String {
    "https://gst-insights.p.rapidapi.com/gstinsights".to_string()
}

fn default_gst_host() -> String {
    "gst-insights.p.rapidapi.com".to_string()
}

fn default_gst_timeout() -> u64 {
    10
}

impl Default for GstSection {
    fn default() -> Self {
        Self {
            backend: default_gst_backend(),
            base_url: default_gst_url(),
            host: default_gst_host(),
            timeout_secs: default_gst_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmBackend {
    Disabled,
    Ollama,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_backend")]
    pub backend: LlmBackend,
    #[serde(default = "default_ollama")]
    pub ollama: LlmEndpoint,
    #[serde(default = "default_remote")]
    pub remote: LlmEndpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmEndpoint {
    pub base_url: String,
    pub model: String,
}

fn default_llm_backend() -> LlmBackend {
    LlmBackend::Disabled
}

fn default_ollama() -> LlmEndpoint {
    LlmEndpoint {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "qwen3:8b".to_string(),
    }
}

fn default_remote() -> LlmEndpoint {
    LlmEndpoint {
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
        model: "gemini-2.0-flash".to_string(),
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            backend: default_llm_backend(),
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            detection: DetectionConfig::default(),
            gst: GstSection::default(),
            llm: LlmSection::default(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&content)?;
        cfg.detection.validate()?;
        Ok(cfg)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
