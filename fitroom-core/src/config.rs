use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ledger::DEFAULT_LEDGER_CAPACITY;
use crate::pricing::{ModelRate, RateTable};
use crate::types::{Pose, default_poses};

/// Top-level fitroom configuration, matching `fitroom.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitroomConfig {
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing: Vec<PricingRow>,
    #[serde(default = "default_poses")]
    pub poses: Vec<Pose>,
}

impl Default for FitroomConfig {
    fn default() -> Self {
        Self {
            oracle: OracleSection::default(),
            retry: RetrySection::default(),
            ledger: LedgerSection::default(),
            cache: CacheSection::default(),
            pricing: Vec::new(),
            poses: default_poses(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub base_url: String,
    pub image_model: String,
    pub text_model: String,
    pub timeout_secs: u64,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            timeout_secs: 120,
        }
    }
}

impl OracleSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts per generation call.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub capacity: usize,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LEDGER_CAPACITY,
        }
    }
}

/// Try-on cache sizing. No capacity means one unbounded map per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
}

/// Extra or replacement model rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRow {
    pub model: String,
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl FitroomConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ledger.capacity == 0 {
            return Err(ConfigError::Invalid(
                "ledger.capacity must be at least 1".to_string(),
            ));
        }
        if self.cache.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "cache.capacity must be at least 1 when set".to_string(),
            ));
        }
        if self.poses.is_empty() {
            return Err(ConfigError::Invalid("at least one pose is required".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for pose in &self.poses {
            if pose.name.trim().is_empty() {
                return Err(ConfigError::Invalid("pose name must not be empty".to_string()));
            }
            if !seen.insert(pose.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pose name: {}",
                    pose.name
                )));
            }
        }
        for row in &self.pricing {
            if row.input_per_1m < 0.0 || row.output_per_1m < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "negative pricing for model {}",
                    row.model
                )));
            }
        }
        Ok(())
    }

    /// Built-in rates with the configured rows layered on top.
    pub fn rate_table(&self) -> RateTable {
        let mut table = RateTable::builtin();
        for row in &self.pricing {
            table.insert(&row.model, ModelRate::new(row.input_per_1m, row.output_per_1m));
        }
        table
    }

    /// Look up a pose by name, case-insensitively.
    pub fn pose(&self, name: &str) -> Option<&Pose> {
        self.poses
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}
