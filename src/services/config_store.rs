// Configuration Storage Service
// Analyzer thresholds with serde defaults, config file read/write and version backup

use crate::models::ThresholdsUsed;
use crate::services::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerConfig {
    /// Documents below this many words are reported as insufficient data.
    #[serde(default = "default_min_words")]
    pub min_words: usize,
    #[serde(default = "default_diversity_window")]
    pub diversity_window: usize,
    #[serde(default = "default_attribution_margin")]
    pub attribution_margin: f64,
    #[serde(default = "default_attribution_min_score")]
    pub attribution_min_score: f64,
    #[serde(default = "default_sentence_threshold")]
    pub sentence_threshold: f64,
    #[serde(default = "default_section_min_words")]
    pub section_min_words: usize,
    #[serde(default = "default_tier_high")]
    pub tier_high_max_spread: f64,
    #[serde(default = "default_tier_medium")]
    pub tier_medium_max_spread: f64,
    #[serde(default = "default_likely_human_max")]
    pub likely_human_max: f64,
    #[serde(default = "default_likely_machine_min")]
    pub likely_machine_min: f64,
    #[serde(default = "default_timeout_ms")]
    pub detector_timeout_ms: u64,
    #[serde(default = "default_parallelism")]
    pub batch_parallelism: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexicon_path: Option<PathBuf>,
}

fn default_min_words() -> usize { 50 }
fn default_diversity_window() -> usize { 50 }
fn default_attribution_margin() -> f64 { 0.10 }
fn default_attribution_min_score() -> f64 { 0.05 }
fn default_sentence_threshold() -> f64 { 0.60 }
fn default_section_min_words() -> usize { 20 }
fn default_tier_high() -> f64 { 0.20 }
fn default_tier_medium() -> f64 { 0.50 }
fn default_likely_human_max() -> f64 { 0.35 }
fn default_likely_machine_min() -> f64 { 0.65 }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_parallelism() -> usize { 4 }

/// Two usable signals are the least the consensus will score.
pub const MIN_SIGNALS: usize = 2;

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_words: default_min_words(),
            diversity_window: default_diversity_window(),
            attribution_margin: default_attribution_margin(),
            attribution_min_score: default_attribution_min_score(),
            sentence_threshold: default_sentence_threshold(),
            section_min_words: default_section_min_words(),
            tier_high_max_spread: default_tier_high(),
            tier_medium_max_spread: default_tier_medium(),
            likely_human_max: default_likely_human_max(),
            likely_machine_min: default_likely_machine_min(),
            detector_timeout_ms: default_timeout_ms(),
            batch_parallelism: default_parallelism(),
            lexicon_path: None,
        }
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must lie in [0, 1], got {}", value)))
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_words == 0 {
            return Err(ConfigError::invalid("minWords", "must be at least 1"));
        }
        if self.diversity_window < 2 {
            return Err(ConfigError::invalid("diversityWindow", "must be at least 2 tokens"));
        }
        check_unit("attributionMargin", self.attribution_margin)?;
        check_unit("attributionMinScore", self.attribution_min_score)?;
        check_unit("sentenceThreshold", self.sentence_threshold)?;
        check_unit("tierHighMaxSpread", self.tier_high_max_spread)?;
        check_unit("tierMediumMaxSpread", self.tier_medium_max_spread)?;
        check_unit("likelyHumanMax", self.likely_human_max)?;
        check_unit("likelyMachineMin", self.likely_machine_min)?;
        if self.tier_high_max_spread > self.tier_medium_max_spread {
            return Err(ConfigError::invalid(
                "tierHighMaxSpread",
                "must not exceed tierMediumMaxSpread",
            ));
        }
        if self.likely_human_max >= self.likely_machine_min {
            return Err(ConfigError::invalid(
                "likelyHumanMax",
                "must be below likelyMachineMin",
            ));
        }
        if self.detector_timeout_ms == 0 {
            return Err(ConfigError::invalid("detectorTimeoutMs", "must be positive"));
        }
        if self.batch_parallelism == 0 {
            return Err(ConfigError::invalid("batchParallelism", "must be at least 1"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> ThresholdsUsed {
        ThresholdsUsed {
            tier_high_max_spread: self.tier_high_max_spread,
            tier_medium_max_spread: self.tier_medium_max_spread,
            attribution_margin: self.attribution_margin,
            attribution_min_score: self.attribution_min_score,
            sentence_threshold: self.sentence_threshold,
            likely_human_max: self.likely_human_max,
            likely_machine_min: self.likely_machine_min,
            min_words: self.min_words,
            min_signals: MIN_SIGNALS,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a config file at an explicit path.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cheekAI-provenance"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    fn io_error(path: &Path, source: std::io::Error) -> ConfigError {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Ensure config directory exists
    pub fn ensure_dir(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.config_dir).map_err(|e| Self::io_error(&self.config_dir, e))
    }

    /// Load configuration; a missing file yields the defaults.
    pub fn load(&self) -> Result<AnalyzerConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AnalyzerConfig::default());
        }
        AnalyzerConfig::load_file(&self.config_file)
    }

    /// Validate, back up the previous file, then write.
    pub fn save(&self, config: &AnalyzerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.ensure_dir()?;

        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, content).map_err(|e| Self::io_error(&self.config_file, e))
    }

    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir).map_err(|e| Self::io_error(&backup_dir, e))?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));

        fs::copy(&self.config_file, &backup_file).map_err(|e| Self::io_error(&backup_file, e))?;

        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)
            .map_err(|e| Self::io_error(backup_dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        // Timestamped names sort chronologically
        entries.sort_by_key(|e| e.file_name());

        for entry in entries.iter().take(entries.len() - keep) {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!("[CONFIG] Failed to remove old backup {:?}: {}", entry.path(), e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cheekai-provenance-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.min_words, 50);
        assert_eq!(config.attribution_margin, 0.10);
        assert_eq!(config.sentence_threshold, 0.60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AnalyzerConfig::from_json_str(r#"{"minWords": 80}"#).unwrap();
        assert_eq!(config.min_words, 80);
        assert_eq!(config.batch_parallelism, 4);
        assert_eq!(config.detector_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let err = AnalyzerConfig::from_json_str(r#"{"attributionMargin": 1.5}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = AnalyzerConfig::from_json_str(r#"{"likelyHumanMax": 0.7}"#).unwrap_err();
        assert!(err.to_string().contains("likelyHumanMax"));

        let err = AnalyzerConfig::from_json_str(r#"{"tierHighMaxSpread": 0.6}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_store_round_trip_with_backups() {
        let dir = temp_dir("store");
        let store = ConfigStore::new(dir.clone());
        assert_eq!(store.load().unwrap(), AnalyzerConfig::default());

        let mut config = AnalyzerConfig::default();
        for i in 0..13 {
            config.min_words = 60 + i;
            store.save(&config).unwrap();
        }
        assert_eq!(store.load().unwrap().min_words, 72);

        let backups = fs::read_dir(dir.join("backups")).unwrap().count();
        assert!(backups <= 10, "kept {} backups", backups);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_save_rejects_invalid() {
        let dir = temp_dir("invalid");
        let store = ConfigStore::new(dir.clone());
        let config = AnalyzerConfig {
            batch_parallelism: 0,
            ..AnalyzerConfig::default()
        };
        assert!(store.save(&config).is_err());
        assert!(!store.config_file().exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
