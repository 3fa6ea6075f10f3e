// ⚙️ Configuration - curator.toml, passed explicitly into every engine
//
// Example:
//
// [fuzzy]
// enabled = true
// threshold = 70.0
//
// [ledger]
// first_sequence_base = 100
//
// [persist]
// archive = true
// audit = true

use crate::error::{CuratorError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CuratorConfig {
    pub fuzzy: FuzzyConfig,
    pub ledger: LedgerConfig,
    pub persist: PersistConfig,
}

impl CuratorConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CuratorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file means all defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(CuratorConfig::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.fuzzy.validate()
    }
}

// ---------------------------------------------------------------------------
// Fuzzy matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzyConfig {
    /// Run the fuzzy fallback at all
    pub enabled: bool,

    /// Minimum score (0-100) for a fuzzy candidate to be accepted
    pub threshold: f64,

    /// Warn when several candidates share the best score
    pub warn_on_ties: bool,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        FuzzyConfig {
            enabled: true,
            threshold: 70.0,
            warn_on_ties: true,
        }
    }
}

impl FuzzyConfig {
    pub fn with_threshold(threshold: f64) -> Self {
        FuzzyConfig {
            threshold,
            ..FuzzyConfig::default()
        }
    }

    pub fn disabled() -> Self {
        FuzzyConfig {
            enabled: false,
            ..FuzzyConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(CuratorError::ThresholdOutOfRange(self.threshold));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Sequence ids start right after this value in an empty ledger
    pub first_sequence_base: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            first_sequence_base: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistConfig {
    /// Copy a timestamped snapshot into archive/ after every commit
    pub archive: bool,

    /// Record decisions in audit.db
    pub audit: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        PersistConfig {
            archive: true,
            audit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CuratorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CuratorConfig::default());
        assert!(config.fuzzy.enabled);
        assert_eq!(config.fuzzy.threshold, 70.0);
        assert_eq!(config.ledger.first_sequence_base, 100);
    }

    #[test]
    fn test_partial_override() {
        let config = CuratorConfig::from_toml_str(
            r#"
            [fuzzy]
            threshold = 65.0

            [persist]
            archive = false
            "#,
        )
        .unwrap();
        assert_eq!(config.fuzzy.threshold, 65.0);
        assert!(config.fuzzy.enabled);
        assert!(!config.persist.archive);
        assert!(config.persist.audit);
    }

    #[test]
    fn test_threshold_out_of_range_fails_fast() {
        let err = CuratorConfig::from_toml_str("[fuzzy]\nthreshold = 140.0\n").unwrap_err();
        assert!(matches!(err, CuratorError::ThresholdOutOfRange(t) if t == 140.0));
        assert!(err.is_configuration());

        assert!(FuzzyConfig::with_threshold(-1.0).validate().is_err());
        assert!(FuzzyConfig::with_threshold(f64::NAN).validate().is_err());
        assert!(FuzzyConfig::with_threshold(0.0).validate().is_ok());
        assert!(FuzzyConfig::with_threshold(100.0).validate().is_ok());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = CuratorConfig::from_toml_str("[fuzzy]\ntreshold = 70.0\n").unwrap_err();
        assert!(matches!(err, CuratorError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CuratorConfig::load(dir.path().join("curator.toml")).unwrap();
        assert_eq!(config, CuratorConfig::default());
    }
}
