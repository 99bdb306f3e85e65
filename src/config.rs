use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::hash::HashAlgorithm;
use crate::core::psi::PsiVariant;

/// Largest accepted fingerprint side, in bits.
pub const MAX_HASH_SIZE: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Tunables for deduplication and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Only segments whose xpath starts with this prefix are deduplicated.
    pub document_prefix: String,
    /// Maximum fraction of padding pixels allowed to differ from the dominant color.
    pub allowed_deviation: f64,
    /// Color quantization step used when measuring padding flatness.
    pub color_bin: u8,
    pub hash_algorithm: HashAlgorithm,
    /// Run a DCT over the input before hashing; with `median` this is a pHash.
    pub hash_dct: bool,
    pub hash_size: u32,
    /// Hamming distance below which two fingerprints count as similar.
    pub similarity_threshold: u32,
    pub psi_variant: PsiVariant,
    /// Depth of the tag multisets used for structural distance.
    pub tag_depth: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            document_prefix: "//html".to_string(),
            allowed_deviation: 0.075,
            color_bin: 1,
            hash_algorithm: HashAlgorithm::Median,
            hash_dct: true,
            hash_size: 8,
            similarity_threshold: 5,
            psi_variant: PsiVariant::Sum,
            tag_depth: 3,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/visca/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("visca").join("config.json"))
    }

    /// Resolve the config: an explicit file must exist; otherwise the default
    /// location is used when present, else the built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config file {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.allowed_deviation) {
            return Err(ConfigError::InvalidValue {
                field: "allowed_deviation",
                message: format!("{} is outside 0.0..=1.0", self.allowed_deviation),
            });
        }
        if self.color_bin == 0 {
            return Err(ConfigError::InvalidValue {
                field: "color_bin",
                message: "must be at least 1".to_string(),
            });
        }
        if !(1..=MAX_HASH_SIZE).contains(&self.hash_size) {
            return Err(ConfigError::InvalidValue {
                field: "hash_size",
                message: format!("{} is outside 1..={}", self.hash_size, MAX_HASH_SIZE),
            });
        }
        if self.tag_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tag_depth",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.document_prefix, "//html");
        assert_eq!(config.allowed_deviation, 0.075);
        assert_eq!(config.psi_variant, PsiVariant::Sum);
        assert_eq!(config.tag_depth, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"allowed_deviation": 0.15, "psi_variant": "average", "hash_algorithm": "gradient"}"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.allowed_deviation, 0.15);
        assert_eq!(config.psi_variant, PsiVariant::Average);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Gradient);
        assert_eq!(config.document_prefix, "//html");
        assert_eq!(config.hash_size, 8);
    }

    #[test]
    fn test_out_of_range_deviation_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"allowed_deviation": 1.5}"#).unwrap();

        let result = PipelineConfig::from_file(&path);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "allowed_deviation",
                ..
            })
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = PipelineConfig::load(Some(&temp_dir.path().join("nope.json")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ tag_depth: 3 }").unwrap();

        let result = PipelineConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_hash_size_is_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"hash_size": 100000}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(ConfigError::InvalidValue {
                field: "hash_size",
                ..
            })
        ));

        for (size, ok) in [(0, false), (1, true), (64, true), (65, false)] {
            let config = PipelineConfig {
                hash_size: size,
                ..PipelineConfig::default()
            };
            assert_eq!(config.validate().is_ok(), ok, "hash_size {}", size);
        }
    }

    #[test]
    fn test_default_hash_is_median() {
        assert_eq!(PipelineConfig::default().hash_algorithm, HashAlgorithm::Median);
        assert!(PipelineConfig::default().hash_dct);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let config = PipelineConfig {
            tag_depth: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
