use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::concat::GapPolicy;
use super::error::ConfigError;

/// Structure representing the tool configuration. Contains pathing and
/// worker information. Configs are serializable and deserializable to
/// YAML using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory tree scanned recursively for .ats recordings.
    pub ats_path: PathBuf,
    /// Survey root created (import) or opened (ls).
    pub survey_path: PathBuf,
    /// Station name override; when unset, each channel's site name from
    /// the header comments decides, falling back to the serial number.
    pub station: Option<String>,
    /// Output directory for concatenated recordings.
    pub cat_path: Option<PathBuf>,
    /// Continue over overlapping recordings instead of failing the group.
    pub clamp_overlap: bool,
    pub n_threads: i32,
}

impl Default for Config {
    /// Generate a new Config object. All fields will be empty/invalid
    fn default() -> Self {
        Self {
            ats_path: PathBuf::from("None"),
            survey_path: PathBuf::from("None"),
            station: None,
            cat_path: None,
            clamp_overlap: false,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_cat_path(&self) -> bool {
        self.cat_path.is_some()
    }

    pub fn gap_policy(&self) -> GapPolicy {
        if self.clamp_overlap {
            GapPolicy::ClampToZero
        } else {
            GapPolicy::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config {
            ats_path: PathBuf::from("/data/field"),
            survey_path: PathBuf::from("/data/survey"),
            station: Some("north".to_string()),
            cat_path: None,
            clamp_overlap: true,
            n_threads: 4,
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.ats_path, config.ats_path);
        assert_eq!(back.station, config.station);
        assert!(back.clamp_overlap);
        assert_eq!(back.n_threads, 4);
    }

    #[test]
    fn test_gap_policy() {
        let mut config = Config::default();
        assert_eq!(config.gap_policy(), GapPolicy::Reject);
        config.clamp_overlap = true;
        assert_eq!(config.gap_policy(), GapPolicy::ClampToZero);
    }
}
