//! The pre-parsed installation configuration (`spec.md` §6.4) and the
//! `model -> feature bitset` selection `Installation::new` consumes.
//! Parsing an operator-facing file format (INI/TOML/whatever) into this
//! shape is out of the core's scope per `spec.md` §1; this crate only
//! defines the shape and derives `serde::Deserialize` so an external
//! layer has something concrete to produce.

use cdc_core::{ModelFeatures, ModelType};
use serde::Deserialize;

/// Mirrors `spec.md` §4.1's model list. Kept separate from
/// `cdc_core::ModelType` so this crate is the only one that needs a
/// `serde` dependency on the model type; `to_model_type` is the single
/// translation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ModelName {
    #[serde(rename = "6400")]
    Model6400,
    #[serde(rename = "73")]
    Cyber73,
    #[serde(rename = "173")]
    Cyber173,
    #[serde(rename = "175")]
    Cyber175,
    #[serde(rename = "840A")]
    Cyber840A,
    #[serde(rename = "865")]
    Cyber865,
}

impl ModelName {
    #[must_use]
    pub const fn to_model_type(self) -> ModelType {
        match self {
            Self::Model6400 => ModelType::Model6400,
            Self::Cyber73 => ModelType::Cyber73,
            Self::Cyber173 => ModelType::Cyber173,
            Self::Cyber175 => ModelType::Cyber175,
            Self::Cyber840A => ModelType::Cyber840A,
            Self::Cyber865 => ModelType::Cyber865,
        }
    }
}

/// One entry of the equipment list: `(channel, eqNo, unit, devType, deviceName)`.
#[derive(Debug, Clone, Deserialize)]
pub struct Equipment {
    pub channel: u8,
    pub eq_no: u8,
    pub unit: u8,
    pub dev_type: String,
    pub device_name: String,
}

/// The pre-parsed installation configuration (`spec.md` §6.4).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub model: ModelName,
    pub cpus: u8,
    pub mainframes: u32,
    pub pp_count: u8,
    pub cm_words: u32,
    pub ecs_words: u32,
    pub clock_increment_per_tick: u64,
    pub cpu_frequency_mhz: u32,
    pub deadstart_sequence: Vec<u16>,
    #[serde(default)]
    pub equipment: Vec<Equipment>,
    pub persist_dir: Option<String>,
}

/// Fatal configuration errors (`spec.md` §7 "impossible configuration"),
/// surfaced from `Installation::new` before any memory is allocated.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cpus must be 1 or 2, got {0}")]
    InvalidCpuCount(u8),
    #[error("mainframes must be at least 1, got {0}")]
    InvalidMainframeCount(u32),
    #[error("ppCount must be one of 10, 12, 20, 24, got {0}")]
    InvalidPpCount(u8),
    #[error("cmWords must be nonzero")]
    EmptyCentralMemory,
    #[error("deadstart sequence is empty")]
    EmptyDeadstartSequence,
}

impl Config {
    /// Validate the shape invariants `spec.md` §6.4 implies (legal
    /// enumerations, nonzero memory); does not touch the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cpus != 1 && self.cpus != 2 {
            return Err(ConfigError::InvalidCpuCount(self.cpus));
        }
        if self.mainframes == 0 {
            return Err(ConfigError::InvalidMainframeCount(self.mainframes));
        }
        if !matches!(self.pp_count, 10 | 12 | 20 | 24) {
            return Err(ConfigError::InvalidPpCount(self.pp_count));
        }
        if self.cm_words == 0 {
            return Err(ConfigError::EmptyCentralMemory);
        }
        if self.deadstart_sequence.is_empty() {
            return Err(ConfigError::EmptyDeadstartSequence);
        }
        Ok(())
    }

    /// The feature bitset `model` selects, computed once (`spec.md`
    /// §6.4 "Selection of the feature bitset from model is done once at
    /// init").
    #[must_use]
    pub fn features(&self) -> ModelFeatures {
        self.model.to_model_type().features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            model: ModelName::Model6400,
            cpus: 1,
            mainframes: 1,
            pp_count: 10,
            cm_words: 32 * 1024,
            ecs_words: 0,
            clock_increment_per_tick: 1,
            cpu_frequency_mhz: 10,
            deadstart_sequence: vec![0o7433, 0o7432, 0o7431, 0o7430, 0],
            equipment: Vec::new(),
            persist_dir: None,
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_unsupported_pp_count() {
        let mut cfg = valid_config();
        cfg.pp_count = 16;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidPpCount(16))));
    }

    #[test]
    fn rejects_three_cpus() {
        let mut cfg = valid_config();
        cfg.cpus = 3;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCpuCount(3))));
    }

    #[test]
    fn model_selects_matching_feature_bitset() {
        let mut cfg = valid_config();
        cfg.model = ModelName::Cyber175;
        assert!(cfg.features().contains(ModelFeatures::HAS_ISTACK_PREFETCH));
    }
}
