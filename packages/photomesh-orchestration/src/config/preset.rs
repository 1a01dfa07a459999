//! Preset configurations
//!
//! Presets provide complete default configurations for common use cases.

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, ConfigResult};

/// Configuration preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Instant stages (time scale 0), for smoke tests and demos
    Quick,

    /// Stage durations as modelled (time scale 1), tens of minutes per run
    #[default]
    Realistic,
}

impl Preset {
    /// Multiplier applied to every synthetic stage duration
    pub fn time_scale(&self) -> f64 {
        match self {
            Self::Quick => 0.0,
            Self::Realistic => 1.0,
        }
    }

    /// Parse preset from string
    pub fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "quick" => Ok(Self::Quick),
            "realistic" => Ok(Self::Realistic),
            _ => Err(ConfigError::UnknownPreset(s.to_string())),
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Realistic => "realistic",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_parsing() {
        assert_eq!(Preset::from_str("quick").unwrap(), Preset::Quick);
        assert_eq!(Preset::from_str("REALISTIC").unwrap(), Preset::Realistic);
        assert!(matches!(
            Preset::from_str("turbo"),
            Err(ConfigError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_time_scale() {
        assert_eq!(Preset::Quick.time_scale(), 0.0);
        assert_eq!(Preset::Realistic.time_scale(), 1.0);
        assert_eq!(Preset::default(), Preset::Realistic);
    }
}
