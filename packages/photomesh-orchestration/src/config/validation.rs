//! Validation trait for configuration sections

use super::error::ConfigResult;

/// Configuration validation trait
///
/// All configuration sections implement this trait to provide
/// consistent validation behavior.
pub trait Validatable {
    /// Validate the configuration
    ///
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Get the configuration name for error messages
    fn config_name(&self) -> &'static str {
        "Config"
    }
}

/// Check `min <= value <= max`, producing a range error with `hint` otherwise
pub(crate) fn check_range<T>(field: &str, value: T, min: T, max: T, hint: &str) -> ConfigResult<()>
where
    T: PartialOrd + ToString + Copy,
{
    if !(value >= min && value <= max) {
        return Err(super::error::ConfigError::range_with_hint(
            field, value, min, max, hint,
        ));
    }
    Ok(())
}
