//! Configuration validation

use super::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration sections
///
/// # Example
/// ```rust,ignore
/// fn build_client<C: Validatable>(config: &C) -> Result<Client, ConfigError> {
///     config.validate()?;
///     // ... build client
/// }
/// ```
pub trait Validatable {
    /// Returns `Ok(())` if valid, `Err(ConfigError)` with details if invalid.
    fn validate(&self) -> ConfigResult<()>;

    /// Section name used as the field prefix in error messages
    fn config_name(&self) -> &'static str {
        "config"
    }
}

impl<T: Validatable> Validatable for Option<T> {
    fn validate(&self) -> ConfigResult<()> {
        match self {
            Some(config) => config.validate(),
            None => Ok(()),
        }
    }
}

/// Inclusive range check producing `ConfigError::Range`
pub(crate) fn check_range<T>(
    section: &str,
    field: &str,
    value: T,
    min: T,
    max: T,
    hint: &str,
) -> ConfigResult<()>
where
    T: PartialOrd + ToString,
{
    if value < min || value > max {
        return Err(ConfigError::range_with_hint(
            format!("{}.{}", section, field),
            value,
            min,
            max,
            hint,
        ));
    }
    Ok(())
}

/// Non-blank check producing `ConfigError::Required`
pub(crate) fn check_required(section: &str, field: &str, value: &str, hint: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::required(format!("{}.{}", section, field), hint));
    }
    Ok(())
}
