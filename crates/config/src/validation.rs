use crate::ConfigResult;

/// Trait for configuration validation
pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    /// Validate that a string is not empty
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// Validate that a count stays within a sane upper bound (zero allowed)
    pub fn validate_max_count(count: usize, max: usize, field_name: &str) -> ConfigResult<()> {
        if count > max {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    /// Validate that a value is strictly positive
    pub fn validate_positive(value: u64, field_name: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    /// Validate that an address has host:port form
    pub fn validate_socket_address(address: &str, field_name: &str) -> ConfigResult<()> {
        if address.parse::<std::net::SocketAddr>().is_err() {
            return Err(crate::ConfigError::Validation(format!(
                "{field_name} must be a valid socket address, got '{address}'"
            )));
        }
        Ok(())
    }
}
