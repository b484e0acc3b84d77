//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, LOG_LEVELS};

/// Dirty-op thresholds above this delay persistence enough to warn about.
const HIGH_WRITE_THRESHOLD: u32 = 100;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error, if any, into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(first) => Err(ConfigError::invalid(first.path, first.message)),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        let store = &config.store;

        if store.max_ops_before_write == 0 {
            result.add_error(ValidationError::new(
                "store.max_ops_before_write",
                "max_ops_before_write must be at least 1",
            ));
        } else if store.max_ops_before_write > HIGH_WRITE_THRESHOLD {
            result.add_warning(ValidationWarning::new(
                "store.max_ops_before_write",
                format!(
                    "max_ops_before_write is very high (>{}), a crash may lose many mutations",
                    HIGH_WRITE_THRESHOLD
                ),
            ));
        }

        if store.per_user_range == 0 {
            result.add_error(ValidationError::new(
                "store.per_user_range",
                "per_user_range must be greater than 0",
            ));
        }

        if store.file_name.trim().is_empty() {
            result.add_error(ValidationError::new(
                "store.file_name",
                "file_name cannot be empty",
            ));
        } else if store.file_name.contains('/') || store.file_name.contains('\\') {
            result.add_error(ValidationError::new(
                "store.file_name",
                "file_name must not contain path separators",
            ));
        }

        if store.data_dir.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "store.data_dir",
                "data_dir cannot be empty",
            ));
        } else if store.data_dir.is_relative() {
            result.add_warning(ValidationWarning::new(
                "store.data_dir",
                format!("data_dir {:?} is relative to the working directory", store.data_dir),
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, LOG_LEVELS
                ),
            ));
        }

        if config.logging.max_log_files == 0 {
            result.add_error(ValidationError::new(
                "logging.max_log_files",
                "max_log_files must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
