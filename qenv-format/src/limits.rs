//! Reader limits and configuration

use crate::error::{QenvError, Result};
use serde::{Deserialize, Serialize};

/// Limits guarding the reader against hostile or runaway responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum container nesting depth (default: 64, hard: 512)
    pub max_depth: usize,
    /// Maximum decoded length of a single string or object key (default: 16 MiB, hard: 256 MiB)
    pub max_string_len: usize,
    /// Maximum warnings or errors collected per section (default: 1,024, hard: 65,536)
    pub max_diagnostics: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_string_len: 16 * 1024 * 1024,
            max_diagnostics: 1_024,
        }
    }
}

impl Limits {
    /// Hard maximum limits that cannot be exceeded
    pub fn hard_maximums() -> Self {
        Self {
            max_depth: 512,
            max_string_len: 256 * 1024 * 1024,
            max_diagnostics: 65_536,
        }
    }

    /// Validate limits against hard maximums
    pub fn validate(&self) -> Result<()> {
        let hard = Self::hard_maximums();

        if self.max_depth == 0 || self.max_depth > hard.max_depth {
            return Err(QenvError::InvalidConfig(format!(
                "max_depth {} must be between 1 and {}",
                self.max_depth, hard.max_depth
            )));
        }

        if self.max_string_len > hard.max_string_len {
            return Err(QenvError::InvalidConfig(format!(
                "max_string_len {} exceeds hard limit {}",
                self.max_string_len, hard.max_string_len
            )));
        }

        if self.max_diagnostics > hard.max_diagnostics {
            return Err(QenvError::InvalidConfig(format!(
                "max_diagnostics {} exceeds hard limit {}",
                self.max_diagnostics, hard.max_diagnostics
            )));
        }

        Ok(())
    }
}
