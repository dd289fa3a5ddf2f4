//! Engine configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use purse_core::{RecordLayout, MAX_BALANCE};

use crate::error::{Result, TransactionError};
use crate::params::{DEFAULT_DEBIT_AMOUNT, DEFAULT_INITIAL_AMOUNT};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Account record layout used on every token
    pub layout: RecordLayout,

    /// Balance written by setup, in cents
    pub initial_amount: u32,

    /// Amount removed by each debit, in cents
    pub debit_amount: u32,

    /// Read-compare-rewrite iterations after an uncertain write
    pub reconcile_attempts: usize,

    /// Header rewrites attempted after recovering a dual record
    pub repair_attempts: usize,

    /// Reconcile after every debit, not only after failed writes
    pub verify_after_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: RecordLayout::Signed,
            initial_amount: DEFAULT_INITIAL_AMOUNT,
            debit_amount: DEFAULT_DEBIT_AMOUNT,
            reconcile_attempts: 8,
            repair_attempts: 3,
            verify_after_write: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile_attempts == 0 || self.repair_attempts == 0 {
            return Err(TransactionError::Config(
                "retry bounds must be at least 1".to_string(),
            ));
        }
        if self.initial_amount > MAX_BALANCE || self.debit_amount > MAX_BALANCE {
            return Err(TransactionError::Config(format!(
                "amounts must not exceed {}",
                MAX_BALANCE
            )));
        }
        Ok(())
    }
}
