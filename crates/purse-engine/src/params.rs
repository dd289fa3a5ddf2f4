//! Transaction parameters

use serde::{Deserialize, Serialize};

use purse_core::MAX_BALANCE;

use crate::error::{Result, TransactionError};

pub const DEFAULT_DEBIT_AMOUNT: u32 = 50;
pub const DEFAULT_INITIAL_AMOUNT: u32 = 10_000;

/// Named engine parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Amount removed by each debit, in cents
    DebitAmount,
    /// Balance written by setup, in cents
    InitialAmount,
    /// Balance last read from or confirmed on the token; read-only
    UserBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionParams {
    pub debit_amount: u32,
    pub initial_amount: u32,
    pub user_balance: u32,
}

impl Default for TransactionParams {
    fn default() -> Self {
        Self {
            debit_amount: DEFAULT_DEBIT_AMOUNT,
            initial_amount: DEFAULT_INITIAL_AMOUNT,
            user_balance: 0,
        }
    }
}

impl TransactionParams {
    pub fn get(&self, parameter: Parameter) -> u32 {
        match parameter {
            Parameter::DebitAmount => self.debit_amount,
            Parameter::InitialAmount => self.initial_amount,
            Parameter::UserBalance => self.user_balance,
        }
    }

    pub fn set(&mut self, parameter: Parameter, value: u32) -> Result<()> {
        if value > MAX_BALANCE {
            return Err(TransactionError::InvalidParameter(format!(
                "{:?} value {} exceeds {}",
                parameter, value, MAX_BALANCE
            )));
        }
        match parameter {
            Parameter::DebitAmount => self.debit_amount = value,
            Parameter::InitialAmount => self.initial_amount = value,
            Parameter::UserBalance => {
                return Err(TransactionError::InvalidParameter(
                    "user balance is read-only".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = TransactionParams::default();
        assert_eq!(params.get(Parameter::DebitAmount), 50);
        assert_eq!(params.get(Parameter::InitialAmount), 10_000);
        assert_eq!(params.get(Parameter::UserBalance), 0);
    }

    #[test]
    fn test_user_balance_read_only() {
        let mut params = TransactionParams::default();
        assert!(params.set(Parameter::UserBalance, 5).is_err());
        assert_eq!(params.user_balance, 0);
    }

    #[test]
    fn test_set_and_reset() {
        let mut params = TransactionParams::default();
        params.set(Parameter::DebitAmount, 125).unwrap();
        assert!(params.set(Parameter::InitialAmount, MAX_BALANCE + 1).is_err());
        assert_eq!(params.debit_amount, 125);
        params.reset();
        assert_eq!(params, TransactionParams::default());
    }
}
