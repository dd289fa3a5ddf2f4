//! Purse Engine - Debit transactions against authenticated user tokens
//!
//! The [`TransactionEngine`] authenticates a user token through a shared
//! coprocessor, verifies its account record, and debits it. Writes whose
//! outcome is uncertain are settled by the [`Reconciler`].

pub mod config;
pub mod engine;
pub mod error;
pub mod params;
pub mod reconciler;

pub use config::EngineConfig;
pub use engine::{AccountSnapshot, EngineState, TransactionEngine};
pub use error::{ErrorKind, Result, TransactionError};
pub use params::{Parameter, TransactionParams, DEFAULT_DEBIT_AMOUNT, DEFAULT_INITIAL_AMOUNT};
pub use reconciler::{ReconcileTarget, Reconciler};
