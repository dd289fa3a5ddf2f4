//! Purse Coprocessor - Backends for the coprocessor identity
//!
//! Two implementations of [`purse_core::CoprocessorIdentity`] share one
//! protocol: [`EmulatedCoprocessor`] runs the SHA device model in memory, and
//! [`HardwareCoprocessor`] drives a [`ShaDevice`] command set. The
//! [`CoprocessorConfig`] file provisions an emulator from TOML.

pub mod config;
pub mod emulator;
pub mod error;
pub mod hardware;

pub use config::CoprocessorConfig;
pub use emulator::EmulatedCoprocessor;
pub use error::{CoprError, Result};
pub use hardware::{HardwareCoprocessor, LoopbackDevice, ShaDevice};
