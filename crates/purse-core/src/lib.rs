//! Purse Core - Shared types, account record formats, and SHA device primitives
//!
//! This crate provides the foundational pieces of the Purse debit system:
//! the 32-byte account record codec for both record layouts, the page-seeded
//! CRC16, the SHA device function model used to compute MACs and secrets, and
//! the collaborator interfaces for coprocessors and user tokens.

pub mod account;
pub mod crc16;
pub mod error;
pub mod identity;
pub mod service;
pub mod sha;
pub mod token;
pub mod types;

pub use account::{
    decode_signed, decode_unsigned_dual, encode_signed, encode_unsigned_dual, signed_preimage,
    AccountRecord, DualView, RecordLayout, RecordSlot, SignedView, SigningContext, MAX_BALANCE,
    RECORD_LEN,
};
pub use crc16::{crc16, CRC16_RESIDUE};
pub use error::{Error, Result};
pub use identity::{BindMaterial, CoprocessorIdentity, SECRET_SLOTS};
pub use service::ServiceInfo;
pub use sha::{ShaCommand, ShaContext};
pub use token::{AuthenticatedRead, MemoryToken, TokenFamily, UserToken, WriteFault};
pub use types::{
    BindCode, BindData, Challenge, FullBindCode, Mac, Scratchpad, Secret, TokenAddress,
};

/// Size of a challenge in bytes
pub const CHALLENGE_LEN: usize = 3;

/// Random bytes a challenge is drawn from
pub const CHALLENGE_SOURCE_LEN: usize = 20;
