//! 32-byte account record codec
//!
//! Signed layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 1    | File length (29) |
//! | 1      | 1    | Data type code (0x01) |
//! | 2      | 20   | Signature |
//! | 22     | 2    | Conversion factor (0x8B 0x48) |
//! | 24     | 3    | Balance (LE) |
//! | 27     | 2    | Transaction ID (LE) |
//! | 29     | 1    | Continuation pointer |
//! | 30     | 2    | Inverted CRC16 over bytes 0..30 (LE) |
//!
//! UnsignedDual layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 1    | Pointer: 13 selects record A, 21 selects record B |
//! | 1      | 1    | Data type code (0x01) |
//! | 2      | 2    | Conversion factor (0x8B 0x48) |
//! | 4      | 4    | Reserved (zero) |
//! | 8      | 8    | Record A: balance[3] · txn[2] · continuation[1] · crc[2] |
//! | 16     | 8    | Record B, same shape |
//!
//! Each dual record's CRC covers the header, with its pointer byte set to
//! that record's own length, followed by the record's first six bytes.
//! Record B's CRC therefore never covers record A. Legacy writers that run
//! the CRC over every byte up to the pointed-at length fold record A into
//! record B's CRC; B records from those writers fail validation here.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crc16;
use crate::error::{Error, Result};
use crate::identity::CoprocessorIdentity;
use crate::types::{take, Challenge, Mac, Scratchpad, TokenAddress};

/// Size of an account record
pub const RECORD_LEN: usize = 32;

/// Data type code for static (monetary) account data
pub const DATA_TYPE_CODE: u8 = 0x01;

/// Conversion factor stored in every record
pub const CONVERSION_FACTOR: [u8; 2] = [0x8B, 0x48];

/// File length byte of a signed record
pub const SIGNED_FILE_LENGTH: u8 = 29;

/// Largest balance a 24-bit field can hold without reading back negative
pub const MAX_BALANCE: u32 = 0x7F_FFFF;

const SIGNATURE_OFFSET: usize = 2;
const SIGNED_CONVERSION_OFFSET: usize = 22;
const SIGNED_BALANCE_OFFSET: usize = 24;
const SIGNED_TXN_OFFSET: usize = 27;
const SIGNED_CONTINUATION_OFFSET: usize = 29;
const SIGNED_CRC_OFFSET: usize = 30;

const DUAL_HEADER_LEN: usize = 8;
const DUAL_RECORD_LEN: usize = 8;

/// Record encoding used by a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordLayout {
    /// Coprocessor-signed single record
    #[default]
    Signed,
    /// Signature-free A/B records with a header pointer
    UnsignedDual,
}

/// One of the two UnsignedDual records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordSlot {
    A,
    B,
}

impl RecordSlot {
    /// Header pointer value selecting this record
    pub fn file_length(self) -> u8 {
        match self {
            RecordSlot::A => 13,
            RecordSlot::B => 21,
        }
    }

    pub fn from_file_length(length: u8) -> Option<Self> {
        match length {
            13 => Some(RecordSlot::A),
            21 => Some(RecordSlot::B),
            _ => None,
        }
    }

    pub fn offset(self) -> usize {
        match self {
            RecordSlot::A => 8,
            RecordSlot::B => 16,
        }
    }

    pub fn other(self) -> Self {
        match self {
            RecordSlot::A => RecordSlot::B,
            RecordSlot::B => RecordSlot::A,
        }
    }
}

/// Raw 32-byte account record as stored on the token
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountRecord(pub [u8; RECORD_LEN]);

impl AccountRecord {
    pub fn new(bytes: [u8; RECORD_LEN]) -> Self {
        Self(bytes)
    }

    pub fn zeroed() -> Self {
        Self([0u8; RECORD_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; RECORD_LEN] {
        &self.0
    }

    pub fn file_length(&self) -> u8 {
        self.0[0]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountRecord({})", self.to_hex())
    }
}

impl AsRef<[u8]> for AccountRecord {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn encode_balance(balance: u32) -> Result<[u8; 3]> {
    if balance > MAX_BALANCE {
        return Err(Error::BalanceOutOfRange(balance));
    }
    let le = balance.to_le_bytes();
    Ok([le[0], le[1], le[2]])
}

/// Sign-extend a 24-bit little-endian field; negative values are rejected
fn decode_balance(bytes: [u8; 3]) -> Result<u32> {
    let raw = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]);
    let value = (raw << 8) >> 8;
    if value < 0 {
        return Err(Error::NegativeBalance(value));
    }
    Ok(value as u32)
}

fn page_seed(page: u8) -> u16 {
    u16::from(page)
}

// ---------------------------------------------------------------------------
// Signed layout
// ---------------------------------------------------------------------------

/// Token context folded into the signing scratchpad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningContext {
    pub address: TokenAddress,
    pub page: u8,
    /// Counter value the signature is bound to, if the page has one
    pub write_counter: Option<u32>,
}

impl SigningContext {
    /// Scratchpad: counter[8..12] · page[12] · address[13..20] · challenge[20..23]
    pub fn scratchpad(&self, challenge: &Challenge) -> Scratchpad {
        let mut pad = Scratchpad::erased();
        pad.set_write_counter(self.write_counter);
        pad.0[12] = self.page;
        pad.0[13..20].copy_from_slice(&self.address.serial7());
        pad.set_challenge(challenge);
        pad
    }
}

/// Fields extracted from a signed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedView {
    pub balance: u32,
    pub transaction_id: u16,
    pub signature: Mac,
}

/// Record bytes the signature was computed over
///
/// The signature field holds the service's initial signature and the CRC
/// field is zero.
pub fn signed_preimage(record: &AccountRecord, initial_signature: &Mac) -> [u8; RECORD_LEN] {
    let mut page = record.0;
    page[SIGNATURE_OFFSET..SIGNATURE_OFFSET + Mac::LEN].copy_from_slice(initial_signature.as_bytes());
    page[SIGNED_CRC_OFFSET..].fill(0);
    page
}

/// Build and sign a record for `balance`
pub fn encode_signed(
    balance: u32,
    transaction_id: u16,
    context: &SigningContext,
    copr: &dyn CoprocessorIdentity,
) -> Result<AccountRecord> {
    let service = copr.service();
    let mut page = [0u8; RECORD_LEN];
    page[0] = SIGNED_FILE_LENGTH;
    page[1] = DATA_TYPE_CODE;
    page[SIGNATURE_OFFSET..SIGNATURE_OFFSET + Mac::LEN]
        .copy_from_slice(service.initial_signature.as_bytes());
    page[SIGNED_CONVERSION_OFFSET..SIGNED_CONVERSION_OFFSET + 2].copy_from_slice(&CONVERSION_FACTOR);
    page[SIGNED_BALANCE_OFFSET..SIGNED_BALANCE_OFFSET + 3].copy_from_slice(&encode_balance(balance)?);
    page[SIGNED_TXN_OFFSET..SIGNED_TXN_OFFSET + 2].copy_from_slice(&transaction_id.to_le_bytes());
    page[SIGNED_CONTINUATION_OFFSET] = 0x00;

    let scratchpad = context.scratchpad(&service.signing_challenge);
    let mac = copr.sign(&page, &scratchpad)?;
    page[SIGNATURE_OFFSET..SIGNATURE_OFFSET + Mac::LEN].copy_from_slice(mac.as_bytes());

    let crc = crc16::stored_crc(page_seed(context.page), &page[..SIGNED_CRC_OFFSET]);
    page[SIGNED_CRC_OFFSET..].copy_from_slice(&crc);

    debug!(balance, transaction_id, record = %hex::encode(page), "Encoded signed record");
    Ok(AccountRecord(page))
}

/// Extract the fields of a signed record
///
/// Checks the fixed fields and the page-seeded CRC; the signature itself is
/// checked by the coprocessor.
pub fn decode_signed(record: &AccountRecord, page: u8) -> Result<SignedView> {
    let bytes = &record.0;
    if bytes[0] != SIGNED_FILE_LENGTH {
        return Err(Error::InvalidRecord(format!(
            "signed record length byte {} (expected {})",
            bytes[0], SIGNED_FILE_LENGTH
        )));
    }
    if bytes[1] != DATA_TYPE_CODE {
        return Err(Error::InvalidRecord(format!("data type code 0x{:02x}", bytes[1])));
    }
    if !crc16::validates(page_seed(page), bytes) {
        return Err(Error::InvalidRecord("signed record CRC mismatch".to_string()));
    }

    let balance = decode_balance(take(bytes, SIGNED_BALANCE_OFFSET))?;
    let transaction_id = u16::from_le_bytes(take(bytes, SIGNED_TXN_OFFSET));
    Ok(SignedView {
        balance,
        transaction_id,
        signature: Mac(take(bytes, SIGNATURE_OFFSET)),
    })
}

// ---------------------------------------------------------------------------
// UnsignedDual layout
// ---------------------------------------------------------------------------

/// Result of decoding an UnsignedDual record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualView {
    /// Authoritative record
    pub slot: RecordSlot,
    pub balance: u32,
    pub transaction_id: u16,
    /// Header bytes on the token differ from `canonical`
    pub needs_repair: bool,
    /// Record with a canonical header pointing at `slot`
    pub canonical: AccountRecord,
}

fn canonical_header(slot: RecordSlot) -> [u8; DUAL_HEADER_LEN] {
    let mut header = [0u8; DUAL_HEADER_LEN];
    header[0] = slot.file_length();
    header[1] = DATA_TYPE_CODE;
    header[2..4].copy_from_slice(&CONVERSION_FACTOR);
    header
}

/// Header with the pointer set to `slot` followed by that slot's record
fn dual_crc_input(header: &[u8; DUAL_HEADER_LEN], slot: RecordSlot, bytes: &[u8; RECORD_LEN]) -> [u8; 16] {
    let mut buf = [0u8; DUAL_HEADER_LEN + DUAL_RECORD_LEN];
    buf[..DUAL_HEADER_LEN].copy_from_slice(header);
    buf[0] = slot.file_length();
    let off = slot.offset();
    buf[DUAL_HEADER_LEN..].copy_from_slice(&bytes[off..off + DUAL_RECORD_LEN]);
    buf
}

fn dual_slot_valid(header: &[u8; DUAL_HEADER_LEN], slot: RecordSlot, bytes: &[u8; RECORD_LEN], page: u8) -> bool {
    crc16::validates(page_seed(page), &dual_crc_input(header, slot, bytes))
}

/// Write `balance` into the record not currently selected
///
/// B is written unless the previous pointer selected B, in which case A is.
/// The untouched record keeps the last confirmed balance. The header, and
/// with it the pointer, is rewritten in full.
pub fn encode_unsigned_dual(
    previous: &AccountRecord,
    balance: u32,
    transaction_id: u16,
    page: u8,
) -> Result<(AccountRecord, RecordSlot)> {
    let slot = match RecordSlot::from_file_length(previous.file_length()) {
        Some(RecordSlot::B) => RecordSlot::A,
        _ => RecordSlot::B,
    };

    let mut bytes = previous.0;
    let header = canonical_header(slot);

    let off = slot.offset();
    bytes[off..off + 3].copy_from_slice(&encode_balance(balance)?);
    bytes[off + 3..off + 5].copy_from_slice(&transaction_id.to_le_bytes());
    bytes[off + 5] = 0x00;
    let crc = crc16::stored_crc(page_seed(page), &dual_crc_input(&header, slot, &bytes)[..14]);
    bytes[off + 6..off + 8].copy_from_slice(&crc);

    bytes[..DUAL_HEADER_LEN].copy_from_slice(&header);

    debug!(?slot, balance, transaction_id, record = %hex::encode(bytes), "Encoded dual record");
    Ok((AccountRecord(bytes), slot))
}

fn read_slot(bytes: &[u8; RECORD_LEN], slot: RecordSlot) -> Result<(u32, u16)> {
    let off = slot.offset();
    let balance = decode_balance(take(bytes, off))?;
    let transaction_id = u16::from_le_bytes(take(bytes, off + 3));
    Ok((balance, transaction_id))
}

/// Decode an UnsignedDual record, recovering from a damaged header
///
/// The record the header claims is used when its CRC validates. Otherwise
/// both records are tested against a canonical header: when both validate A
/// wins, when one validates it wins, and when neither does the record is
/// rejected.
pub fn decode_unsigned_dual(record: &AccountRecord, page: u8) -> Result<DualView> {
    let bytes = &record.0;
    let header: [u8; DUAL_HEADER_LEN] = take(bytes, 0);

    if let Some(slot) = RecordSlot::from_file_length(header[0]) {
        if dual_slot_valid(&header, slot, bytes, page) {
            let (balance, transaction_id) = read_slot(bytes, slot)?;
            return Ok(DualView {
                slot,
                balance,
                transaction_id,
                needs_repair: false,
                canonical: *record,
            });
        }
    }

    let valid_a = dual_slot_valid(&canonical_header(RecordSlot::A), RecordSlot::A, bytes, page);
    let valid_b = dual_slot_valid(&canonical_header(RecordSlot::B), RecordSlot::B, bytes, page);

    let slot = match (valid_a, valid_b) {
        (true, _) => RecordSlot::A,
        (false, true) => RecordSlot::B,
        (false, false) => {
            return Err(Error::InvalidRecord(
                "neither dual record has a valid CRC".to_string(),
            ))
        }
    };
    warn!(
        claimed = header[0],
        ?slot,
        valid_a,
        valid_b,
        "Dual record header does not select a valid record"
    );

    let (balance, transaction_id) = read_slot(bytes, slot)?;
    let mut canonical = *bytes;
    canonical[..DUAL_HEADER_LEN].copy_from_slice(&canonical_header(slot));
    Ok(DualView {
        slot,
        balance,
        transaction_id,
        needs_repair: canonical != *bytes,
        canonical: AccountRecord(canonical),
    })
}
