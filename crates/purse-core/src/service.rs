//! Coprocessor service descriptor and its binary file format
//!
//! File layout (all lengths in bytes):
//!
//! | Field | Size |
//! |-------|------|
//! | Service filename | 4 |
//! | Filename extension | 1 |
//! | Signing page | 1 |
//! | Authentication page | 1 |
//! | Workspace page | 1 |
//! | Version | 1 |
//! | Date (month, day, year-1900 MSB, LSB) | 4 |
//! | Bind data | 32 |
//! | Bind code | 7 |
//! | Signing challenge | 3 |
//! | Provider name length | 1 |
//! | Initial signature length | 1 |
//! | Auxiliary data length | 1 |
//! | Provider name | variable |
//! | Initial signature | variable (must be 20) |
//! | Auxiliary data | variable |
//! | Encryption code | 1 |
//! | DS1961S compatible (0x55) | 1 |

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{hex_bytes, hex_vec, BindCode, BindData, Challenge, Mac};

const FIXED_PREFIX_LEN: usize = 4 + 1 + 4 + 4 + 32 + 7 + 3 + 3;

/// Marker byte for a service whose authentication secret suits the DS1961S
pub const DS1961S_COMPATIBLE_MARKER: u8 = 0x55;

/// Everything a coprocessor knows about the service it authenticates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Four-character service filename on user tokens
    #[serde(with = "hex_bytes")]
    pub filename: [u8; 4],
    pub extension: u8,
    /// Page holding the signing secret (0 or 8)
    pub sign_page: u8,
    /// Page holding the authentication master secret
    pub auth_page: u8,
    /// Page whose secret slot receives bound device secrets
    pub workspace_page: u8,
    pub version: u8,
    #[serde(with = "hex_bytes")]
    pub date: [u8; 4],
    pub bind_data: BindData,
    pub bind_code: BindCode,
    pub signing_challenge: Challenge,
    pub provider_name: String,
    /// Signature field contents while a record is being signed
    pub initial_signature: Mac,
    #[serde(with = "hex_vec", default)]
    pub aux_data: Vec<u8>,
    pub encryption_code: u8,
    pub ds1961s_compatible: bool,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            filename: *b"DLSM",
            extension: 0x66,
            sign_page: 8,
            auth_page: 7,
            workspace_page: 9,
            version: 1,
            date: [1, 1, 0, 126],
            bind_data: BindData::new([0u8; 32]),
            bind_code: BindCode::new([0u8; 7]),
            signing_challenge: Challenge::new([0u8; 3]),
            provider_name: "purse".to_string(),
            initial_signature: Mac::new([0u8; 20]),
            aux_data: Vec::new(),
            encryption_code: 0,
            ds1961s_compatible: false,
        }
    }
}

impl ServiceInfo {
    /// Check field constraints shared by the file format and the config
    pub fn validate(&self) -> Result<()> {
        if self.sign_page != 0 && self.sign_page != 8 {
            return Err(Error::ServiceFile(format!(
                "signing page must be 0 or 8, got {}",
                self.sign_page
            )));
        }
        for (name, page) in [
            ("authentication", self.auth_page),
            ("workspace", self.workspace_page),
        ] {
            if page > 15 {
                return Err(Error::ServiceFile(format!("{} page {} out of range", name, page)));
            }
        }
        let (sign, auth, workspace) = (
            secret_slot(self.sign_page),
            secret_slot(self.auth_page),
            secret_slot(self.workspace_page),
        );
        if sign == auth {
            return Err(Error::ServiceFile(format!(
                "signing and authentication pages share secret slot {}",
                sign
            )));
        }
        // Binding a device secret overwrites the workspace slot
        if workspace == sign || workspace == auth {
            return Err(Error::ServiceFile(format!(
                "workspace page {} shares secret slot {} with a master secret",
                self.workspace_page, workspace
            )));
        }
        if self.provider_name.len() > u8::MAX as usize {
            return Err(Error::ServiceFile("provider name too long".to_string()));
        }
        if self.aux_data.len() > u8::MAX as usize {
            return Err(Error::ServiceFile("auxiliary data too long".to_string()));
        }
        Ok(())
    }

    /// Serialize to the service file format
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut bytes = Vec::with_capacity(
            FIXED_PREFIX_LEN + self.provider_name.len() + Mac::LEN + self.aux_data.len() + 2,
        );
        bytes.extend_from_slice(&self.filename);
        bytes.push(self.extension);
        bytes.push(self.sign_page);
        bytes.push(self.auth_page);
        bytes.push(self.workspace_page);
        bytes.push(self.version);
        bytes.extend_from_slice(&self.date);
        bytes.extend_from_slice(self.bind_data.as_bytes());
        bytes.extend_from_slice(self.bind_code.as_bytes());
        bytes.extend_from_slice(self.signing_challenge.as_bytes());
        bytes.push(self.provider_name.len() as u8);
        bytes.push(Mac::LEN as u8);
        bytes.push(self.aux_data.len() as u8);
        bytes.extend_from_slice(self.provider_name.as_bytes());
        bytes.extend_from_slice(self.initial_signature.as_bytes());
        bytes.extend_from_slice(&self.aux_data);
        bytes.push(self.encryption_code);
        bytes.push(if self.ds1961s_compatible {
            DS1961S_COMPATIBLE_MARKER
        } else {
            0x00
        });
        Ok(bytes)
    }

    /// Parse a service file, returning the descriptor and the bytes consumed
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut reader = Reader::new(bytes);

        let filename = reader.array::<4>()?;
        let extension = reader.byte()?;
        let sign_page = reader.byte()?;
        let auth_page = reader.byte()?;
        let workspace_page = reader.byte()?;
        let version = reader.byte()?;
        let date = reader.array::<4>()?;
        let bind_data = BindData::new(reader.array::<32>()?);
        let bind_code = BindCode::new(reader.array::<7>()?);
        let signing_challenge = Challenge::new(reader.array::<3>()?);
        let name_len = reader.byte()? as usize;
        let sig_len = reader.byte()? as usize;
        let aux_len = reader.byte()? as usize;

        let provider_name = String::from_utf8(reader.slice(name_len)?.to_vec())
            .map_err(|_| Error::ServiceFile("provider name is not UTF-8".to_string()))?;
        if sig_len != Mac::LEN {
            return Err(Error::ServiceFile(format!(
                "initial signature must be {} bytes, got {}",
                Mac::LEN,
                sig_len
            )));
        }
        let initial_signature = Mac::new(reader.array::<20>()?);
        let aux_data = reader.slice(aux_len)?.to_vec();
        let encryption_code = reader.byte()?;
        let ds1961s_compatible = reader.byte()? == DS1961S_COMPATIBLE_MARKER;

        let info = Self {
            filename,
            extension,
            sign_page,
            auth_page,
            workspace_page,
            version,
            date,
            bind_data,
            bind_code,
            signing_challenge,
            provider_name,
            initial_signature,
            aux_data,
            encryption_code,
            ds1961s_compatible,
        };
        info.validate()?;
        Ok((info, reader.position()))
    }
}

/// Secret slot backing a SHA page
pub fn secret_slot(page: u8) -> u8 {
    page & 0x07
}

/// Bounds-checked cursor over a service file
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                Error::ServiceFile(format!(
                    "truncated at offset {} (need {} bytes, have {})",
                    self.pos,
                    len,
                    self.bytes.len().saturating_sub(self.pos)
                ))
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.slice(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(N)?);
        Ok(out)
    }
}
