//! User token interface and device-family binding strategies

mod memory;

pub use memory::{MemoryToken, WriteFault};

use serde::{Deserialize, Serialize};

use crate::account::AccountRecord;
use crate::error::Result;
use crate::sha::{format_bind_code, ShaCommand};
use crate::types::{BindCode, Challenge, FullBindCode, Mac, TokenAddress};

/// Size of a write chunk on the token's scratchpad
pub const WRITE_CHUNK_LEN: usize = 8;

/// Physical token family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFamily {
    /// SHA iButton with write-cycle counters on pages 8..=15
    Ds1963S,
    /// Write-authorized 1K EEPROM, four pages, no counters
    Ds1961S,
}

impl TokenFamily {
    /// 1-Wire family code
    pub fn family_code(self) -> u8 {
        match self {
            TokenFamily::Ds1963S => 0x18,
            TokenFamily::Ds1961S => 0x33,
        }
    }

    pub fn from_family_code(code: u8) -> Option<Self> {
        match code {
            0x18 => Some(TokenFamily::Ds1963S),
            0x33 => Some(TokenFamily::Ds1961S),
            _ => None,
        }
    }

    /// Highest data page an account record may live on
    pub fn max_page(self) -> u8 {
        match self {
            TokenFamily::Ds1963S => 15,
            TokenFamily::Ds1961S => 3,
        }
    }

    /// SHA command the coprocessor runs to check this family's MAC
    pub fn auth_command(self) -> ShaCommand {
        match self {
            TokenFamily::Ds1963S => ShaCommand::ValidateDataPage,
            TokenFamily::Ds1961S => ShaCommand::AuthHost,
        }
    }

    pub fn has_write_counter(self, page: u8) -> bool {
        match self {
            TokenFamily::Ds1963S => page > 7,
            TokenFamily::Ds1961S => false,
        }
    }

    /// Weakly programmed EEPROM bits can be re-energized
    pub fn supports_refresh(self) -> bool {
        matches!(self, TokenFamily::Ds1961S)
    }

    /// Binding code as this family folds page and address into it
    pub fn full_bind_code(self, code: &BindCode, page: u8, address: &TokenAddress) -> FullBindCode {
        match self {
            TokenFamily::Ds1963S => format_bind_code(code, page, address),
            TokenFamily::Ds1961S => {
                let mut full = [0xFFu8; 15];
                full[4] = page;
                full[5..12].copy_from_slice(&address.serial7());
                FullBindCode::new(full)
            }
        }
    }
}

/// Record and MAC returned by an authenticated read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedRead {
    pub record: AccountRecord,
    pub mac: Mac,
    /// Write-cycle counter of the account page, if it has one
    pub write_counter: Option<u32>,
}

/// One physical user token
///
/// Writes are not atomic: a failed or interrupted write may leave some
/// chunks updated.
pub trait UserToken {
    fn family(&self) -> TokenFamily;

    fn address(&self) -> TokenAddress;

    /// Page holding the account record
    fn account_page(&self) -> u8;

    /// Bind code the coprocessor folds into this token's secret
    ///
    /// Only meaningful as input to [`CoprocessorIdentity::verify_authentication`]
    /// or [`CoprocessorIdentity::bind`]; implementations should not override it.
    ///
    /// [`CoprocessorIdentity::verify_authentication`]: crate::CoprocessorIdentity::verify_authentication
    /// [`CoprocessorIdentity::bind`]: crate::CoprocessorIdentity::bind
    fn full_bind_code(&self, bind_code: &BindCode) -> FullBindCode {
        self.family()
            .full_bind_code(bind_code, self.account_page(), &self.address())
    }

    fn has_write_counter(&self) -> bool {
        self.family().has_write_counter(self.account_page())
    }

    fn auth_command(&self) -> ShaCommand {
        self.family().auth_command()
    }

    /// Plain read of the account page
    fn read_account_data(&mut self) -> Result<AccountRecord>;

    /// Answer `challenge` with the account page and its MAC
    fn read_authenticated(&mut self, challenge: &Challenge) -> Result<AuthenticatedRead>;

    /// Write the account page; `Ok(false)` means the write was not confirmed
    fn write_account_data(&mut self, record: &AccountRecord) -> Result<bool>;

    /// Current write-cycle counter, `None` if the page has none
    fn write_cycle_counter(&mut self) -> Result<Option<u32>>;

    /// Re-energize weak bits; `Ok(false)` if the family has no such operation
    fn refresh(&mut self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ds1961s_bind_code_layout() {
        let addr = TokenAddress::new([0x33, 1, 2, 3, 4, 5, 6, 0x99]);
        let code = BindCode::new([7; 7]);
        let full = TokenFamily::Ds1961S.full_bind_code(&code, 2, &addr);
        assert_eq!(
            full.0,
            [0xFF, 0xFF, 0xFF, 0xFF, 2, 0x33, 1, 2, 3, 4, 5, 6, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_family_capabilities() {
        assert!(TokenFamily::Ds1963S.has_write_counter(8));
        assert!(!TokenFamily::Ds1963S.has_write_counter(7));
        assert!(!TokenFamily::Ds1961S.has_write_counter(3));
        assert_eq!(TokenFamily::Ds1963S.auth_command(), ShaCommand::ValidateDataPage);
        assert_eq!(TokenFamily::Ds1961S.auth_command(), ShaCommand::AuthHost);
        assert_eq!(TokenFamily::from_family_code(0x33), Some(TokenFamily::Ds1961S));
    }
}
