//! Coprocessor identity interface
//!
//! A coprocessor holds eight secret slots. The signing secret lives in the
//! slot of the service's signing page, the authentication master secret in the
//! slot of its authentication page, and bound device secrets are derived into
//! the workspace slot. Implementations serialize each bind-then-compute
//! sequence internally so one identity can be shared across engines.

use crate::error::Result;
use crate::service::ServiceInfo;
use crate::sha::ShaCommand;
use crate::types::{BindCode, BindData, Challenge, FullBindCode, Mac, Scratchpad, TokenAddress};

/// Number of secret slots on a coprocessor
pub const SECRET_SLOTS: usize = 8;

/// Binding material accepted by [`CoprocessorIdentity::bind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMaterial<'a> {
    /// Combined with the bind page and the coprocessor's own address
    Code(&'a BindCode),
    /// Used as-is
    Full(&'a FullBindCode),
}

/// Sign, verify, bind, and challenge primitives of a trusted coprocessor
pub trait CoprocessorIdentity: Send + Sync {
    /// Service descriptor this coprocessor was provisioned with
    fn service(&self) -> &ServiceInfo;

    /// 1-Wire address of the coprocessor
    fn address(&self) -> TokenAddress;

    /// Draw a 3-byte challenge from 20 bytes of fresh randomness
    ///
    /// `offset` selects where in the 20 bytes the challenge starts (0..=17).
    fn generate_challenge(&self, offset: usize) -> Result<Challenge>;

    /// MAC `page` and `scratchpad` with the signing secret
    fn sign(&self, page: &[u8; 32], scratchpad: &Scratchpad) -> Result<Mac>;

    /// Re-derive a token's secret and check its authentication MAC
    fn verify_authentication(
        &self,
        full_bind_code: &FullBindCode,
        page: &[u8; 32],
        scratchpad: &Scratchpad,
        mac: &Mac,
        auth_command: ShaCommand,
    ) -> Result<bool>;

    /// Check a stored record signature against the signing secret
    fn verify_signature(&self, page: &[u8; 32], scratchpad: &Scratchpad, mac: &Mac) -> Result<bool>;

    /// Derive a new secret into `dest_slot` from the secret at `master_page`
    fn bind(
        &self,
        master_page: u8,
        bind_data: &BindData,
        bind_code: BindMaterial<'_>,
        dest_slot: u8,
    ) -> Result<()>;
}
