//! Model of the SHA device function
//!
//! The device hashes one 64-byte block built from a secret, a 32-byte data
//! page, and fixed scratchpad windows:
//!
//! | Block bytes | Source |
//! |-------------|--------|
//! | 0..4        | secret[0..4] |
//! | 4..36       | page[0..32] |
//! | 36..48      | scratchpad[8..20] |
//! | 48..52      | secret[4..8] |
//! | 52..55      | scratchpad[20..23] |
//! | 55..64      | SHA-1 padding (0x80, zeros, bit length 0x01B8) |
//!
//! The 55 message bytes pad to exactly one block, so the device result is the
//! plain SHA-1 digest of the message, emitted in the device's word order.

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{take, BindCode, BindData, FullBindCode, Scratchpad, Secret, TokenAddress};

/// Bytes of secret material consumed per partial secret computation
pub const PARTIAL_SECRET_LEN: usize = 47;

/// Commands understood by the SHA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShaCommand {
    ComputeFirstSecret = 0x0F,
    ComputeNextSecret = 0xF0,
    ValidateDataPage = 0x3C,
    SignDataPage = 0xC3,
    ComputeChallenge = 0xCC,
    AuthHost = 0xAA,
    ReadAuthenticatedPage = 0xA5,
}

impl ShaCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x0F => Some(Self::ComputeFirstSecret),
            0xF0 => Some(Self::ComputeNextSecret),
            0x3C => Some(Self::ValidateDataPage),
            0xC3 => Some(Self::SignDataPage),
            0xCC => Some(Self::ComputeChallenge),
            0xAA => Some(Self::AuthHost),
            0xA5 => Some(Self::ReadAuthenticatedPage),
            _ => None,
        }
    }

    /// Secret-producing commands write their result at scratchpad offset 0
    pub fn produces_secret(self) -> bool {
        matches!(self, Self::ComputeFirstSecret | Self::ComputeNextSecret)
    }
}

/// Token context folded in by the commands that read device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaContext {
    pub address: TokenAddress,
    pub page: u8,
    pub write_counter: u32,
}

/// Raw device MAC over `secret`, `page`, and the scratchpad windows
pub fn compute_mac(secret: &[u8; 8], page: &[u8; 32], scratchpad: &[u8; 32]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(&secret[0..4]);
    hasher.update(page);
    hasher.update(&scratchpad[8..20]);
    hasher.update(&secret[4..8]);
    hasher.update(&scratchpad[20..23]);
    let digest = hasher.finalize();

    // Device emits words E, D, C, B, A least significant byte first,
    // which is the big-endian digest reversed.
    let mut mac = [0u8; 20];
    for (out, byte) in mac.iter_mut().zip(digest.iter().rev()) {
        *out = *byte;
    }
    mac
}

/// Run one SHA device function against `scratchpad`
///
/// MAC-producing commands leave the MAC at scratchpad offset 8. Secret
/// producing commands leave the result at offset 0 with its first 8 bytes
/// repeated at offsets 8, 16, and 24.
pub fn sha_function(
    command: ShaCommand,
    secret: &Secret,
    page: &[u8; 32],
    scratchpad: &mut Scratchpad,
    context: Option<&ShaContext>,
) -> Result<()> {
    let pad = scratchpad.as_bytes_mut();
    let mut control = 0x00u8;

    let secret_bytes = match command {
        ShaCommand::ComputeFirstSecret => Secret::NULL,
        _ => *secret.as_bytes(),
    };

    match command {
        ShaCommand::ComputeFirstSecret
        | ShaCommand::ComputeNextSecret
        | ShaCommand::ValidateDataPage
        | ShaCommand::SignDataPage => {
            pad[12] = (pad[12] & 0x3F) | control;
        }
        ShaCommand::AuthHost => {
            control |= 0x40;
            pad[12] = (pad[12] & 0x3F) | control;
        }
        ShaCommand::ComputeChallenge | ShaCommand::ReadAuthenticatedPage => {
            if command == ShaCommand::ComputeChallenge {
                control |= 0x40;
            }
            let ctx = context.ok_or_else(|| {
                Error::ShaFunctionFailed(format!("{:?} requires token context", command))
            })?;
            pad[8..12].copy_from_slice(&ctx.write_counter.to_le_bytes());
            pad[12] = (ctx.page & 0x0F) | control;
            pad[13..20].copy_from_slice(&ctx.address.serial7());
        }
    }

    let mac = compute_mac(&secret_bytes, page, &*pad);

    if command.produces_secret() {
        pad[0..20].copy_from_slice(&mac);
        let head: [u8; 8] = take(&*pad, 0);
        pad[8..16].copy_from_slice(&head);
        pad[16..24].copy_from_slice(&head);
        pad[24..32].copy_from_slice(&head);
    } else {
        pad[8..28].copy_from_slice(&mac);
    }

    Ok(())
}

/// Combine a 7-byte bind code with a page number and device address
///
/// Layout: code[0..4] · page · address[0..7] · code[4..7]
pub fn format_bind_code(code: &BindCode, page: u8, address: &TokenAddress) -> FullBindCode {
    let mut full = [0u8; 15];
    full[0..4].copy_from_slice(&code.0[0..4]);
    full[4] = page;
    full[5..12].copy_from_slice(&address.serial7());
    full[12..15].copy_from_slice(&code.0[4..7]);
    FullBindCode(full)
}

/// Derive a device-unique secret from an installed master secret
pub fn bind_secret(master: &Secret, bind_data: &BindData, bind_code: &FullBindCode) -> Result<Secret> {
    let mut scratchpad = Scratchpad::erased();
    scratchpad.as_bytes_mut()[8..23].copy_from_slice(&bind_code.0);
    sha_function(
        ShaCommand::ComputeNextSecret,
        master,
        bind_data.as_bytes(),
        &mut scratchpad,
        None,
    )
    .map_err(|e| Error::BindSecretFailed(e.to_string()))?;
    Ok(Secret::new(take(scratchpad.as_bytes(), 0)))
}

/// Compute the installed secret for arbitrary-length secret material
///
/// Input is zero-padded to a multiple of 47 bytes and consumed in partials of
/// 32 page bytes and 15 scratchpad bytes. The first partial starts from the
/// null secret; each later partial chains from the previous result.
pub fn install_master_secret(material: &[u8]) -> Result<Secret> {
    if material.is_empty() {
        return Err(Error::InvalidSecret("secret material is empty".to_string()));
    }

    let padded_len = material.len().div_ceil(PARTIAL_SECRET_LEN) * PARTIAL_SECRET_LEN;
    let mut input = material.to_vec();
    input.resize(padded_len, 0);

    let mut secret = Secret::null();
    let mut command = ShaCommand::ComputeFirstSecret;
    for chunk in input.chunks_exact(PARTIAL_SECRET_LEN) {
        let mut scratchpad = Scratchpad::erased();
        let mut page = [0u8; 32];
        page.copy_from_slice(&chunk[0..32]);
        scratchpad.as_bytes_mut()[8..23].copy_from_slice(&chunk[32..47]);

        sha_function(command, &secret, &page, &mut scratchpad, None)?;
        secret = Secret::new(take(scratchpad.as_bytes(), 0));
        command = ShaCommand::ComputeNextSecret;
    }

    debug!(partials = padded_len / PARTIAL_SECRET_LEN, "Installed master secret");
    Ok(secret)
}

/// True if the material already carries the 0xFF masking the DS1961S needs
///
/// The DS1961S has no way to load the scratchpad bytes that land at
/// partial offsets 32..36 and 44..47, so they must already be 0xFF.
pub fn is_ds1961s_compatible(material: &[u8]) -> bool {
    if material.is_empty() || material.len() % PARTIAL_SECRET_LEN != 0 {
        return false;
    }
    material.chunks_exact(PARTIAL_SECRET_LEN).all(|chunk| {
        chunk[32..36].iter().all(|b| *b == 0xFF) && chunk[44..47].iter().all(|b| *b == 0xFF)
    })
}

/// Pad secret material to whole partials and apply the DS1961S 0xFF mask
pub fn reformat_for_ds1961s(material: &[u8]) -> Vec<u8> {
    let partials = material.len().div_ceil(PARTIAL_SECRET_LEN).max(1);
    let mut out = material.to_vec();
    out.resize(partials * PARTIAL_SECRET_LEN, 0);
    for chunk in out.chunks_exact_mut(PARTIAL_SECRET_LEN) {
        chunk[32..36].fill(0xFF);
        chunk[44..47].fill(0xFF);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_page() -> [u8; 32] {
        let mut page = [0u8; 32];
        for (i, b) in page.iter_mut().enumerate() {
            *b = i as u8;
        }
        page
    }

    #[test]
    fn test_command_codes() {
        for cmd in [
            ShaCommand::ComputeFirstSecret,
            ShaCommand::ComputeNextSecret,
            ShaCommand::ValidateDataPage,
            ShaCommand::SignDataPage,
            ShaCommand::ComputeChallenge,
            ShaCommand::AuthHost,
            ShaCommand::ReadAuthenticatedPage,
        ] {
            assert_eq!(ShaCommand::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(ShaCommand::from_code(0x00), None);
    }

    #[test]
    fn test_mac_is_reversed_sha1_of_message() {
        let secret = [1, 2, 3, 4, 5, 6, 7, 8];
        let page = sample_page();
        let pad = [0x55u8; 32];

        let mut message = Vec::with_capacity(55);
        message.extend_from_slice(&secret[0..4]);
        message.extend_from_slice(&page);
        message.extend_from_slice(&pad[8..20]);
        message.extend_from_slice(&secret[4..8]);
        message.extend_from_slice(&pad[20..23]);
        assert_eq!(message.len(), 55);

        let mut expected: Vec<u8> = Sha1::digest(&message).to_vec();
        expected.reverse();
        assert_eq!(compute_mac(&secret, &page, &pad).to_vec(), expected);
    }

    #[test]
    fn test_mac_ignores_unused_scratchpad_bytes() {
        let secret = [9u8; 8];
        let page = sample_page();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        a[30] = 3;
        assert_eq!(compute_mac(&secret, &page, &a), compute_mac(&secret, &page, &b));
        b[20] = 1;
        assert_ne!(compute_mac(&secret, &page, &a), compute_mac(&secret, &page, &b));
    }

    #[test]
    fn test_sign_masks_control_byte() {
        let secret = Secret::new([3u8; 8]);
        let page = sample_page();

        let mut with_bits = Scratchpad::new([0xFF; 32]);
        let mut without = Scratchpad::new([0xFF; 32]);
        without.0[12] = 0x3F;
        sha_function(ShaCommand::SignDataPage, &secret, &page, &mut with_bits, None).unwrap();
        sha_function(ShaCommand::SignDataPage, &secret, &page, &mut without, None).unwrap();
        assert_eq!(with_bits.mac(), without.mac());

        let mut host = Scratchpad::new([0xFF; 32]);
        sha_function(ShaCommand::AuthHost, &secret, &page, &mut host, None).unwrap();
        assert_ne!(host.mac(), without.mac());
    }

    #[test]
    fn test_read_authenticated_requires_context() {
        let secret = Secret::new([3u8; 8]);
        let mut pad = Scratchpad::erased();
        let err = sha_function(
            ShaCommand::ReadAuthenticatedPage,
            &secret,
            &sample_page(),
            &mut pad,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ShaFunctionFailed(_)));
    }

    #[test]
    fn test_read_authenticated_fills_context() {
        let secret = Secret::new([3u8; 8]);
        let ctx = ShaContext {
            address: TokenAddress::new([0x18, 1, 2, 3, 4, 5, 6, 7]),
            page: 0x19,
            write_counter: 0x0000_0102,
        };
        let mut pad = Scratchpad::erased();
        sha_function(
            ShaCommand::ReadAuthenticatedPage,
            &secret,
            &sample_page(),
            &mut pad,
            Some(&ctx),
        )
        .unwrap();

        let mut expected = Scratchpad::erased();
        expected.0[8..12].copy_from_slice(&[2, 1, 0, 0]);
        expected.0[12] = 0x09;
        expected.0[13..20].copy_from_slice(&[0x18, 1, 2, 3, 4, 5, 6]);
        let mac = compute_mac(secret.as_bytes(), &sample_page(), &expected.0);
        assert_eq!(pad.mac().0, mac);
    }

    #[test]
    fn test_secret_commands_replicate_result() {
        let mut pad = Scratchpad::erased();
        sha_function(
            ShaCommand::ComputeFirstSecret,
            &Secret::new([0xEE; 8]),
            &sample_page(),
            &mut pad,
            None,
        )
        .unwrap();
        assert_eq!(pad.0[0..8], pad.0[8..16]);
        assert_eq!(pad.0[0..8], pad.0[16..24]);
        assert_eq!(pad.0[0..8], pad.0[24..32]);
    }

    #[test]
    fn test_first_secret_ignores_supplied_secret() {
        let page = sample_page();
        let mut a = Scratchpad::erased();
        let mut b = Scratchpad::erased();
        sha_function(ShaCommand::ComputeFirstSecret, &Secret::new([1; 8]), &page, &mut a, None).unwrap();
        sha_function(ShaCommand::ComputeFirstSecret, &Secret::null(), &page, &mut b, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_install_pads_to_partial() {
        let short = install_master_secret(&[1, 2, 3]).unwrap();
        let mut padded = vec![1, 2, 3];
        padded.resize(47, 0);
        assert_eq!(short, install_master_secret(&padded).unwrap());

        let two = install_master_secret(&[7u8; 60]).unwrap();
        assert_ne!(two, install_master_secret(&[7u8; 47]).unwrap());
        assert!(install_master_secret(&[]).is_err());
    }

    #[test]
    fn test_bind_depends_on_code_and_master() {
        let master = install_master_secret(b"authentication secret").unwrap();
        let data = BindData::new([0x11; 32]);
        let addr = TokenAddress::new([0x18, 9, 9, 9, 9, 9, 9, 0]);
        let code = BindCode::new([1, 2, 3, 4, 5, 6, 7]);

        let a = bind_secret(&master, &data, &format_bind_code(&code, 1, &addr)).unwrap();
        let b = bind_secret(&master, &data, &format_bind_code(&code, 2, &addr)).unwrap();
        assert_ne!(a, b);
        let other = install_master_secret(b"different").unwrap();
        assert_ne!(a, bind_secret(&other, &data, &format_bind_code(&code, 1, &addr)).unwrap());
    }

    #[test]
    fn test_format_bind_code_layout() {
        let code = BindCode::new([1, 2, 3, 4, 5, 6, 7]);
        let addr = TokenAddress::new([0x18, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7]);
        let full = format_bind_code(&code, 0x05, &addr);
        assert_eq!(
            full.0,
            [1, 2, 3, 4, 0x05, 0x18, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 5, 6, 7]
        );
    }

    #[test]
    fn test_ds1961s_reformat() {
        let raw = b"a reasonably long authentication secret for testing reformat";
        assert!(!is_ds1961s_compatible(raw));
        let formatted = reformat_for_ds1961s(raw);
        assert_eq!(formatted.len(), 94);
        assert!(is_ds1961s_compatible(&formatted));
        assert_eq!(&formatted[0..32], &raw[0..32]);
        assert_eq!(reformat_for_ds1961s(&formatted), formatted);
        assert_eq!(reformat_for_ds1961s(&[]).len(), 47);
    }
}
