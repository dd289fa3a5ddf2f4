//! Software coprocessor
//!
//! Holds the eight secret slots in memory and runs the SHA device model
//! directly. All slot access goes through one lock, so binding a device secret
//! into the workspace slot and comparing against it cannot interleave with
//! another caller.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info};

use purse_core::sha::{
    bind_secret, format_bind_code, install_master_secret, is_ds1961s_compatible, sha_function,
};
use purse_core::service::secret_slot;
use purse_core::{
    BindData, BindMaterial, Challenge, CoprocessorIdentity, Error, FullBindCode, Mac, Scratchpad,
    Secret, ServiceInfo, ShaCommand, TokenAddress, CHALLENGE_LEN, CHALLENGE_SOURCE_LEN,
    SECRET_SLOTS,
};

use crate::error::{CoprError, Result};

struct SlotState {
    secrets: [Secret; SECRET_SLOTS],
    rng: Box<dyn RngCore + Send>,
}

/// In-memory coprocessor with eight secret slots
pub struct EmulatedCoprocessor {
    service: ServiceInfo,
    address: TokenAddress,
    state: Mutex<SlotState>,
}

impl fmt::Debug for EmulatedCoprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmulatedCoprocessor")
            .field("service", &self.service)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl EmulatedCoprocessor {
    /// Install signing and authentication secrets for `service`
    ///
    /// The DS1961S compatibility flag of the service is derived from the
    /// authentication secret material.
    pub fn new(
        mut service: ServiceInfo,
        address: TokenAddress,
        signing_secret: &[u8],
        auth_secret: &[u8],
        rng: impl RngCore + Send + 'static,
    ) -> Result<Self> {
        service.validate()?;
        service.ds1961s_compatible = is_ds1961s_compatible(auth_secret);

        let mut secrets: [Secret; SECRET_SLOTS] = Default::default();
        secrets[slot(service.sign_page)] = install_master_secret(signing_secret)?;
        secrets[slot(service.auth_page)] = install_master_secret(auth_secret)?;

        info!(
            address = %address.to_hex(),
            sign_page = service.sign_page,
            auth_page = service.auth_page,
            ds1961s_compatible = service.ds1961s_compatible,
            "Initialized emulated coprocessor"
        );
        Ok(Self::from_secrets(service, address, secrets, rng))
    }

    /// Same as [`EmulatedCoprocessor::new`] with an entropy-seeded RNG
    pub fn with_entropy(
        service: ServiceInfo,
        address: TokenAddress,
        signing_secret: &[u8],
        auth_secret: &[u8],
    ) -> Result<Self> {
        Self::new(service, address, signing_secret, auth_secret, ChaCha20Rng::from_entropy())
    }

    /// Coprocessor with already-installed slot contents
    fn from_secrets(
        service: ServiceInfo,
        address: TokenAddress,
        secrets: [Secret; SECRET_SLOTS],
        rng: impl RngCore + Send + 'static,
    ) -> Self {
        Self {
            service,
            address,
            state: Mutex::new(SlotState {
                secrets,
                rng: Box::new(rng),
            }),
        }
    }

    /// Serialize as service file, address, then the eight slots
    ///
    /// Without `include_secrets` every slot is exported as the null secret.
    pub fn export(&self, include_secrets: bool) -> Result<Vec<u8>> {
        let mut bytes = self.service.to_bytes()?;
        bytes.extend_from_slice(self.address.as_bytes());
        let state = self.lock()?;
        for secret in state.secrets.iter() {
            if include_secrets {
                bytes.extend_from_slice(secret.as_bytes());
            } else {
                bytes.extend_from_slice(&Secret::NULL);
            }
        }
        debug!(include_secrets, len = bytes.len(), "Exported coprocessor image");
        Ok(bytes)
    }

    /// Rebuild a coprocessor from [`EmulatedCoprocessor::export`] output
    pub fn import(bytes: &[u8], rng: impl RngCore + Send + 'static) -> Result<Self> {
        let (service, consumed) = ServiceInfo::from_bytes(bytes)?;
        let rest = &bytes[consumed..];
        let expected = TokenAddress::LEN + SECRET_SLOTS * Secret::LEN;
        if rest.len() != expected {
            return Err(CoprError::InvalidImage(format!(
                "expected {} bytes after service file, got {}",
                expected,
                rest.len()
            )));
        }

        let mut address = [0u8; TokenAddress::LEN];
        address.copy_from_slice(&rest[..TokenAddress::LEN]);
        let mut secrets: [Secret; SECRET_SLOTS] = Default::default();
        for (secret, chunk) in secrets
            .iter_mut()
            .zip(rest[TokenAddress::LEN..].chunks_exact(Secret::LEN))
        {
            let mut raw = [0u8; Secret::LEN];
            raw.copy_from_slice(chunk);
            *secret = Secret::new(raw);
        }

        Ok(Self::from_secrets(service, TokenAddress::new(address), secrets, rng))
    }

    fn lock(&self) -> purse_core::Result<MutexGuard<'_, SlotState>> {
        self.state
            .lock()
            .map_err(|_| Error::CoprocessorIo("coprocessor state lock poisoned".to_string()))
    }

    fn compute(
        secret: &Secret,
        command: ShaCommand,
        page: &[u8; 32],
        scratchpad: &Scratchpad,
    ) -> purse_core::Result<Mac> {
        let mut pad = *scratchpad;
        sha_function(command, secret, page, &mut pad, None)?;
        Ok(pad.mac())
    }
}

fn slot(page: u8) -> usize {
    usize::from(secret_slot(page))
}

impl CoprocessorIdentity for EmulatedCoprocessor {
    fn service(&self) -> &ServiceInfo {
        &self.service
    }

    fn address(&self) -> TokenAddress {
        self.address
    }

    fn generate_challenge(&self, offset: usize) -> purse_core::Result<Challenge> {
        if offset > CHALLENGE_SOURCE_LEN - CHALLENGE_LEN {
            return Err(Error::ShaFunctionFailed(format!(
                "challenge offset {} out of range",
                offset
            )));
        }
        let mut source = [0u8; CHALLENGE_SOURCE_LEN];
        self.lock()?.rng.fill_bytes(&mut source);
        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&source[offset..offset + CHALLENGE_LEN]);
        Ok(Challenge::new(challenge))
    }

    fn sign(&self, page: &[u8; 32], scratchpad: &Scratchpad) -> purse_core::Result<Mac> {
        let state = self.lock()?;
        Self::compute(
            &state.secrets[slot(self.service.sign_page)],
            ShaCommand::SignDataPage,
            page,
            scratchpad,
        )
    }

    fn verify_authentication(
        &self,
        full_bind_code: &FullBindCode,
        page: &[u8; 32],
        scratchpad: &Scratchpad,
        mac: &Mac,
        auth_command: ShaCommand,
    ) -> purse_core::Result<bool> {
        let mut state = self.lock()?;
        let workspace = slot(self.service.workspace_page);
        state.secrets[workspace] = bind_secret(
            &state.secrets[slot(self.service.auth_page)],
            &self.service.bind_data,
            full_bind_code,
        )?;
        let expected = Self::compute(&state.secrets[workspace], auth_command, page, scratchpad)?;
        Ok(expected.ct_matches(mac))
    }

    fn verify_signature(
        &self,
        page: &[u8; 32],
        scratchpad: &Scratchpad,
        mac: &Mac,
    ) -> purse_core::Result<bool> {
        let state = self.lock()?;
        let expected = Self::compute(
            &state.secrets[slot(self.service.sign_page)],
            ShaCommand::ValidateDataPage,
            page,
            scratchpad,
        )?;
        Ok(expected.ct_matches(mac))
    }

    fn bind(
        &self,
        master_page: u8,
        bind_data: &BindData,
        bind_code: BindMaterial<'_>,
        dest_slot: u8,
    ) -> purse_core::Result<()> {
        let full = match bind_code {
            BindMaterial::Code(code) => format_bind_code(code, master_page, &self.address),
            BindMaterial::Full(full) => *full,
        };
        let mut state = self.lock()?;
        let derived = bind_secret(&state.secrets[slot(master_page)], bind_data, &full)?;
        state.secrets[slot(dest_slot)] = derived;
        debug!(master_page, dest_slot, "Bound secret");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use purse_core::BindCode;

    fn service() -> ServiceInfo {
        ServiceInfo {
            bind_data: BindData::new([0x10; 32]),
            bind_code: BindCode::new([1, 2, 3, 4, 5, 6, 7]),
            signing_challenge: Challenge::new([0x03, 0x0A, 0x0F]),
            ..Default::default()
        }
    }

    fn copr(seed: u64) -> EmulatedCoprocessor {
        EmulatedCoprocessor::new(
            service(),
            TokenAddress::new([0x18, 0xC0, 0xC0, 0, 0, 0, 0, 0x01]),
            b"signing secret",
            b"auth secret",
            ChaCha20Rng::seed_from_u64(seed),
        )
        .unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let c = copr(1);
        let page = [0x42u8; 32];
        let pad = Scratchpad::erased();
        let mac = c.sign(&page, &pad).unwrap();
        assert!(c.verify_signature(&page, &pad, &mac).unwrap());

        let mut other = page;
        other[0] ^= 1;
        assert!(!c.verify_signature(&other, &pad, &mac).unwrap());
    }

    #[test]
    fn test_challenges_are_seeded() {
        let a = copr(7);
        let b = copr(7);
        assert_eq!(a.generate_challenge(0).unwrap(), b.generate_challenge(0).unwrap());
        let first = a.generate_challenge(0).unwrap();
        assert_ne!(first, a.generate_challenge(0).unwrap());
        assert!(a.generate_challenge(18).is_err());
        assert!(a.generate_challenge(17).is_ok());
    }

    #[test]
    fn test_shared_slot_rejected() {
        let mut svc = service();
        svc.auth_page = 0;
        svc.sign_page = 8;
        let result = EmulatedCoprocessor::new(
            svc,
            TokenAddress::new([0x18; 8]),
            b"a",
            b"b",
            ChaCha20Rng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(CoprError::Core(Error::ServiceFile(_)))));
    }

    #[test]
    fn test_workspace_slot_collisions_rejected() {
        // Slot 0 holds the signing secret, slot 7 the authentication secret
        for workspace in [0, 8, 7, 15] {
            let mut svc = service();
            svc.workspace_page = workspace;
            let result = EmulatedCoprocessor::new(
                svc,
                TokenAddress::new([0x18; 8]),
                b"a",
                b"b",
                ChaCha20Rng::seed_from_u64(0),
            );
            assert!(
                matches!(result, Err(CoprError::Core(Error::ServiceFile(_)))),
                "workspace page {}",
                workspace
            );
        }
    }

    #[test]
    fn test_export_without_secrets_nulls_slots() {
        let c = copr(3);
        let image = c.export(false).unwrap();
        let restored = EmulatedCoprocessor::import(&image, ChaCha20Rng::seed_from_u64(3)).unwrap();
        let page = [0u8; 32];
        let pad = Scratchpad::erased();
        assert_ne!(c.sign(&page, &pad).unwrap(), restored.sign(&page, &pad).unwrap());
        assert_eq!(image.len() - 8 - 64, c.service().to_bytes().unwrap().len());
    }

    #[test]
    fn test_export_import_preserves_signatures() {
        let c = copr(3);
        let restored =
            EmulatedCoprocessor::import(&c.export(true).unwrap(), ChaCha20Rng::seed_from_u64(9)).unwrap();
        let page = [0x99u8; 32];
        let pad = Scratchpad::erased();
        assert_eq!(c.sign(&page, &pad).unwrap(), restored.sign(&page, &pad).unwrap());
        assert_eq!(restored.address(), c.address());
        assert_eq!(restored.service(), c.service());
    }

    #[test]
    fn test_import_rejects_trailing_garbage() {
        let mut image = copr(3).export(true).unwrap();
        image.push(0);
        assert!(matches!(
            EmulatedCoprocessor::import(&image, ChaCha20Rng::seed_from_u64(0)),
            Err(CoprError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_bind_into_slot_changes_signing() {
        let c = copr(5);
        let page = [0u8; 32];
        let pad = Scratchpad::erased();
        let before = c.sign(&page, &pad).unwrap();
        let svc = service();
        c.bind(7, &svc.bind_data, BindMaterial::Code(&svc.bind_code), 8).unwrap();
        assert_ne!(before, c.sign(&page, &pad).unwrap());
    }
}
