//! Coprocessor backed by a SHA device
//!
//! A DS1963S-class coprocessor exposes scratchpad and data page access plus
//! the SHA device functions. [`HardwareCoprocessor`] drives those primitives
//! through the same sequences a physical coprocessor expects, so the device
//! itself never releases a secret.
//!
//! The device is held behind a mutex: each sign, verify, or bind sequence
//! touches the scratchpad several times and must not interleave with another.

pub mod loopback;

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use purse_core::{
    BindData, BindMaterial, Challenge, CoprocessorIdentity, Error, FullBindCode, Mac, Result,
    Scratchpad, ServiceInfo, ShaCommand, TokenAddress, CHALLENGE_LEN, CHALLENGE_SOURCE_LEN,
};

pub use loopback::LoopbackDevice;

/// Primitive operations of a SHA coprocessor device
pub trait ShaDevice: Send {
    /// 1-Wire address of the device
    fn address(&self) -> TokenAddress;

    /// Fill the scratchpad with 0xFF and target it at `page`
    fn erase_scratchpad(&mut self, page: u8) -> Result<()>;

    /// Replace the contents of a data page
    fn write_data_page(&mut self, page: u8, data: &[u8; 32]) -> Result<()>;

    /// Write `data` into the scratchpad starting at `offset`
    fn write_scratchpad(&mut self, page: u8, offset: usize, data: &[u8]) -> Result<()>;

    fn read_scratchpad(&mut self) -> Result<Scratchpad>;

    /// Run a SHA function over `page` with the secret of that page's slot
    fn sha_function(&mut self, command: ShaCommand, page: u8) -> Result<()>;

    /// Compare `mac` against the scratchpad MAC without reading it out
    fn match_scratchpad(&mut self, mac: &Mac) -> Result<bool>;

    /// Move the scratchpad's first 8 bytes into secret `slot`
    fn copy_secret(&mut self, slot: u8) -> Result<()>;
}

/// Coprocessor identity implemented on top of a [`ShaDevice`]
pub struct HardwareCoprocessor<D: ShaDevice> {
    service: ServiceInfo,
    address: TokenAddress,
    device: Mutex<D>,
}

impl<D: ShaDevice> HardwareCoprocessor<D> {
    pub fn new(device: D, service: ServiceInfo) -> Result<Self> {
        service.validate()?;
        let address = device.address();
        info!(address = %address.to_hex(), "Attached hardware coprocessor");
        Ok(Self {
            service,
            address,
            device: Mutex::new(device),
        })
    }

    /// Run `f` with exclusive access to the underlying device
    pub fn with_device<T>(&self, f: impl FnOnce(&mut D) -> T) -> Result<T> {
        let mut device = self.lock()?;
        Ok(f(&mut device))
    }

    fn lock(&self) -> Result<MutexGuard<'_, D>> {
        self.device
            .lock()
            .map_err(|_| Error::CoprocessorIo("device lock poisoned".to_string()))
    }

    fn load(device: &mut D, page: u8, data: &[u8; 32], scratchpad: &Scratchpad) -> Result<()> {
        device.write_data_page(page, data)?;
        device.write_scratchpad(page, 0, scratchpad.as_bytes())
    }
}

impl<D: ShaDevice> CoprocessorIdentity for HardwareCoprocessor<D> {
    fn service(&self) -> &ServiceInfo {
        &self.service
    }

    fn address(&self) -> TokenAddress {
        self.address
    }

    fn generate_challenge(&self, offset: usize) -> Result<Challenge> {
        if offset > CHALLENGE_SOURCE_LEN - CHALLENGE_LEN {
            return Err(Error::ShaFunctionFailed(format!(
                "challenge offset {} out of range",
                offset
            )));
        }
        let page = self.service.auth_page;
        let mut device = self.lock()?;
        device.erase_scratchpad(page)?;
        device.sha_function(ShaCommand::ComputeChallenge, page)?;
        let pad = device.read_scratchpad()?;

        let mut challenge = [0u8; CHALLENGE_LEN];
        challenge.copy_from_slice(&pad.as_bytes()[8 + offset..8 + offset + CHALLENGE_LEN]);
        Ok(Challenge::new(challenge))
    }

    fn sign(&self, page: &[u8; 32], scratchpad: &Scratchpad) -> Result<Mac> {
        let sign_page = self.service.sign_page;
        let mut device = self.lock()?;
        Self::load(&mut device, sign_page, page, scratchpad)?;
        device.sha_function(ShaCommand::SignDataPage, sign_page)?;
        Ok(device.read_scratchpad()?.mac())
    }

    fn verify_authentication(
        &self,
        full_bind_code: &FullBindCode,
        page: &[u8; 32],
        scratchpad: &Scratchpad,
        mac: &Mac,
        auth_command: ShaCommand,
    ) -> Result<bool> {
        let wspc = self.service.workspace_page;
        let mut device = self.lock()?;
        bind_on(
            &mut *device,
            self.service.auth_page,
            &self.service.bind_data,
            full_bind_code,
            wspc,
        )?;
        Self::load(&mut device, wspc, page, scratchpad)?;
        device.sha_function(auth_command, wspc)?;
        device.match_scratchpad(mac)
    }

    fn verify_signature(&self, page: &[u8; 32], scratchpad: &Scratchpad, mac: &Mac) -> Result<bool> {
        let sign_page = self.service.sign_page;
        let mut device = self.lock()?;
        Self::load(&mut device, sign_page, page, scratchpad)?;
        device.sha_function(ShaCommand::ValidateDataPage, sign_page)?;
        device.match_scratchpad(mac)
    }

    fn bind(
        &self,
        master_page: u8,
        bind_data: &BindData,
        bind_code: BindMaterial<'_>,
        dest_slot: u8,
    ) -> Result<()> {
        let full = match bind_code {
            BindMaterial::Code(code) => {
                purse_core::sha::format_bind_code(code, master_page, &self.address)
            }
            BindMaterial::Full(full) => *full,
        };
        let mut device = self.lock()?;
        bind_on(&mut *device, master_page, bind_data, &full, dest_slot)
    }
}

fn bind_on<D: ShaDevice + ?Sized>(
    device: &mut D,
    master_page: u8,
    bind_data: &BindData,
    full_bind_code: &FullBindCode,
    dest_slot: u8,
) -> Result<()> {
    let map = |e: Error| Error::BindSecretFailed(e.to_string());
    device.write_data_page(master_page, bind_data.as_bytes()).map_err(map)?;
    device.erase_scratchpad(master_page).map_err(map)?;
    device
        .write_scratchpad(master_page, 8, full_bind_code.as_bytes())
        .map_err(map)?;
    device
        .sha_function(ShaCommand::ComputeNextSecret, master_page)
        .map_err(map)?;
    device.copy_secret(dest_slot).map_err(map)?;
    debug!(master_page, dest_slot, "Bound secret on device");
    Ok(())
}
