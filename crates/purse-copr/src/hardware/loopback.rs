//! In-process SHA device model
//!
//! Behaves like a DS1963S coprocessor on the bus: sixteen data pages, eight
//! secret slots shared by page pairs, and one scratchpad. Each page carries a
//! write-cycle counter that feeds `ComputeChallenge`, so consecutive
//! challenges differ.

use purse_core::sha::{sha_function, ShaContext};
use purse_core::{Error, Mac, Result, Scratchpad, Secret, ShaCommand, TokenAddress, SECRET_SLOTS};

const PAGES: usize = 16;

#[derive(Debug)]
pub struct LoopbackDevice {
    address: TokenAddress,
    pages: [[u8; 32]; PAGES],
    counters: [u32; PAGES],
    secrets: [Secret; SECRET_SLOTS],
    scratchpad: Scratchpad,
    target: u8,
    failing_commands: usize,
}

impl LoopbackDevice {
    pub fn new(address: TokenAddress) -> Self {
        Self {
            address,
            pages: [[0u8; 32]; PAGES],
            counters: [0; PAGES],
            secrets: Default::default(),
            scratchpad: Scratchpad::erased(),
            target: 0,
            failing_commands: 0,
        }
    }

    /// Place `secret` in the slot serving `page`
    pub fn install_secret(&mut self, page: u8, secret: Secret) {
        self.secrets[usize::from(page & 7)] = secret;
    }

    pub fn secret(&self, slot: u8) -> Secret {
        self.secrets[usize::from(slot & 7)].clone()
    }

    pub fn page(&self, page: u8) -> Result<[u8; 32]> {
        Ok(self.pages[page_index(page)?])
    }

    /// Fail the next `count` device commands with a bus error
    pub fn fail_next_commands(&mut self, count: usize) {
        self.failing_commands = count;
    }

    fn command(&mut self, name: &str) -> Result<()> {
        if self.failing_commands > 0 {
            self.failing_commands -= 1;
            return Err(Error::CoprocessorIo(format!("{}: no presence pulse", name)));
        }
        Ok(())
    }
}

fn page_index(page: u8) -> Result<usize> {
    let index = usize::from(page);
    if index >= PAGES {
        return Err(Error::InvalidPage(page));
    }
    Ok(index)
}

impl super::ShaDevice for LoopbackDevice {
    fn address(&self) -> TokenAddress {
        self.address
    }

    fn erase_scratchpad(&mut self, page: u8) -> Result<()> {
        self.command("erase scratchpad")?;
        page_index(page)?;
        self.scratchpad = Scratchpad::erased();
        self.target = page;
        Ok(())
    }

    fn write_data_page(&mut self, page: u8, data: &[u8; 32]) -> Result<()> {
        self.command("write data page")?;
        let index = page_index(page)?;
        self.pages[index] = *data;
        self.counters[index] = self.counters[index].wrapping_add(1);
        Ok(())
    }

    fn write_scratchpad(&mut self, page: u8, offset: usize, data: &[u8]) -> Result<()> {
        self.command("write scratchpad")?;
        page_index(page)?;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= Scratchpad::LEN)
            .ok_or_else(|| {
                Error::CoprocessorIo(format!(
                    "scratchpad write of {} bytes at {} overflows",
                    data.len(),
                    offset
                ))
            })?;
        self.scratchpad.0[offset..end].copy_from_slice(data);
        self.target = page;
        Ok(())
    }

    fn read_scratchpad(&mut self) -> Result<Scratchpad> {
        self.command("read scratchpad")?;
        Ok(self.scratchpad)
    }

    fn sha_function(&mut self, command: ShaCommand, page: u8) -> Result<()> {
        self.command("sha function")?;
        let index = page_index(page)?;
        let context = ShaContext {
            address: self.address,
            page,
            write_counter: self.counters[index],
        };
        if command == ShaCommand::ComputeChallenge {
            self.counters[index] = self.counters[index].wrapping_add(1);
        }
        sha_function(
            command,
            &self.secrets[index & 7],
            &self.pages[index],
            &mut self.scratchpad,
            Some(&context),
        )
    }

    fn match_scratchpad(&mut self, mac: &Mac) -> Result<bool> {
        self.command("match scratchpad")?;
        Ok(self.scratchpad.mac().ct_matches(mac))
    }

    fn copy_secret(&mut self, slot: u8) -> Result<()> {
        self.command("copy secret")?;
        let mut secret = [0u8; Secret::LEN];
        secret.copy_from_slice(&self.scratchpad.0[..Secret::LEN]);
        self.secrets[usize::from(slot & 7)] = Secret::new(secret);
        Ok(())
    }
}
