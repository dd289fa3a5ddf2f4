//! In-memory user token with write fault injection

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::{AuthenticatedRead, TokenFamily, UserToken, WRITE_CHUNK_LEN};
use crate::account::{AccountRecord, RECORD_LEN};
use crate::error::{Error, Result};
use crate::service::ServiceInfo;
use crate::sha::{bind_secret, compute_mac, sha_function, ShaCommand, ShaContext};
use crate::types::{Challenge, Mac, Scratchpad, Secret, TokenAddress};

const CHUNKS: usize = RECORD_LEN / WRITE_CHUNK_LEN;

/// Failure applied to a single `write_account_data` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// Land the first `chunks` chunks, highest address first, then fail
    Interrupt { chunks: usize },
    /// Land every chunk with `mask` XORed into chunk `chunk`, report success
    Corrupt { chunk: usize, mask: u8 },
    /// Land nothing and report the write unconfirmed
    Drop,
    /// Land every chunk, then fail before acknowledging
    LostAck,
}

/// Token backed by a 32-byte buffer
///
/// Writes land in 8-byte chunks from the end of the page towards the start,
/// so the record header is always the last chunk written.
#[derive(Debug)]
pub struct MemoryToken {
    family: TokenFamily,
    address: TokenAddress,
    page: u8,
    secret: Secret,
    data: [u8; RECORD_LEN],
    counter: u32,
    faults: VecDeque<WriteFault>,
    sticky_fault: Option<WriteFault>,
    failing_reads: usize,
    failing_auth_reads: usize,
    writes: usize,
    refreshes: usize,
}

impl MemoryToken {
    pub fn new(family: TokenFamily, address: TokenAddress, page: u8, secret: Secret) -> Result<Self> {
        if page > family.max_page() {
            return Err(Error::InvalidPage(page));
        }
        Ok(Self {
            family,
            address,
            page,
            secret,
            data: [0xFF; RECORD_LEN],
            counter: 0,
            faults: VecDeque::new(),
            sticky_fault: None,
            failing_reads: 0,
            failing_auth_reads: 0,
            writes: 0,
            refreshes: 0,
        })
    }

    /// Token whose secret is bound from the service's authentication secret
    pub fn provision(
        family: TokenFamily,
        address: TokenAddress,
        page: u8,
        auth_master: &Secret,
        service: &ServiceInfo,
    ) -> Result<Self> {
        let full = family.full_bind_code(&service.bind_code, page, &address);
        let secret = bind_secret(auth_master, &service.bind_data, &full)?;
        debug!(address = %address.to_hex(), page, ?family, "Provisioned memory token");
        Self::new(family, address, page, secret)
    }

    /// Raw page contents
    pub fn data(&self) -> AccountRecord {
        AccountRecord(self.data)
    }

    /// Overwrite the page without touching counters or faults
    pub fn set_data(&mut self, record: &AccountRecord) {
        self.data = record.0;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Number of `write_account_data` calls seen so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes
    }

    /// Apply `fault` to the next write that is not already claimed
    pub fn queue_fault(&mut self, fault: WriteFault) {
        self.faults.push_back(fault);
    }

    /// Apply `fault` to every write once the queue is empty
    pub fn set_sticky_fault(&mut self, fault: Option<WriteFault>) {
        self.sticky_fault = fault;
    }

    pub fn fail_next_reads(&mut self, count: usize) {
        self.failing_reads = count;
    }

    pub fn fail_next_auth_reads(&mut self, count: usize) {
        self.failing_auth_reads = count;
    }

    fn land_chunks(&mut self, bytes: &[u8; RECORD_LEN], chunks: usize) {
        for index in (0..CHUNKS).rev().take(chunks) {
            let start = index * WRITE_CHUNK_LEN;
            self.data[start..start + WRITE_CHUNK_LEN].copy_from_slice(&bytes[start..start + WRITE_CHUNK_LEN]);
        }
        if chunks > 0 {
            self.counter = self.counter.wrapping_add(1);
        }
    }

    fn authentication_mac(&self, challenge: &Challenge) -> Result<Mac> {
        let mut pad = Scratchpad::erased();
        pad.set_challenge(challenge);
        match self.family {
            TokenFamily::Ds1963S => {
                let context = ShaContext {
                    address: self.address,
                    page: self.page,
                    write_counter: self.current_counter().unwrap_or(u32::MAX),
                };
                sha_function(
                    ShaCommand::ReadAuthenticatedPage,
                    &self.secret,
                    &self.data,
                    &mut pad,
                    Some(&context),
                )?;
                Ok(pad.mac())
            }
            TokenFamily::Ds1961S => {
                pad.0[12] = (self.page & 0x3F) | 0x40;
                pad.0[13..20].copy_from_slice(&self.address.serial7());
                Ok(Mac(compute_mac(self.secret.as_bytes(), &self.data, pad.as_bytes())))
            }
        }
    }

    fn current_counter(&self) -> Option<u32> {
        self.family
            .has_write_counter(self.page)
            .then_some(self.counter)
    }
}

impl UserToken for MemoryToken {
    fn family(&self) -> TokenFamily {
        self.family
    }

    fn address(&self) -> TokenAddress {
        self.address
    }

    fn account_page(&self) -> u8 {
        self.page
    }

    fn read_account_data(&mut self) -> Result<AccountRecord> {
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(Error::TokenIo("injected read failure".to_string()));
        }
        Ok(AccountRecord(self.data))
    }

    fn read_authenticated(&mut self, challenge: &Challenge) -> Result<AuthenticatedRead> {
        if self.failing_auth_reads > 0 {
            self.failing_auth_reads -= 1;
            return Err(Error::AuthenticatedRead("injected read failure".to_string()));
        }
        let mac = self.authentication_mac(challenge)?;
        Ok(AuthenticatedRead {
            record: AccountRecord(self.data),
            mac,
            write_counter: self.current_counter(),
        })
    }

    fn write_account_data(&mut self, record: &AccountRecord) -> Result<bool> {
        self.writes += 1;
        let fault = self.faults.pop_front().or(self.sticky_fault);

        match fault {
            None => {
                self.land_chunks(&record.0, CHUNKS);
                Ok(true)
            }
            Some(WriteFault::Interrupt { chunks }) => {
                warn!(chunks, "Injected interrupted write");
                self.land_chunks(&record.0, chunks.min(CHUNKS));
                Err(Error::TokenIo(format!("write interrupted after {} chunks", chunks)))
            }
            Some(WriteFault::Corrupt { chunk, mask }) => {
                warn!(chunk, mask, "Injected corrupted write");
                let mut bytes = record.0;
                let start = (chunk % CHUNKS) * WRITE_CHUNK_LEN;
                for b in &mut bytes[start..start + WRITE_CHUNK_LEN] {
                    *b ^= mask;
                }
                self.land_chunks(&bytes, CHUNKS);
                Ok(true)
            }
            Some(WriteFault::Drop) => {
                warn!("Injected dropped write");
                Ok(false)
            }
            Some(WriteFault::LostAck) => {
                warn!("Injected lost write acknowledgement");
                self.land_chunks(&record.0, CHUNKS);
                Err(Error::TokenIo("write acknowledgement lost".to_string()))
            }
        }
    }

    fn write_cycle_counter(&mut self) -> Result<Option<u32>> {
        Ok(self.current_counter())
    }

    fn refresh(&mut self) -> Result<bool> {
        if !self.family.supports_refresh() {
            return Ok(false);
        }
        self.refreshes += 1;
        Ok(true)
    }
}
