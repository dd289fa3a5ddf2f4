//! Transaction engine
//!
//! Drives one debit at a time against a user token:
//!
//! ```text
//! Idle -> Setup
//!      -> UserVerified -> DataVerified -> Executed
//!                                     \-> Failed(kind)
//! ```
//!
//! `setup_transaction_data` runs once per token. Each purchase then runs
//! `verify_user`, `verify_transaction_data`, and `execute_transaction` in
//! order. A new record is only promoted to the cached current record once the
//! token write is confirmed, directly or through the [`Reconciler`].
//!
//! Operations take `&mut self`; one engine serves one caller at a time. The
//! coprocessor behind it may be shared between engines.

use std::sync::Arc;

use rand::{Rng, RngCore};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, error, info, warn};

use purse_core::{
    decode_signed, decode_unsigned_dual, encode_signed, encode_unsigned_dual, signed_preimage,
    AccountRecord, Challenge, CoprocessorIdentity, Mac, RecordLayout, RecordSlot, Scratchpad,
    SigningContext, TokenAddress, TokenFamily, UserToken,
};

use crate::config::EngineConfig;
use crate::error::{ErrorKind, Result, TransactionError};
use crate::params::{Parameter, TransactionParams};
use crate::reconciler::{ReconcileTarget, Reconciler};

/// Where the engine is in the debit sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Setup,
    UserVerified,
    DataVerified,
    Executed,
    Failed(ErrorKind),
}

/// Decoded account state after `verify_transaction_data`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub balance: u32,
    pub transaction_id: u16,
    /// Authoritative record for the UnsignedDual layout
    pub slot: Option<RecordSlot>,
    /// Header repair written after recovering from a bad pointer
    pub repaired: bool,
}

/// Buffers reused across every operation of one engine
#[derive(Debug, Clone)]
pub(crate) struct EngineScratch {
    pub(crate) challenge: Challenge,
    pub(crate) scratchpad: Scratchpad,
    pub(crate) mac: Mac,
    /// Token the cached record belongs to
    pub(crate) address: Option<TokenAddress>,
    /// Last record read from or confirmed on the token
    pub(crate) current: Option<AccountRecord>,
    /// Write-cycle counter seen with `current`
    pub(crate) write_counter: Option<u32>,
    pub(crate) balance: Option<u32>,
    pub(crate) transaction_id: u16,
    pub(crate) old_record: AccountRecord,
    pub(crate) new_record: AccountRecord,
}

impl Default for EngineScratch {
    fn default() -> Self {
        Self {
            challenge: Challenge::new([0; 3]),
            scratchpad: Scratchpad::erased(),
            mac: Mac::new([0; 20]),
            address: None,
            current: None,
            write_counter: None,
            balance: None,
            transaction_id: 0,
            old_record: AccountRecord::zeroed(),
            new_record: AccountRecord::zeroed(),
        }
    }
}

impl EngineScratch {
    fn clear(&mut self) {
        self.address = None;
        self.current = None;
        self.write_counter = None;
        self.balance = None;
    }
}

/// Debit engine for one deployment
pub struct TransactionEngine {
    coprocessor: Arc<dyn CoprocessorIdentity>,
    config: EngineConfig,
    params: TransactionParams,
    rng: Box<dyn RngCore + Send>,
    state: EngineState,
    last_error: Option<ErrorKind>,
    scratch: EngineScratch,
}

impl std::fmt::Debug for TransactionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEngine")
            .field("config", &self.config)
            .field("params", &self.params)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl TransactionEngine {
    /// Create an engine drawing transaction ids from `rng`
    pub fn new(
        coprocessor: Arc<dyn CoprocessorIdentity>,
        config: EngineConfig,
        rng: impl RngCore + Send + 'static,
    ) -> Result<Self> {
        config.validate()?;
        let params = TransactionParams {
            debit_amount: config.debit_amount,
            initial_amount: config.initial_amount,
            user_balance: 0,
        };
        info!(layout = ?config.layout, "Created transaction engine");
        Ok(Self {
            coprocessor,
            config,
            params,
            rng: Box::new(rng),
            state: EngineState::Idle,
            last_error: None,
            scratch: EngineScratch::default(),
        })
    }

    pub fn with_entropy(coprocessor: Arc<dyn CoprocessorIdentity>, config: EngineConfig) -> Result<Self> {
        Self::new(coprocessor, config, ChaCha20Rng::from_entropy())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Kind of the last failed transaction operation
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn get_parameter(&self, parameter: Parameter) -> u32 {
        self.params.get(parameter)
    }

    pub fn set_parameter(&mut self, parameter: Parameter, value: u32) -> Result<()> {
        self.params.set(parameter, value)
    }

    pub fn reset_parameters(&mut self) {
        self.params.reset();
    }

    // =========================================================================
    // Transaction operations
    // =========================================================================

    /// Write a fresh record holding the initial amount
    pub fn setup_transaction_data<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<()> {
        self.last_error = None;
        let result = self.setup_inner(token);
        self.finish(result)
    }

    /// Challenge the token and check its answer with the coprocessor
    pub fn verify_user<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<()> {
        self.last_error = None;
        self.scratch.clear();
        let result = self.verify_user_inner(token);
        self.finish(result)
    }

    /// Check the integrity of the record read by `verify_user`
    pub fn verify_transaction_data<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<AccountSnapshot> {
        self.last_error = None;
        let result = self.verify_data_inner(token);
        self.finish(result)
    }

    /// Debit the configured amount
    ///
    /// `Ok(true)` means the new balance is confirmed on the token. `Ok(false)`
    /// means the token still holds the old record; `last_error` is then
    /// `WriteFailed`. With `verify_success`, or `verify_after_write` in the
    /// config, the result is always confirmed by a fresh authenticated read.
    pub fn execute_transaction<T: UserToken + ?Sized>(
        &mut self,
        token: &mut T,
        verify_success: bool,
    ) -> Result<bool> {
        self.last_error = None;
        let result = self.execute_inner(token, verify_success);
        let result = self.finish(result);
        if let Ok(false) = result {
            self.last_error = Some(ErrorKind::WriteFailed);
            self.state = EngineState::Failed(ErrorKind::WriteFailed);
        }
        result
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if let Some(kind) = e.kind() {
                warn!(?kind, error = %e, "Transaction operation failed");
                self.last_error = Some(kind);
                self.state = EngineState::Failed(kind);
            }
        }
        result
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn setup_inner<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<()> {
        self.scratch.clear();
        let balance = self.params.initial_amount;
        let record = match self.config.layout {
            RecordLayout::Signed => self.encode_signed_for(token, balance, 0)?,
            RecordLayout::UnsignedDual => {
                encode_unsigned_dual(&AccountRecord::zeroed(), balance, 0, token.account_page())?.0
            }
        };

        match token.write_account_data(&record) {
            Ok(true) => {}
            Ok(false) => {
                return Err(TransactionError::WriteFailed(
                    "setup write not confirmed".to_string(),
                ))
            }
            Err(e) => return Err(TransactionError::WriteFailed(e.to_string())),
        }

        self.scratch.transaction_id = 0;
        self.params.user_balance = balance;
        self.state = EngineState::Setup;
        info!(address = %token.address().to_hex(), balance, "Account set up");
        Ok(())
    }

    fn verify_user_inner<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<()> {
        let (record, write_counter) = self.authenticate(token)?;
        self.scratch.address = Some(token.address());
        self.scratch.current = Some(record);
        self.scratch.write_counter = write_counter;
        self.state = EngineState::UserVerified;
        info!(address = %token.address().to_hex(), "User token authenticated");
        Ok(())
    }

    /// One challenge-response round; returns the authenticated record
    fn authenticate<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<(AccountRecord, Option<u32>)> {
        self.scratch.challenge = self.coprocessor.generate_challenge(0)?;
        let read = token
            .read_authenticated(&self.scratch.challenge)
            .map_err(|e| TransactionError::AuthReadFailed(e.to_string()))?;

        self.scratch.scratchpad = authentication_scratchpad(
            token.family(),
            token.account_page(),
            &token.address(),
            &self.scratch.challenge,
            read.write_counter,
        );
        self.scratch.mac = read.mac;
        debug!(
            record = %read.record.to_hex(),
            scratchpad = %self.scratch.scratchpad.to_hex(),
            "Authenticated read"
        );

        let full_bind_code = token.full_bind_code(&self.coprocessor.service().bind_code);
        let matched = self.coprocessor.verify_authentication(
            &full_bind_code,
            &read.record.0,
            &self.scratch.scratchpad,
            &self.scratch.mac,
            token.auth_command(),
        )?;
        if !matched {
            return Err(TransactionError::AuthFailed);
        }
        Ok((read.record, read.write_counter))
    }

    fn verified_record<T: UserToken + ?Sized>(&self, token: &T) -> Result<AccountRecord> {
        match (self.scratch.address, self.scratch.current) {
            (Some(address), Some(record)) if address == token.address() => Ok(record),
            _ => Err(TransactionError::InvalidState(
                "token has not been authenticated".to_string(),
            )),
        }
    }

    fn verify_data_inner<T: UserToken + ?Sized>(&mut self, token: &mut T) -> Result<AccountSnapshot> {
        if !matches!(self.state, EngineState::UserVerified | EngineState::DataVerified) {
            return Err(TransactionError::InvalidState(format!(
                "cannot verify data in state {:?}",
                self.state
            )));
        }
        let record = self.verified_record(token)?;
        let page = token.account_page();

        let snapshot = match self.config.layout {
            RecordLayout::Signed => {
                let view = decode_signed(&record, page)?;
                let service = self.coprocessor.service();
                let preimage = signed_preimage(&record, &service.initial_signature);
                let context = SigningContext {
                    address: token.address(),
                    page,
                    write_counter: self.scratch.write_counter,
                };
                self.scratch.scratchpad = context.scratchpad(&service.signing_challenge);
                if !self
                    .coprocessor
                    .verify_signature(&preimage, &self.scratch.scratchpad, &view.signature)?
                {
                    return Err(TransactionError::BadAccountData(
                        "record signature mismatch".to_string(),
                    ));
                }
                AccountSnapshot {
                    balance: view.balance,
                    transaction_id: view.transaction_id,
                    slot: None,
                    repaired: false,
                }
            }
            RecordLayout::UnsignedDual => {
                let view = decode_unsigned_dual(&record, page)?;
                let repaired = view.needs_repair && self.repair_header(token, &view.canonical);
                if repaired {
                    self.scratch.current = Some(view.canonical);
                }
                AccountSnapshot {
                    balance: view.balance,
                    transaction_id: view.transaction_id,
                    slot: Some(view.slot),
                    repaired,
                }
            }
        };

        self.scratch.balance = Some(snapshot.balance);
        self.scratch.transaction_id = snapshot.transaction_id;
        self.params.user_balance = snapshot.balance;
        self.state = EngineState::DataVerified;
        info!(balance = snapshot.balance, "Account data verified");
        Ok(snapshot)
    }

    /// Rewrite a recovered dual record with its canonical header
    fn repair_header<T: UserToken + ?Sized>(&mut self, token: &mut T, canonical: &AccountRecord) -> bool {
        for attempt in 1..=self.config.repair_attempts {
            match token.write_account_data(canonical) {
                Ok(true) => {
                    info!(attempt, "Repaired account header");
                    return true;
                }
                Ok(false) => warn!(attempt, "Header repair not confirmed"),
                Err(e) => warn!(attempt, error = %e, "Header repair failed"),
            }
        }
        warn!(
            attempts = self.config.repair_attempts,
            "Header repair abandoned, recovered balance still used"
        );
        false
    }

    fn execute_inner<T: UserToken + ?Sized>(&mut self, token: &mut T, verify_success: bool) -> Result<bool> {
        if self.state != EngineState::DataVerified {
            return Err(TransactionError::InvalidState(format!(
                "cannot execute in state {:?}",
                self.state
            )));
        }
        let old = self.verified_record(token)?;
        let balance = self.scratch.balance.ok_or_else(|| {
            TransactionError::InvalidState("account data has not been verified".to_string())
        })?;

        let debit = self.params.debit_amount;
        let new_balance = balance
            .checked_sub(debit)
            .ok_or(TransactionError::InsufficientFunds { balance, debit })?;
        let transaction_id = self.next_transaction_id();

        let intended = match self.config.layout {
            RecordLayout::Signed => self.encode_signed_for(token, new_balance, transaction_id)?,
            RecordLayout::UnsignedDual => {
                let base = decode_unsigned_dual(&old, token.account_page())?.canonical;
                encode_unsigned_dual(&base, new_balance, transaction_id, token.account_page())?.0
            }
        };
        self.scratch.old_record = old;
        self.scratch.new_record = intended;

        let written = match token.write_account_data(&intended) {
            Ok(true) => true,
            Ok(false) => {
                warn!("Debit write not confirmed");
                false
            }
            Err(e) => {
                warn!(error = %e, "Debit write failed");
                false
            }
        };

        let confirmed = if written && !verify_success && !self.config.verify_after_write {
            true
        } else {
            let reconciler = Reconciler::new(self.config.reconcile_attempts);
            let mut intended = self.scratch.new_record;
            let outcome = {
                let mut target = EngineTarget {
                    engine: &mut *self,
                    token: &mut *token,
                    balance: new_balance,
                    transaction_id,
                };
                reconciler.reconcile(&mut target, &old, &mut intended)
            };
            match outcome {
                Ok(confirmed) => {
                    self.scratch.new_record = intended;
                    confirmed
                }
                Err(e) => {
                    error!(address = %token.address().to_hex(), "Debit left the token in an unknown state");
                    self.scratch.clear();
                    return Err(e);
                }
            }
        };

        if !confirmed {
            info!(balance, "Debit did not take effect");
            return Ok(false);
        }

        self.scratch.current = Some(self.scratch.new_record);
        self.scratch.balance = Some(new_balance);
        self.scratch.transaction_id = transaction_id;
        self.params.user_balance = new_balance;
        self.state = EngineState::Executed;
        info!(balance = new_balance, debit, transaction_id, "Debit confirmed");
        Ok(true)
    }

    /// Sign a record for the counter value the next write will produce
    fn encode_signed_for<T: UserToken + ?Sized>(
        &self,
        token: &mut T,
        balance: u32,
        transaction_id: u16,
    ) -> Result<AccountRecord> {
        let counter = token
            .write_cycle_counter()
            .map_err(|e| TransactionError::ReadFailed(e.to_string()))?;
        let context = SigningContext {
            address: token.address(),
            page: token.account_page(),
            write_counter: counter.map(|c| c.wrapping_add(1)),
        };
        Ok(encode_signed(balance, transaction_id, &context, self.coprocessor.as_ref())?)
    }

    /// Random, nonzero, and different from the previous id
    fn next_transaction_id(&mut self) -> u16 {
        loop {
            let id: u16 = self.rng.gen();
            if id != 0 && id != self.scratch.transaction_id {
                return id;
            }
        }
    }
}

/// Authentication scratchpad for a token's answer to `challenge`
///
/// counter[8..12] · page[12] · address[13..20] · challenge[20..23]
fn authentication_scratchpad(
    family: TokenFamily,
    page: u8,
    address: &TokenAddress,
    challenge: &Challenge,
    write_counter: Option<u32>,
) -> Scratchpad {
    let mut pad = Scratchpad::erased();
    pad.set_write_counter(write_counter);
    pad.0[12] = match family {
        TokenFamily::Ds1963S => page & 0x0F,
        TokenFamily::Ds1961S => (page & 0x3F) | 0x40,
    };
    pad.0[13..20].copy_from_slice(&address.serial7());
    pad.set_challenge(challenge);
    pad
}

/// Token plus engine, seen by the reconciler
struct EngineTarget<'a, T: UserToken + ?Sized> {
    engine: &'a mut TransactionEngine,
    token: &'a mut T,
    balance: u32,
    transaction_id: u16,
}

impl<T: UserToken + ?Sized> ReconcileTarget for EngineTarget<'_, T> {
    fn refresh(&mut self) -> Result<bool> {
        Ok(self.token.refresh()?)
    }

    fn observe(&mut self) -> Result<AccountRecord> {
        let (record, _) = self.engine.authenticate(self.token)?;
        Ok(record)
    }

    fn rewrite(&mut self, intended: &mut AccountRecord) -> Result<bool> {
        if self.engine.config.layout == RecordLayout::Signed {
            *intended = self
                .engine
                .encode_signed_for(self.token, self.balance, self.transaction_id)?;
        }
        self.token
            .write_account_data(intended)
            .map_err(|e| TransactionError::WriteFailed(e.to_string()))
    }
}
