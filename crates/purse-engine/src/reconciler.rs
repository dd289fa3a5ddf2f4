//! Post-write reconciliation
//!
//! A token write can fail after some chunks landed, or report success while
//! the medium holds corrupted bytes. The reconciler re-reads the token and
//! settles on one of the two canonical outcomes:
//!
//! | Observed bytes      | Outcome                         |
//! |---------------------|---------------------------------|
//! | old record          | `Ok(false)`, debit did not land |
//! | intended record     | `Ok(true)`, debit confirmed     |
//! | anything else       | rewrite and try again           |
//!
//! Running out of attempts is a `CatastrophicFailure`, never `Ok(false)`.

use tracing::{debug, error, warn};

use purse_core::AccountRecord;

use crate::error::{Result, TransactionError};

/// Token operations the reconciler drives
pub trait ReconcileTarget {
    /// Re-energize weakly programmed bits; `Ok(false)` if unsupported
    fn refresh(&mut self) -> Result<bool>;

    /// Authenticated read of the bytes currently on the token
    fn observe(&mut self) -> Result<AccountRecord>;

    /// Write `intended` again
    ///
    /// The target may re-encode `intended` first; the caller compares future
    /// observations against whatever it holds afterwards.
    fn rewrite(&mut self, intended: &mut AccountRecord) -> Result<bool>;
}

/// Bounded read-compare-rewrite loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    max_attempts: usize,
}

impl Reconciler {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn reconcile<R: ReconcileTarget + ?Sized>(
        &self,
        target: &mut R,
        old: &AccountRecord,
        intended: &mut AccountRecord,
    ) -> Result<bool> {
        for attempt in 1..=self.max_attempts {
            if let Err(e) = target.refresh() {
                warn!(attempt, error = %e, "Token refresh failed");
            }

            let observed = match target.observe() {
                Ok(record) => record,
                Err(e) => {
                    warn!(attempt, error = %e, "Reconciliation read failed");
                    continue;
                }
            };
            debug!(attempt, observed = %observed.to_hex(), "Reconciliation read");

            if observed == *old {
                debug!(attempt, "Token still holds the old record");
                return Ok(false);
            }
            if observed == *intended {
                debug!(attempt, "Token holds the intended record");
                return Ok(true);
            }

            warn!(attempt, "Token holds neither record, rewriting");
            match target.rewrite(intended) {
                Ok(true) => {}
                Ok(false) => warn!(attempt, "Rewrite not confirmed"),
                Err(e) => warn!(attempt, error = %e, "Rewrite failed"),
            }
        }

        error!(
            attempts = self.max_attempts,
            "Token state is ambiguous after reconciliation"
        );
        Err(TransactionError::CatastrophicFailure {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::VecDeque;

    /// Scripted token state
    struct Script {
        reads: VecDeque<Result<AccountRecord>>,
        rewrites: usize,
        refreshes: usize,
    }

    impl Script {
        fn new(reads: Vec<Result<AccountRecord>>) -> Self {
            Self {
                reads: reads.into(),
                rewrites: 0,
                refreshes: 0,
            }
        }
    }

    impl ReconcileTarget for Script {
        fn refresh(&mut self) -> Result<bool> {
            self.refreshes += 1;
            Ok(true)
        }

        fn observe(&mut self) -> Result<AccountRecord> {
            self.reads
                .pop_front()
                .unwrap_or_else(|| Ok(AccountRecord::new([0xEE; 32])))
        }

        fn rewrite(&mut self, _intended: &mut AccountRecord) -> Result<bool> {
            self.rewrites += 1;
            Ok(true)
        }
    }

    fn old() -> AccountRecord {
        AccountRecord::new([0x01; 32])
    }

    fn new() -> AccountRecord {
        AccountRecord::new([0x02; 32])
    }

    #[test]
    fn test_old_record_means_not_spent() {
        let mut script = Script::new(vec![Ok(old())]);
        let result = Reconciler::new(4).reconcile(&mut script, &old(), &mut new());
        assert!(!result.unwrap());
        assert_eq!(script.rewrites, 0);
    }

    #[test]
    fn test_rewrite_until_intended() {
        let garbage = AccountRecord::new([0x55; 32]);
        let mut script = Script::new(vec![Ok(garbage), Err(TransactionError::AuthFailed), Ok(new())]);
        let result = Reconciler::new(4).reconcile(&mut script, &old(), &mut new());
        assert!(result.unwrap());
        assert_eq!(script.rewrites, 1);
        assert_eq!(script.refreshes, 3);
    }

    #[test]
    fn test_exhaustion_is_catastrophic() {
        let mut script = Script::new(Vec::new());
        let err = Reconciler::new(3)
            .reconcile(&mut script, &old(), &mut new())
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::CatastrophicFailure));
        assert_eq!(script.rewrites, 3);
    }

    #[test]
    fn test_zero_bound_still_checks_once() {
        let mut script = Script::new(vec![Ok(new())]);
        assert!(Reconciler::new(0)
            .reconcile(&mut script, &old(), &mut new())
            .unwrap());
    }
}
