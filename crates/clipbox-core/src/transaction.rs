//! Cross-store unit of work
//!
//! The stores share no transaction manager, so a unit of work is a saga:
//! every participant's transaction is opened up front, and the scope closes
//! all of them on every exit path. Blob writes are applied eagerly and are
//! never compensated; the blob participant is therefore discarded rather than
//! committed.

use tracing::warn;

use crate::error::StorageError;
use crate::store::Transactional;

/// How a participant is finished when the scope succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Commit,
    Discard,
}

/// One store taking part in a [`TransactionScope`].
pub struct Participant<'a> {
    label: &'static str,
    store: &'a dyn Transactional,
    finish: Finish,
}

impl<'a> Participant<'a> {
    /// A store whose transaction is committed when the scope commits.
    pub fn commit(label: &'static str, store: &'a dyn Transactional) -> Self {
        Self {
            label,
            store,
            finish: Finish::Commit,
        }
    }

    /// A store whose transaction is only opened for symmetry and is cancelled
    /// even when the scope commits.
    pub fn discard(label: &'static str, store: &'a dyn Transactional) -> Self {
        Self {
            label,
            store,
            finish: Finish::Discard,
        }
    }
}

/// Open transactions across several stores, closed exactly once.
///
/// Dropping a scope that was neither committed nor aborted cancels every
/// participant, which also covers unwinding out of a panicking job.
pub struct TransactionScope<'a> {
    participants: Vec<Participant<'a>>,
    open: bool,
}

impl<'a> TransactionScope<'a> {
    /// Begin a transaction on every participant, in order.
    ///
    /// If any begin fails, all participants are cancelled and the error is
    /// returned.
    pub fn begin(participants: Vec<Participant<'a>>) -> Result<Self, StorageError> {
        for participant in &participants {
            if let Err(err) = participant.store.begin_transaction() {
                warn!(store = participant.label, error = %err, "failed to begin transaction");
                for opened in &participants {
                    opened.store.cancel_transaction_if_needed();
                }
                return Err(err);
            }
        }
        Ok(Self {
            participants,
            open: true,
        })
    }

    /// Finish every participant according to its [`Finish`].
    ///
    /// On the first failed commit the remaining participants are cancelled
    /// and the error is returned. Participants committed before the failure
    /// stay committed.
    pub fn commit_all(mut self) -> Result<(), StorageError> {
        self.open = false;
        for (position, participant) in self.participants.iter().enumerate() {
            match participant.finish {
                Finish::Commit => {
                    if let Err(err) = participant.store.commit_transaction() {
                        warn!(store = participant.label, error = %err, "failed to commit transaction");
                        for rest in &self.participants[position..] {
                            rest.store.cancel_transaction_if_needed();
                        }
                        return Err(err);
                    }
                }
                Finish::Discard => participant.store.cancel_transaction_if_needed(),
            }
        }
        Ok(())
    }

    /// Cancel every participant.
    pub fn abort_all(mut self) {
        self.cancel_all();
    }

    fn cancel_all(&mut self) {
        self.open = false;
        for participant in &self.participants {
            participant.store.cancel_transaction_if_needed();
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.open {
            self.cancel_all();
        }
    }
}
