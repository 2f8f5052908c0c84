//! Nested transactions over a single backend connection.
//!
//! A [`TransactionManager`] owns the depth counter of one adapter instance.
//! The outermost `start` opens a native transaction; inner ones issue a
//! savepoint named `transaction{n}` on backends that have them and only bump
//! the counter on session-style backends. Whatever happens during commit or
//! rollback, a failure leaves the manager idle so the adapter can never stay
//! wedged in an open transaction.

use std::fmt;

use tracing::{debug, info, warn};

use crate::types::Result;

/// Observable state of a [`TransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// No transaction is open.
    Idle,
    /// A transaction is open at the given nesting depth (>= 1).
    Active {
        /// Current nesting depth.
        depth: u32,
    },
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Idle => f.write_str("Idle"),
            TxState::Active { depth } => write!(f, "Active(depth={depth})"),
        }
    }
}

/// Native operations a backend performs on behalf of the manager.
pub trait TransactionBackend {
    /// Opens the outermost transaction or session.
    fn begin(&mut self) -> Result<()>;
    /// Commits the outermost transaction.
    fn commit(&mut self) -> Result<()>;
    /// Rolls back the outermost transaction.
    fn rollback(&mut self) -> Result<()>;
    /// Whether nested levels map to native savepoints.
    fn supports_savepoints(&self) -> bool {
        false
    }
    /// Creates a named savepoint.
    fn savepoint(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
    /// Rolls back to a named savepoint.
    fn rollback_to(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Savepoint name for a nesting level.
pub fn savepoint_name(level: u32) -> String {
    format!("transaction{level}")
}

/// Depth counter plus savepoint bookkeeping.
#[derive(Debug, Default)]
pub struct TransactionManager {
    depth: u32,
}

impl TransactionManager {
    /// Idle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        match self.depth {
            0 => TxState::Idle,
            depth => TxState::Active { depth },
        }
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.depth > 0
    }

    /// Opens a transaction or a nested level.
    pub fn start(&mut self, backend: &mut dyn TransactionBackend) -> Result<bool> {
        let outcome = if self.depth == 0 {
            backend.begin()
        } else if backend.supports_savepoints() {
            let name = savepoint_name(self.depth);
            debug!(savepoint = %name, "creating savepoint");
            backend.savepoint(&name)
        } else {
            Ok(())
        };
        if let Err(err) = outcome {
            warn!(depth = self.depth, error = %err, "failed to start transaction");
            self.depth = 0;
            return Err(err);
        }
        self.depth += 1;
        debug!(depth = self.depth, "transaction started");
        Ok(true)
    }

    /// Commits the current level. Only the outermost level reaches the
    /// backend; with nothing open this returns `Ok(false)`.
    pub fn commit(&mut self, backend: &mut dyn TransactionBackend) -> Result<bool> {
        match self.depth {
            0 => {
                debug!("commit requested with no active transaction");
                Ok(false)
            }
            1 => {
                let outcome = backend.commit();
                self.depth = 0;
                match outcome {
                    Ok(()) => {
                        info!("transaction committed");
                        Ok(true)
                    }
                    Err(err) => {
                        warn!(error = %err, "commit failed; transaction state reset");
                        Err(err)
                    }
                }
            }
            _ => {
                self.depth -= 1;
                debug!(depth = self.depth, "nested transaction committed");
                Ok(true)
            }
        }
    }

    /// Rolls back the current level: to the matching savepoint when nested,
    /// the whole transaction at depth 1. With nothing open this returns
    /// `Ok(false)`.
    pub fn rollback(&mut self, backend: &mut dyn TransactionBackend) -> Result<bool> {
        match self.depth {
            0 => {
                debug!("rollback requested with no active transaction");
                Ok(false)
            }
            1 => {
                let outcome = backend.rollback();
                self.depth = 0;
                match outcome {
                    Ok(()) => {
                        warn!("transaction rolled back");
                        Ok(true)
                    }
                    Err(err) => {
                        warn!(error = %err, "rollback failed; transaction state reset");
                        Err(err)
                    }
                }
            }
            depth => {
                let outcome = if backend.supports_savepoints() {
                    let name = savepoint_name(depth - 1);
                    debug!(savepoint = %name, "rolling back to savepoint");
                    backend.rollback_to(&name)
                } else {
                    Ok(())
                };
                match outcome {
                    Ok(()) => {
                        self.depth -= 1;
                        Ok(true)
                    }
                    Err(err) => {
                        warn!(depth, error = %err, "savepoint rollback failed; transaction state reset");
                        self.depth = 0;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Forces the manager idle without touching the backend.
    pub fn reset(&mut self) {
        if self.depth > 0 {
            warn!(depth = self.depth, "transaction state reset");
        }
        self.depth = 0;
    }
}

/// Transaction surface shared by every adapter.
pub trait Transactional {
    /// Opens a transaction or a nested level.
    fn start_transaction(&mut self) -> Result<bool>;
    /// Commits the current level.
    fn commit_transaction(&mut self) -> Result<bool>;
    /// Rolls back the current level.
    fn rollback_transaction(&mut self) -> Result<bool>;
    /// Current state.
    fn transaction_state(&self) -> TxState;

    /// Current nesting depth.
    fn transaction_depth(&self) -> u32 {
        match self.transaction_state() {
            TxState::Idle => 0,
            TxState::Active { depth } => depth,
        }
    }

    /// Runs `f` inside a transaction level: commit on success, rollback on
    /// failure. The error returned is always the one `f` produced; a failing
    /// rollback is only logged.
    fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.start_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback_transaction() {
                    warn!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "rollback after failed transaction body also failed"
                    );
                }
                Err(err)
            }
        }
    }
}
