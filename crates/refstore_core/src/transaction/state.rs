//! Transaction lifecycle state.

use crate::error::{StoreError, StoreResult};
use std::fmt;

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Collecting changes.
    Active,
    /// Running the integrity fixpoint or writing the batch.
    Committing,
    /// The batch was applied. Terminal.
    Committed,
    /// Changes were discarded. Terminal.
    RolledBack,
}

impl TransactionState {
    /// Returns true for the terminal states.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Fails unless the transaction can still be committed or rolled back.
    pub(crate) fn ensure_active(self, operation: &str) -> StoreResult<()> {
        match self {
            Self::Active => Ok(()),
            Self::Committing => Err(StoreError::illegal_state(format!(
                "cannot {operation}: transaction is committing"
            ))),
            Self::Committed => Err(StoreError::illegal_state(format!(
                "cannot {operation}: transaction already committed"
            ))),
            Self::RolledBack => Err(StoreError::illegal_state(format!(
                "cannot {operation}: transaction already rolled back"
            ))),
        }
    }

    /// Fails unless changes may still be recorded.
    ///
    /// Integrity hooks record changes while the transaction is committing.
    pub(crate) fn ensure_recording(self) -> StoreResult<()> {
        match self {
            Self::Active | Self::Committing => Ok(()),
            finished => finished.ensure_active("record changes"),
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_may_finish() {
        assert!(TransactionState::Active.ensure_active("commit").is_ok());
        for state in [
            TransactionState::Committing,
            TransactionState::Committed,
            TransactionState::RolledBack,
        ] {
            assert!(matches!(
                state.ensure_active("commit"),
                Err(StoreError::IllegalState { .. })
            ));
        }
    }

    #[test]
    fn hooks_record_while_committing() {
        assert!(TransactionState::Committing.ensure_recording().is_ok());
        let err = TransactionState::Committed.ensure_recording().unwrap_err();
        assert!(err.to_string().contains("already committed"));
    }

    #[test]
    fn terminal_states() {
        assert!(!TransactionState::Active.is_finished());
        assert!(!TransactionState::Committing.is_finished());
        assert!(TransactionState::Committed.is_finished());
        assert!(TransactionState::RolledBack.is_finished());
    }
}
