//! The integrity fixpoint.
//!
//! Each pass asks every modified entity to check itself, then asks every
//! entity related to a deleted id (the ids it referenced, and the entities
//! still referencing it) to do the same. Passes repeat until one leaves the
//! change signature untouched. A deletion during a pass abandons the pass.

use super::Transaction;
use crate::entity::{Entity, EntityId};
use crate::error::{StoreError, StoreResult};
use crate::query::FnQuery;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Digest of the working set: modified ids, deleted ids and deltas.
pub(crate) type ChangeSignature = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassOutcome {
    Completed,
    Restarted,
}

impl Transaction {
    /// Repeats integrity passes until the working set stops changing.
    ///
    /// Only completed passes count toward `max_integrity_passes`. Every
    /// restart adds a new id to the deleted set, so restarts get their own
    /// budget sized by the entities that can be deleted at all.
    pub(super) fn ensure_integrity(&mut self) -> StoreResult<()> {
        let max_passes = self.context.config.max_integrity_passes;
        let max_restarts = self.context.backend.size() + self.modified.size() + max_passes;
        let mut passes = 0;
        let mut restarts = 0;

        loop {
            if passes >= max_passes || restarts > max_restarts {
                tracing::warn!(transaction = %self.id, passes, restarts, "integrity repair did not converge");
                return Err(StoreError::IntegrityNotConverged { passes });
            }

            let before = self.change_signature();
            self.ensuring_integrity = true;
            let outcome = self.integrity_pass();
            self.ensuring_integrity = false;
            self.context.stats.record_integrity_pass();

            match outcome? {
                PassOutcome::Restarted => {
                    restarts += 1;
                    self.context.stats.record_integrity_restart();
                    tracing::debug!(transaction = %self.id, restarts, deleted = self.deleted.len(), "integrity pass restarted");
                }
                PassOutcome::Completed => {
                    passes += 1;
                    if self.change_signature() == before {
                        tracing::debug!(transaction = %self.id, passes, restarts, "integrity converged");
                        return Ok(());
                    }
                    tracing::debug!(transaction = %self.id, pass = passes, "integrity pass changed the working set");
                }
            }
        }
    }

    fn integrity_pass(&mut self) -> StoreResult<PassOutcome> {
        let mut checked = BTreeSet::new();

        for id in self.modified.ids() {
            // An earlier check in this pass may have dropped it.
            if !self.modified.contains_with_id(&id) {
                continue;
            }
            checked.insert(id.clone());
            if let Some(outcome) = absorb_restart(self.check_entity(&id))? {
                return Ok(outcome);
            }
        }

        for (id, affected) in self.cascade_targets() {
            tracing::debug!(transaction = %self.id, %id, affected = affected.len(), "cascade");
            for target in affected {
                if self.deleted.contains(&target) || !checked.insert(target.clone()) {
                    continue;
                }
                if let Some(outcome) = absorb_restart(self.check_entity(&target))? {
                    return Ok(outcome);
                }
            }
        }

        Ok(PassOutcome::Completed)
    }

    /// Entities each deletion may have left dangling: the ids the deleted
    /// entity referenced, when it is still resolvable in the backend, and
    /// every visible entity referencing it.
    ///
    /// Referrers of all deleted ids are collected in a single scan.
    fn cascade_targets(&self) -> BTreeMap<EntityId, BTreeSet<EntityId>> {
        let deleted = &self.deleted;
        let mut targets: BTreeMap<EntityId, BTreeSet<EntityId>> = deleted
            .iter()
            .map(|id| {
                let referenced = self
                    .context
                    .backend
                    .get_by_id(id)
                    .map(|entity| entity.referenced_ids())
                    .unwrap_or_default();
                (id.clone(), referenced.into_iter().collect())
            })
            .collect();

        let referrers = self.find_all(&FnQuery::new(|entity: &dyn Entity| {
            entity.referenced_ids().iter().any(|id| deleted.contains(id))
        }));
        for referrer in &referrers {
            for id in referrer.referenced_ids() {
                if let Some(affected) = targets.get_mut(&id) {
                    affected.insert(referrer.id().clone());
                }
            }
        }

        for (id, affected) in &mut targets {
            affected.remove(id);
        }
        targets
    }

    /// Checks out one entity, runs its hook and puts it back if it is
    /// still part of the working set.
    fn check_entity(&mut self, id: &EntityId) -> StoreResult<()> {
        let tracked = self.modified.contains_with_id(id);
        let mut entity = match self.modified.remove(id) {
            Some(entity) => entity,
            None => match self.context.backend.get_by_id(id) {
                Ok(entity) => entity,
                Err(_) => return Ok(()),
            },
        };

        self.checking = Some(id.clone());
        let result = entity.ensure_integrity(self);
        self.checking = None;

        if !self.deleted.contains(id) && (tracked || self.modified.contains_with_id(id)) {
            self.modified.add(entity);
        }
        result
    }

    pub(crate) fn change_signature(&self) -> ChangeSignature {
        let mut hasher = Sha256::new();

        let mut modified = self.modified.ids();
        modified.sort();
        for id in &modified {
            hasher.update(b"m");
            hasher.update(id.as_str().as_bytes());
            hasher.update([0u8]);
        }
        for id in &self.deleted {
            hasher.update(b"d");
            hasher.update(id.as_str().as_bytes());
            hasher.update([0u8]);
        }
        for (id, delta) in &self.properties {
            hasher.update(b"p");
            hasher.update(id.as_str().as_bytes());
            for (field, value) in delta {
                hasher.update([0u8]);
                hasher.update(field.as_bytes());
                match value {
                    Some(value) => {
                        hasher.update([1u8]);
                        hasher.update(value.as_bytes());
                    }
                    None => hasher.update([2u8]),
                }
            }
            hasher.update([0u8]);
        }

        hasher.finalize().into()
    }
}

/// Turns a restart signal into a pass outcome; other errors propagate.
fn absorb_restart(result: StoreResult<()>) -> StoreResult<Option<PassOutcome>> {
    match result {
        Ok(()) => Ok(None),
        Err(StoreError::IntegrityRestart) => Ok(Some(PassOutcome::Restarted)),
        Err(err) => Err(err),
    }
}
