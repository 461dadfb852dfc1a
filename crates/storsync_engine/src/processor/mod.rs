//! Per-kind record processors.
//!
//! Each processor validates, matches, merges and applies one kind of remote
//! record. [`process_batch`] drives a processor over every remote-only record of
//! its kind in one ordered stream:
//!
//! 1. `is_invalid` filters, threading the processor's fold state (`Seen`)
//! 2. survivors describing the same entity as an earlier survivor are dropped
//! 3. each remaining record is matched against local state by business key
//! 4. matches are merged and applied as updates, the rest are inserted

mod account;
mod contact;
mod distribution_list;
mod group;

pub use account::AccountProcessor;
pub use contact::ContactProcessor;
pub use distribution_list::StoryDistributionListProcessor;
pub use group::{GroupV1Processor, GroupV2Processor};

use crate::error::{SyncError, SyncResult};
use crate::store::LocalTransaction;
use std::cmp::Ordering;
use storsync_protocol::{KeyGenerator, StorageId, StorageRecordUpdate, SyncRecord};
use tracing::{debug, warn};

/// Validate / match / merge / apply for one record kind.
pub trait RecordProcessor {
    /// The record kind handled.
    type Record: SyncRecord;

    /// Accumulator threaded through one batch, for kinds that allow only one
    /// live record of some sort.
    type Seen: Default;

    /// Returns true if the remote record must be dropped.
    fn is_invalid<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &Self::Record,
        seen: &mut Self::Seen,
    ) -> SyncResult<bool>;

    /// Finds the local record for the same entity, by business key.
    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &Self::Record,
    ) -> SyncResult<Option<Self::Record>>;

    /// Reconciles a remote record with its local counterpart.
    ///
    /// Returns `remote` itself if the result equals it, `local` itself if the
    /// result equals that, and otherwise a new record under a fresh id.
    fn merge(
        &self,
        remote: &Self::Record,
        local: &Self::Record,
        keys: &dyn KeyGenerator,
    ) -> Self::Record;

    /// Stores a record with no local counterpart.
    fn insert_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        record: Self::Record,
    ) -> SyncResult<()>;

    /// Applies a merged record over its local counterpart.
    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<Self::Record>,
    ) -> SyncResult<()>;

    /// Business-key order; `Equal` means both describe the same entity.
    fn compare(&self, a: &Self::Record, b: &Self::Record) -> Ordering;
}

/// Counts from one [`process_batch`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records with no local counterpart.
    pub inserted: usize,
    /// Records merged into a changed local record.
    pub updated: usize,
    /// Records whose merge left the local record as it was.
    pub unchanged: usize,
    /// Records dropped by `is_invalid`.
    pub invalid: usize,
    /// Records dropped as a second copy of one entity.
    pub duplicates: usize,
}

impl BatchOutcome {
    /// Adds another outcome's counts to this one.
    pub fn absorb(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.invalid += other.invalid;
        self.duplicates += other.duplicates;
    }
}

/// Runs one kind's remote records through its processor.
///
/// Per-record problems are contained here; only local-store failures and
/// protocol invariant violations abort the batch.
pub fn process_batch<P, Tx>(
    processor: &P,
    tx: &mut Tx,
    records: Vec<P::Record>,
    keys: &dyn KeyGenerator,
) -> SyncResult<BatchOutcome>
where
    P: RecordProcessor,
    Tx: LocalTransaction,
{
    let mut outcome = BatchOutcome::default();
    let mut seen = P::Seen::default();
    let mut accepted: Vec<P::Record> = Vec::with_capacity(records.len());

    for remote in records {
        if processor.is_invalid(tx, &remote, &mut seen)? {
            outcome.invalid += 1;
            continue;
        }
        if accepted
            .iter()
            .any(|kept| processor.compare(kept, &remote) == Ordering::Equal)
        {
            warn!(id = %remote.id(), kind = ?P::Record::KIND, "dropping duplicate remote record");
            outcome.duplicates += 1;
            continue;
        }
        accepted.push(remote);
    }

    for remote in accepted {
        match processor.get_matching(tx, &remote)? {
            Some(local) => {
                let merged = processor.merge(&remote, &local, keys);
                if merged == local {
                    outcome.unchanged += 1;
                } else {
                    debug!(local = %local.id(), merged = %merged.id(), "applying merged record");
                    processor.update_local(tx, StorageRecordUpdate::new(local, merged))?;
                    outcome.updated += 1;
                }
            }
            None => {
                debug!(id = %remote.id(), kind = ?P::Record::KIND, "inserting remote record");
                processor.insert_local(tx, remote)?;
                outcome.inserted += 1;
            }
        }
    }

    Ok(outcome)
}

/// Picks the id-stable result of a merge.
///
/// `candidate` is the field-merged value; it is compared against both inputs
/// ignoring storage ids so an unchanged record keeps its id.
pub(crate) fn settle_merge<T: SyncRecord>(
    candidate: T,
    remote: &T,
    local: &T,
    keys: &dyn KeyGenerator,
) -> T {
    if candidate.eq_ignoring_id(remote) {
        remote.clone()
    } else if candidate.eq_ignoring_id(local) {
        local.clone()
    } else {
        candidate.with_id(StorageId::generate(T::KIND, keys))
    }
}

/// Logs a rejected remote record. Always returns true.
pub(crate) fn reject(id: &StorageId, reason: impl Into<String>) -> bool {
    let err = SyncError::InvalidRecord {
        id: *id,
        reason: reason.into(),
    };
    warn!(error = %err, "dropping remote record");
    true
}

/// Returns the non-empty one of `remote` and `local`, preferring `remote`.
pub(crate) fn prefer_non_empty<T: AsRef<[u8]> + Clone>(remote: &T, local: &T) -> T {
    if remote.as_ref().is_empty() {
        local.clone()
    } else {
        remote.clone()
    }
}
