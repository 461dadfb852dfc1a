//! Routing fetched remote records to their processors.
//!
//! Everything here runs inside the merge-phase transaction and is generic over
//! [`LocalTransaction`] alone; there is no remote store in scope.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::processor::{
    process_batch, AccountProcessor, BatchOutcome, ContactProcessor, GroupV1Processor,
    GroupV2Processor, StoryDistributionListProcessor,
};
use crate::store::LocalTransaction;
use storsync_protocol::{KeyGenerator, StorageId, StorageRecord};
use tracing::debug;

/// One processor per known record kind.
#[derive(Debug, Clone)]
pub struct Processors {
    contacts: ContactProcessor,
    groups_v1: GroupV1Processor,
    groups_v2: GroupV2Processor,
    account: AccountProcessor,
    distribution_lists: StoryDistributionListProcessor,
}

impl Processors {
    /// Builds the processors for this device.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            contacts: ContactProcessor::new(config.self_identity.clone(), config.is_primary_device),
            groups_v1: GroupV1Processor,
            groups_v2: GroupV2Processor,
            account: AccountProcessor,
            distribution_lists: StoryDistributionListProcessor,
        }
    }
}

/// Result of applying one set of remote records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// Combined processor counts over every kind.
    pub outcome: BatchOutcome,
    /// Ids staged in the unknown-record side table.
    pub deferred: usize,
}

/// Applies fetched remote records to local state.
///
/// Records of kinds `config` does not enable, and records of unrecognized kinds,
/// are not decoded further: their ids go to the unknown-record side table.
pub fn apply_remote_records<Tx: LocalTransaction>(
    tx: &mut Tx,
    processors: &Processors,
    config: &SyncConfig,
    records: Vec<StorageRecord>,
    keys: &dyn KeyGenerator,
) -> SyncResult<MergeSummary> {
    let mut deferred: Vec<StorageId> = Vec::new();
    let mut contacts = Vec::new();
    let mut groups_v1 = Vec::new();
    let mut groups_v2 = Vec::new();
    let mut accounts = Vec::new();
    let mut distribution_lists = Vec::new();

    for record in records {
        if !config.is_enabled(record.kind()) {
            deferred.push(*record.id());
            continue;
        }
        match record {
            StorageRecord::Contact(r) => contacts.push(r),
            StorageRecord::GroupV1(r) => groups_v1.push(r),
            StorageRecord::GroupV2(r) => groups_v2.push(r),
            StorageRecord::Account(r) => accounts.push(r),
            StorageRecord::StoryDistributionList(r) => distribution_lists.push(r),
            StorageRecord::Unknown(r) => deferred.push(r.id),
        }
    }

    let mut summary = MergeSummary {
        deferred: deferred.len(),
        ..MergeSummary::default()
    };
    if !deferred.is_empty() {
        debug!(count = deferred.len(), "staging records of unprocessed kinds");
        tx.insert_unknown(&deferred)?;
    }

    let outcome = &mut summary.outcome;
    outcome.absorb(process_batch(&processors.contacts, tx, contacts, keys)?);
    outcome.absorb(process_batch(&processors.groups_v1, tx, groups_v1, keys)?);
    outcome.absorb(process_batch(&processors.groups_v2, tx, groups_v2, keys)?);
    outcome.absorb(process_batch(&processors.account, tx, accounts, keys)?);
    outcome.absorb(process_batch(
        &processors.distribution_lists,
        tx,
        distribution_lists,
        keys,
    )?);

    Ok(summary)
}
