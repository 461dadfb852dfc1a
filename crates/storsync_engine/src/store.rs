//! Local data store abstraction.
//!
//! All local reads and writes made by a sync pass go through a
//! [`LocalTransaction`]. A transaction holds no handle to the remote store, so
//! code that only receives a transaction cannot make network calls while local
//! write locks are held.

use crate::error::SyncResult;
use storsync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, KeyGenerator, Manifest, RawId,
    RecordKind, StorageId, StorageRecord, StorageRecordUpdate, StoryDistributionListRecord,
    SyncRecord,
};
use uuid::Uuid;

/// The on-device store holding contacts, groups, account settings and lists.
pub trait LocalStore: Send + Sync {
    /// Transaction type handed out by [`LocalStore::begin`].
    type Transaction<'a>: LocalTransaction
    where
        Self: 'a;

    /// Starts an atomic transaction. Dropping it without committing discards it.
    fn begin(&self) -> SyncResult<Self::Transaction<'_>>;
}

/// Applies merged records of one kind to local state.
pub trait RecordTable<T: SyncRecord> {
    /// Stores a record that has no local counterpart.
    fn apply_insert(&mut self, record: T) -> SyncResult<()>;

    /// Replaces `update.old` with `update.new`, applying side effects for the
    /// fields that changed.
    fn apply_update(&mut self, update: StorageRecordUpdate<T>) -> SyncResult<()>;
}

/// One atomic unit of local reads and writes.
pub trait LocalTransaction:
    RecordTable<ContactRecord>
    + RecordTable<GroupV1Record>
    + RecordTable<GroupV2Record>
    + RecordTable<AccountRecord>
    + RecordTable<StoryDistributionListRecord>
{
    /// Returns the last persisted manifest, or the empty manifest before the
    /// first sync.
    fn manifest(&self) -> SyncResult<Manifest>;

    /// Persists the manifest.
    fn save_manifest(&mut self, manifest: &Manifest) -> SyncResult<()>;

    /// Returns the current storage id of every local entity, plus every id in
    /// the unknown-record side table.
    fn storage_ids(&self) -> SyncResult<Vec<StorageId>>;

    /// Projects the local entity holding `id` into its remote form.
    fn record_by_storage_id(&self, id: &StorageId) -> SyncResult<Option<StorageRecord>>;

    /// Gives every local entity a fresh storage id.
    fn rotate_storage_ids(&mut self, keys: &dyn KeyGenerator) -> SyncResult<()>;

    /// Finds a contact by ACI.
    fn contact_by_aci(&self, aci: &Uuid) -> SyncResult<Option<ContactRecord>>;

    /// Finds a contact by PNI.
    fn contact_by_pni(&self, pni: &Uuid) -> SyncResult<Option<ContactRecord>>;

    /// Finds a contact by phone number.
    fn contact_by_e164(&self, e164: &str) -> SyncResult<Option<ContactRecord>>;

    /// Finds a legacy group by group id.
    fn group_v1_by_id(&self, group_id: &[u8]) -> SyncResult<Option<GroupV1Record>>;

    /// Returns true if the legacy group has been superseded by a v2 group.
    fn group_v1_is_migrated(&self, group_id: &[u8]) -> SyncResult<bool>;

    /// Finds a group by master key.
    fn group_v2_by_master_key(&self, master_key: &[u8]) -> SyncResult<Option<GroupV2Record>>;

    /// Returns the local account record.
    fn account(&self) -> SyncResult<Option<AccountRecord>>;

    /// Finds a story distribution list by its identifier.
    fn distribution_list_by_id(
        &self,
        distribution_id: &Uuid,
    ) -> SyncResult<Option<StoryDistributionListRecord>>;

    /// Adds ids to the unknown-record side table.
    fn insert_unknown(&mut self, ids: &[StorageId]) -> SyncResult<()>;

    /// Removes ids from the unknown-record side table.
    fn delete_unknown(&mut self, raw_ids: &[RawId]) -> SyncResult<()>;

    /// Returns side-table ids of the given kinds.
    fn unknown_by_kinds(&self, kinds: &[RecordKind]) -> SyncResult<Vec<StorageId>>;

    /// Returns every side-table id.
    fn unknown_ids(&self) -> SyncResult<Vec<StorageId>>;

    /// Makes every write of this transaction durable.
    fn commit(self) -> SyncResult<()>
    where
        Self: Sized;
}
