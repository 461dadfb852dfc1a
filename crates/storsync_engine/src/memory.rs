//! In-memory local store.

use crate::error::{SyncError, SyncResult};
use crate::store::{LocalStore, LocalTransaction, RecordTable};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use storsync_protocol::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, KeyGenerator, Manifest, RawId,
    RecordKind, StorageId, StorageRecord, StorageRecordUpdate, StoryDistributionListRecord,
    SyncRecord,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct LocalState {
    /// Persisted manifest in its encoded form; empty before the first sync.
    manifest: Vec<u8>,
    contacts: Vec<ContactRecord>,
    groups_v1: Vec<GroupV1Record>,
    migrated_v1: HashSet<Vec<u8>>,
    groups_v2: Vec<GroupV2Record>,
    account: Option<AccountRecord>,
    distribution_lists: Vec<StoryDistributionListRecord>,
    unknown: Vec<StorageId>,
    inserts_applied: u64,
    updates_applied: u64,
}

/// A local store kept in memory, used by tests and local tooling.
///
/// Transactions take the store lock for their whole lifetime and work on a
/// staged copy, so a transaction that is dropped without committing leaves no
/// trace.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    state: Mutex<LocalState>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given account record.
    pub fn with_account(account: AccountRecord) -> Self {
        let store = Self::new();
        store.state.lock().account = Some(account);
        store
    }

    /// Adds a contact.
    pub fn add_contact(&self, contact: ContactRecord) {
        self.state.lock().contacts.push(contact);
    }

    /// Adds a legacy group.
    pub fn add_group_v1(&self, group: GroupV1Record) {
        self.state.lock().groups_v1.push(group);
    }

    /// Records that a legacy group has a v2 counterpart.
    pub fn mark_group_v1_migrated(&self, group_id: &[u8]) {
        self.state.lock().migrated_v1.insert(group_id.to_vec());
    }

    /// Adds a group.
    pub fn add_group_v2(&self, group: GroupV2Record) {
        self.state.lock().groups_v2.push(group);
    }

    /// Adds a story distribution list.
    pub fn add_distribution_list(&self, list: StoryDistributionListRecord) {
        self.state.lock().distribution_lists.push(list);
    }

    /// Removes the account record.
    pub fn remove_account(&self) {
        self.state.lock().account = None;
    }

    /// Returns the contact with the given ACI.
    pub fn contact(&self, aci: &Uuid) -> Option<ContactRecord> {
        let state = self.state.lock();
        state.contacts.iter().find(|c| c.aci.as_ref() == Some(aci)).cloned()
    }

    /// Returns every contact.
    pub fn contacts(&self) -> Vec<ContactRecord> {
        self.state.lock().contacts.clone()
    }

    /// Returns every group.
    pub fn groups_v2(&self) -> Vec<GroupV2Record> {
        self.state.lock().groups_v2.clone()
    }

    /// Returns the account record.
    pub fn account(&self) -> Option<AccountRecord> {
        self.state.lock().account.clone()
    }

    /// Returns every story distribution list.
    pub fn distribution_lists(&self) -> Vec<StoryDistributionListRecord> {
        self.state.lock().distribution_lists.clone()
    }

    /// Returns the unknown-record side table.
    pub fn unknown_ids(&self) -> Vec<StorageId> {
        self.state.lock().unknown.clone()
    }

    /// Returns the persisted manifest.
    pub fn manifest(&self) -> SyncResult<Manifest> {
        decode_manifest(&self.state.lock().manifest)
    }

    /// Overwrites the persisted manifest.
    pub fn set_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        self.state.lock().manifest = manifest.encode()?;
        Ok(())
    }

    /// Number of inserts applied by sync.
    pub fn inserts_applied(&self) -> u64 {
        self.state.lock().inserts_applied
    }

    /// Number of updates applied by sync.
    pub fn updates_applied(&self) -> u64 {
        self.state.lock().updates_applied
    }
}

fn decode_manifest(bytes: &[u8]) -> SyncResult<Manifest> {
    if bytes.is_empty() {
        Ok(Manifest::empty())
    } else {
        Ok(Manifest::decode(bytes)?)
    }
}

impl LocalStore for MemoryLocalStore {
    type Transaction<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> SyncResult<MemoryTransaction<'_>> {
        let guard = self.state.lock();
        let staged = guard.clone();
        Ok(MemoryTransaction { guard, staged })
    }
}

/// Transaction over a [`MemoryLocalStore`].
pub struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, LocalState>,
    staged: LocalState,
}

/// Replaces the record whose id is `update.old`'s id.
fn replace<T: SyncRecord>(records: &mut [T], update: StorageRecordUpdate<T>) -> SyncResult<()> {
    let slot = records
        .iter_mut()
        .find(|r| r.id() == update.old.id())
        .ok_or_else(|| {
            SyncError::LocalStore(format!("no local {:?} with id {}", T::KIND, update.old.id()))
        })?;
    *slot = update.new;
    Ok(())
}

fn rotate<T: SyncRecord>(records: &mut [T], keys: &dyn KeyGenerator) {
    for record in records {
        record.set_id(StorageId::generate(T::KIND, keys));
    }
}

impl RecordTable<ContactRecord> for MemoryTransaction<'_> {
    fn apply_insert(&mut self, record: ContactRecord) -> SyncResult<()> {
        self.staged.inserts_applied += 1;
        self.staged.contacts.push(record);
        Ok(())
    }

    fn apply_update(&mut self, update: StorageRecordUpdate<ContactRecord>) -> SyncResult<()> {
        if update.changed(|c| c.blocked) {
            debug!(
                id = %update.new.id,
                blocked = update.new.blocked,
                "contact block state changed"
            );
        }
        self.staged.updates_applied += 1;
        replace(&mut self.staged.contacts, update)
    }
}

impl RecordTable<GroupV1Record> for MemoryTransaction<'_> {
    fn apply_insert(&mut self, record: GroupV1Record) -> SyncResult<()> {
        self.staged.inserts_applied += 1;
        self.staged.groups_v1.push(record);
        Ok(())
    }

    fn apply_update(&mut self, update: StorageRecordUpdate<GroupV1Record>) -> SyncResult<()> {
        self.staged.updates_applied += 1;
        replace(&mut self.staged.groups_v1, update)
    }
}

impl RecordTable<GroupV2Record> for MemoryTransaction<'_> {
    fn apply_insert(&mut self, record: GroupV2Record) -> SyncResult<()> {
        self.staged.inserts_applied += 1;
        self.staged.groups_v2.push(record);
        Ok(())
    }

    fn apply_update(&mut self, update: StorageRecordUpdate<GroupV2Record>) -> SyncResult<()> {
        if update.changed(|g| g.muted_until) {
            debug!(id = %update.new.id, muted_until = update.new.muted_until, "group mute changed");
        }
        self.staged.updates_applied += 1;
        replace(&mut self.staged.groups_v2, update)
    }
}

impl RecordTable<AccountRecord> for MemoryTransaction<'_> {
    fn apply_insert(&mut self, _record: AccountRecord) -> SyncResult<()> {
        Err(SyncError::invariant("account record can only be updated"))
    }

    fn apply_update(&mut self, update: StorageRecordUpdate<AccountRecord>) -> SyncResult<()> {
        match &self.staged.account {
            Some(current) if current.id == update.old.id => {
                self.staged.updates_applied += 1;
                self.staged.account = Some(update.new);
                Ok(())
            }
            _ => Err(SyncError::LocalStore(format!(
                "no local account with id {}",
                update.old.id
            ))),
        }
    }
}

impl RecordTable<StoryDistributionListRecord> for MemoryTransaction<'_> {
    fn apply_insert(&mut self, record: StoryDistributionListRecord) -> SyncResult<()> {
        self.staged.inserts_applied += 1;
        self.staged.distribution_lists.push(record);
        Ok(())
    }

    fn apply_update(
        &mut self,
        update: StorageRecordUpdate<StoryDistributionListRecord>,
    ) -> SyncResult<()> {
        if update.changed(|l| l.is_deleted()) {
            debug!(id = %update.new.id, "distribution list deleted remotely");
        }
        self.staged.updates_applied += 1;
        replace(&mut self.staged.distribution_lists, update)
    }
}

impl LocalTransaction for MemoryTransaction<'_> {
    fn manifest(&self) -> SyncResult<Manifest> {
        decode_manifest(&self.staged.manifest)
    }

    fn save_manifest(&mut self, manifest: &Manifest) -> SyncResult<()> {
        self.staged.manifest = manifest.encode()?;
        Ok(())
    }

    fn storage_ids(&self) -> SyncResult<Vec<StorageId>> {
        let s = &self.staged;
        Ok(s.contacts
            .iter()
            .map(|r| r.id)
            .chain(s.groups_v1.iter().map(|r| r.id))
            .chain(s.groups_v2.iter().map(|r| r.id))
            .chain(s.account.iter().map(|r| r.id))
            .chain(s.distribution_lists.iter().map(|r| r.id))
            .chain(s.unknown.iter().copied())
            .collect())
    }

    fn record_by_storage_id(&self, id: &StorageId) -> SyncResult<Option<StorageRecord>> {
        let s = &self.staged;
        let found = match id.kind() {
            RecordKind::Contact => s
                .contacts
                .iter()
                .find(|r| r.id == *id)
                .map(|r| r.clone().into_storage_record()),
            RecordKind::GroupV1 => s
                .groups_v1
                .iter()
                .find(|r| r.id == *id)
                .map(|r| r.clone().into_storage_record()),
            RecordKind::GroupV2 => s
                .groups_v2
                .iter()
                .find(|r| r.id == *id)
                .map(|r| r.clone().into_storage_record()),
            RecordKind::Account => s
                .account
                .iter()
                .find(|r| r.id == *id)
                .map(|r| r.clone().into_storage_record()),
            RecordKind::StoryDistributionList => s
                .distribution_lists
                .iter()
                .find(|r| r.id == *id)
                .map(|r| r.clone().into_storage_record()),
            RecordKind::Unknown(_) => None,
        };
        Ok(found)
    }

    fn rotate_storage_ids(&mut self, keys: &dyn KeyGenerator) -> SyncResult<()> {
        let s = &mut self.staged;
        rotate(&mut s.contacts, keys);
        rotate(&mut s.groups_v1, keys);
        rotate(&mut s.groups_v2, keys);
        if let Some(account) = s.account.as_mut() {
            account.set_id(StorageId::generate(RecordKind::Account, keys));
        }
        rotate(&mut s.distribution_lists, keys);
        Ok(())
    }

    fn contact_by_aci(&self, aci: &Uuid) -> SyncResult<Option<ContactRecord>> {
        Ok(self
            .staged
            .contacts
            .iter()
            .find(|c| c.aci.as_ref() == Some(aci))
            .cloned())
    }

    fn contact_by_pni(&self, pni: &Uuid) -> SyncResult<Option<ContactRecord>> {
        Ok(self
            .staged
            .contacts
            .iter()
            .find(|c| c.pni.as_ref() == Some(pni))
            .cloned())
    }

    fn contact_by_e164(&self, e164: &str) -> SyncResult<Option<ContactRecord>> {
        Ok(self
            .staged
            .contacts
            .iter()
            .find(|c| c.e164.as_deref() == Some(e164))
            .cloned())
    }

    fn group_v1_by_id(&self, group_id: &[u8]) -> SyncResult<Option<GroupV1Record>> {
        Ok(self
            .staged
            .groups_v1
            .iter()
            .find(|g| g.group_id == group_id)
            .cloned())
    }

    fn group_v1_is_migrated(&self, group_id: &[u8]) -> SyncResult<bool> {
        Ok(self.staged.migrated_v1.contains(group_id))
    }

    fn group_v2_by_master_key(&self, master_key: &[u8]) -> SyncResult<Option<GroupV2Record>> {
        Ok(self
            .staged
            .groups_v2
            .iter()
            .find(|g| g.master_key == master_key)
            .cloned())
    }

    fn account(&self) -> SyncResult<Option<AccountRecord>> {
        Ok(self.staged.account.clone())
    }

    fn distribution_list_by_id(
        &self,
        distribution_id: &Uuid,
    ) -> SyncResult<Option<StoryDistributionListRecord>> {
        Ok(self
            .staged
            .distribution_lists
            .iter()
            .find(|l| l.distribution_id().as_ref() == Some(distribution_id))
            .cloned())
    }

    fn insert_unknown(&mut self, ids: &[StorageId]) -> SyncResult<()> {
        for id in ids {
            if !self.staged.unknown.iter().any(|u| u.raw() == id.raw()) {
                self.staged.unknown.push(*id);
            }
        }
        Ok(())
    }

    fn delete_unknown(&mut self, raw_ids: &[RawId]) -> SyncResult<()> {
        self.staged.unknown.retain(|id| !raw_ids.contains(id.raw()));
        Ok(())
    }

    fn unknown_by_kinds(&self, kinds: &[RecordKind]) -> SyncResult<Vec<StorageId>> {
        Ok(self
            .staged
            .unknown
            .iter()
            .filter(|id| kinds.contains(&id.kind()))
            .copied()
            .collect())
    }

    fn unknown_ids(&self) -> SyncResult<Vec<StorageId>> {
        Ok(self.staged.unknown.clone())
    }

    fn commit(mut self) -> SyncResult<()> {
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }
}
