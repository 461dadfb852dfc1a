//! Remote storage service abstraction.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use storsync_protocol::{Manifest, RawId, StorageId, StorageKey, StorageRecord};

/// The remote key-value record store shared by all linked devices.
///
/// This trait abstracts the network layer. Implementations authenticate with the
/// supplied key and return retryable [`SyncError::Transport`] errors for
/// transient failures.
pub trait RemoteStorage: Send + Sync {
    /// Fetches the remote manifest.
    ///
    /// Returns `None` if the remote version equals `known_version`, in which case
    /// the caller's manifest is current.
    fn get_manifest(&self, known_version: u64) -> SyncResult<Option<Manifest>>;

    /// Reads record bodies. May return fewer records than requested.
    fn read_records(&self, key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>>;

    /// Replaces the remote manifest, uploading `inserts` and dropping `deletes`.
    ///
    /// Returns `Some(current)` without writing anything if `manifest.version` is
    /// not exactly one past the remote version, `None` on success.
    fn write_records(
        &self,
        key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[RawId],
    ) -> SyncResult<Option<Manifest>>;
}

impl<T: RemoteStorage + ?Sized> RemoteStorage for Arc<T> {
    fn get_manifest(&self, known_version: u64) -> SyncResult<Option<Manifest>> {
        (**self).get_manifest(known_version)
    }

    fn read_records(&self, key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>> {
        (**self).read_records(key, ids)
    }

    fn write_records(
        &self,
        key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[RawId],
    ) -> SyncResult<Option<Manifest>> {
        (**self).write_records(key, manifest, inserts, deletes)
    }
}

#[derive(Debug, Default)]
struct RemoteState {
    manifest: Manifest,
    records: HashMap<RawId, StorageRecord>,
}

/// An in-process remote store, used by tests and local tooling.
///
/// Enforces the same version check a real storage service does, so several
/// engines sharing one instance behave like linked devices.
#[derive(Debug)]
pub struct InMemoryRemoteStorage {
    state: RwLock<RemoteState>,
    key: Option<StorageKey>,
    connected: AtomicBool,
    manifest_fetches: AtomicU64,
    record_reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryRemoteStorage {
    /// Creates an empty store at manifest version 0 that accepts any key.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RemoteState::default()),
            key: None,
            connected: AtomicBool::new(true),
            manifest_fetches: AtomicU64::new(0),
            record_reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Only accept requests made with this key.
    pub fn with_key(mut self, key: StorageKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Replaces the whole remote state.
    pub fn seed(&self, manifest: Manifest, records: impl IntoIterator<Item = StorageRecord>) {
        let mut state = self.state.write();
        state.manifest = manifest;
        state.records = records.into_iter().map(|r| (*r.id().raw(), r)).collect();
    }

    /// Returns the current manifest.
    pub fn manifest(&self) -> Manifest {
        self.state.read().manifest.clone()
    }

    /// Returns a stored record body.
    pub fn record(&self, raw: &RawId) -> Option<StorageRecord> {
        self.state.read().records.get(raw).cloned()
    }

    /// Returns the number of stored record bodies.
    pub fn record_count(&self) -> usize {
        self.state.read().records.len()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of manifest fetches served.
    pub fn manifest_fetches(&self) -> u64 {
        self.manifest_fetches.load(Ordering::SeqCst)
    }

    /// Number of record reads served.
    pub fn record_reads(&self) -> u64 {
        self.record_reads.load(Ordering::SeqCst)
    }

    /// Number of write attempts received, accepted or not.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> SyncResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("storage service unreachable"))
        }
    }

    fn check_key(&self, key: &StorageKey) -> SyncResult<()> {
        match &self.key {
            Some(expected) if expected != key => {
                Err(SyncError::transport_fatal("storage key rejected"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for InMemoryRemoteStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteStorage for InMemoryRemoteStorage {
    fn get_manifest(&self, known_version: u64) -> SyncResult<Option<Manifest>> {
        self.check_connected()?;
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read();
        if state.manifest.version == known_version {
            Ok(None)
        } else {
            Ok(Some(state.manifest.clone()))
        }
    }

    fn read_records(&self, key: &StorageKey, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>> {
        self.check_connected()?;
        self.check_key(key)?;
        self.record_reads.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.records.get(id.raw()).cloned())
            .collect())
    }

    fn write_records(
        &self,
        key: &StorageKey,
        manifest: &Manifest,
        inserts: &[StorageRecord],
        deletes: &[RawId],
    ) -> SyncResult<Option<Manifest>> {
        self.check_connected()?;
        self.check_key(key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write();
        if manifest.version != state.manifest.version + 1 {
            return Ok(Some(state.manifest.clone()));
        }

        for raw in deletes {
            state.records.remove(raw);
        }
        for record in inserts {
            state.records.insert(*record.id().raw(), record.clone());
        }
        state.manifest = manifest.clone();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storsync_protocol::{ContactRecord, DeviceId, RecordKind, SyncRecord};

    fn contact(b: u8) -> StorageRecord {
        ContactRecord::new(StorageId::new(RecordKind::Contact, [b; 16])).into_storage_record()
    }

    fn key() -> StorageKey {
        StorageKey::from_bytes([1u8; 32])
    }

    #[test]
    fn unchanged_manifest_is_not_returned() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(Manifest::new(3, DeviceId(1), vec![]), []);

        assert!(remote.get_manifest(3).unwrap().is_none());
        assert_eq!(remote.get_manifest(2).unwrap().unwrap().version, 3);
        assert_eq!(remote.manifest_fetches(), 2);
    }

    #[test]
    fn read_returns_only_known_records() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(Manifest::empty(), [contact(1)]);

        let ids = [
            StorageId::new(RecordKind::Contact, [1u8; 16]),
            StorageId::new(RecordKind::Contact, [2u8; 16]),
        ];
        let records = remote.read_records(&key(), &ids).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn write_requires_next_version() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(Manifest::new(5, DeviceId(1), vec![]), []);

        let stale = Manifest::new(5, DeviceId(2), vec![]);
        let conflict = remote.write_records(&key(), &stale, &[], &[]).unwrap();
        assert_eq!(conflict.unwrap().version, 5);

        let next = Manifest::new(6, DeviceId(2), vec![*contact(1).id()]);
        assert!(remote.write_records(&key(), &next, &[contact(1)], &[]).unwrap().is_none());
        assert_eq!(remote.manifest(), next);
        assert_eq!(remote.record_count(), 1);
        assert_eq!(remote.writes(), 2);
    }

    #[test]
    fn write_applies_deletes() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(Manifest::empty(), [contact(1), contact(2)]);

        let next = Manifest::new(1, DeviceId(1), vec![*contact(2).id()]);
        remote.write_records(&key(), &next, &[], &[[1u8; 16]]).unwrap();
        assert!(remote.record(&[1u8; 16]).is_none());
        assert!(remote.record(&[2u8; 16]).is_some());
    }

    #[test]
    fn disconnected_is_retryable() {
        let remote = InMemoryRemoteStorage::new();
        remote.set_connected(false);

        let err = remote.get_manifest(0).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let remote = InMemoryRemoteStorage::new().with_key(key());
        let err = remote
            .read_records(&StorageKey::from_bytes([2u8; 32]), &[])
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
    }
}
