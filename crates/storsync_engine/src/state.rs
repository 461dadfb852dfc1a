//! Sync engine state machine.

use crate::apply::{apply_remote_records, MergeSummary, Processors};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{LocalStore, LocalTransaction};
use crate::transport::RemoteStorage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use storsync_protocol::{
    build_write_operation, find_id_differences, KeyGenerator, Manifest, RandomKeyGenerator, RawId,
    StorageId, StorageRecord,
};
use tracing::{debug, error, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass has run yet.
    Idle,
    /// Fetching the remote manifest.
    FetchManifest,
    /// Comparing remote and local id sets.
    Diffing,
    /// Fetching remote records and merging them into local state.
    Merging,
    /// Computing the records to upload.
    BuildingWriteSet,
    /// Writing to the remote store.
    Pushing,
    /// The last pass completed.
    Done,
    /// The last pass lost a write race; retry from the manifest fetch.
    ConflictRetry,
    /// The last pass failed and must not be retried as is.
    Aborted,
}

impl SyncState {
    /// Returns true if a pass is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::FetchManifest
                | SyncState::Diffing
                | SyncState::Merging
                | SyncState::BuildingWriteSet
                | SyncState::Pushing
        )
    }

    /// Returns true if the engine can start a new pass.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Remote records inserted locally.
    pub records_inserted: u64,
    /// Remote records merged into local records.
    pub records_merged: u64,
    /// Remote records dropped as invalid or duplicate.
    pub records_invalid: u64,
    /// Records uploaded to the remote store.
    pub records_pushed: u64,
    /// Writes rejected because the remote manifest moved.
    pub conflicts: u64,
    /// Retryable failures since the last completed pass.
    pub consecutive_failures: u32,
    /// Retries made by [`SyncEngine::sync_with_retry`].
    pub retries: u64,
    /// Completion time of the last pass.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote manifest version seen at the start of the pass.
    pub remote_version: u64,
    /// Local manifest version at the start of the pass.
    pub local_version: u64,
    /// Ids the remote had and local state did not.
    pub remote_only: usize,
    /// Ids local state had and the remote did not, before merging.
    pub local_only: usize,
    /// Merge-phase processor counts.
    pub merge: MergeSummary,
    /// Side-table ids that were fetched and processed in this pass.
    pub reclaimed: usize,
    /// Whether a write was accepted by the remote store.
    pub pushed: bool,
    /// Records uploaded.
    pub inserts_pushed: usize,
    /// Remote ids dropped.
    pub deletes_pushed: usize,
    /// Other devices should be told to sync.
    pub needs_multi_device_sync: bool,
    /// The caller must run [`SyncEngine::force_push`].
    pub force_push_required: bool,
    /// Side-table ids of processed kinds remain; schedule another pass.
    pub needs_reclaim_pass: bool,
}

/// The sync engine reconciles local state with the remote storage service.
///
/// All network calls happen between local transactions; a transaction never
/// spans one.
pub struct SyncEngine<R: RemoteStorage, L: LocalStore> {
    config: SyncConfig,
    remote: R,
    local: L,
    keys: Box<dyn KeyGenerator>,
    processors: Processors,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    pass_lock: Mutex<()>,
}

impl<R: RemoteStorage, L: LocalStore> SyncEngine<R, L> {
    /// Creates a new sync engine that mints ids from the system CSPRNG.
    pub fn new(config: SyncConfig, remote: R, local: L) -> Self {
        Self {
            processors: Processors::new(&config),
            config,
            remote,
            local,
            keys: Box::new(RandomKeyGenerator),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            pass_lock: Mutex::new(()),
        }
    }

    /// Replaces the storage id generator.
    pub fn with_key_generator(mut self, keys: impl KeyGenerator + 'static) -> Self {
        self.keys = Box::new(keys);
        self
    }

    /// Gets the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Gets the remote store.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Gets the local store.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// Consumes the engine, returning its stores.
    pub fn into_parts(self) -> (R, L) {
        (self.remote, self.local)
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true once enough consecutive retryable failures have piled up
    /// that telemetry should report sync as delayed.
    pub fn is_sync_delayed(&self) -> bool {
        self.stats.read().consecutive_failures >= self.config.delayed_after_failures
    }

    /// Requests that the running or next pass stop at its next phase boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a pending cancellation request.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            info!("sync pass cancelled");
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        debug!(?state, "sync state");
        *self.state.write() = state;
    }

    fn busy(&self, to: &str) -> SyncError {
        SyncError::InvalidStateTransition {
            from: format!("{:?}", self.state()),
            to: to.into(),
        }
    }

    /// Runs one sync pass: fetch, diff, merge, build the write set, push.
    ///
    /// Overlapping calls are coalesced: while a pass is in flight, further calls
    /// return [`SyncError::InvalidStateTransition`] without doing any work.
    pub fn run_sync_pass(&self) -> SyncResult<SyncReport> {
        let Some(_pass) = self.pass_lock.try_lock() else {
            debug!("sync pass already in flight");
            return Err(self.busy("FetchManifest"));
        };

        let result = self.pass();
        match &result {
            Ok(report) => {
                self.set_state(SyncState::Done);
                let mut stats = self.stats.write();
                stats.passes_completed += 1;
                stats.records_inserted += report.merge.outcome.inserted as u64;
                stats.records_merged += report.merge.outcome.updated as u64;
                stats.records_invalid +=
                    (report.merge.outcome.invalid + report.merge.outcome.duplicates) as u64;
                stats.records_pushed += report.inserts_pushed as u64;
                stats.consecutive_failures = 0;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => self.handle_error(e),
        }
        result
    }

    fn pass(&self) -> SyncResult<SyncReport> {
        let enabled = &self.config.enabled_kinds;

        self.set_state(SyncState::FetchManifest);
        let local_manifest = self.local.begin()?.manifest()?;
        let remote_manifest = self
            .remote
            .get_manifest(local_manifest.version)?
            .unwrap_or_else(|| local_manifest.clone());
        let version_regressed = remote_manifest.version < local_manifest.version;
        if version_regressed {
            warn!(
                remote = remote_manifest.version,
                local = local_manifest.version,
                "remote manifest version went backwards"
            );
        }
        self.check_cancelled()?;

        self.set_state(SyncState::Diffing);
        let (local_ids, reclaimable) = {
            let tx = self.local.begin()?;
            let reclaimable: Vec<StorageId> = tx
                .unknown_by_kinds(enabled)?
                .into_iter()
                .filter(|id| remote_manifest.contains_raw(id.raw()))
                .collect();
            (tx.storage_ids()?, reclaimable)
        };
        let diff = find_id_differences(&remote_manifest.storage_ids, &local_ids);
        debug!(
            version = remote_manifest.version,
            remote_only = diff.remote_only.len(),
            local_only = diff.local_only.len(),
            mismatch = diff.has_type_mismatches,
            "diffed manifests"
        );
        if diff.has_type_mismatches {
            warn!(version = remote_manifest.version, "remote and local disagree on record kinds");
        }
        self.check_cancelled()?;

        // Remote-only ids against an unchanged manifest are local edits that
        // rotated ids; the write set deletes them.
        self.set_state(SyncState::Merging);
        let remote_advanced = remote_manifest.version > local_manifest.version;
        let mut wanted = if remote_advanced {
            diff.remote_only.clone()
        } else {
            Vec::new()
        };
        wanted.extend(reclaimable.iter().copied());
        let fetched = self.read_remote(&wanted)?;
        self.check_cancelled()?;

        let merge = {
            let mut tx = self.local.begin()?;
            let merge = apply_remote_records(
                &mut tx,
                &self.processors,
                &self.config,
                fetched,
                self.keys.as_ref(),
            )?;

            let reclaimed: Vec<RawId> = reclaimable.iter().map(|id| *id.raw()).collect();
            tx.delete_unknown(&reclaimed)?;
            let evicted: Vec<RawId> = tx
                .unknown_ids()?
                .iter()
                .filter(|id| !remote_manifest.contains_raw(id.raw()))
                .map(|id| *id.raw())
                .collect();
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "evicting side-table ids the remote dropped");
                tx.delete_unknown(&evicted)?;
            }

            if remote_manifest.version != local_manifest.version {
                tx.save_manifest(&remote_manifest)?;
            }
            tx.commit()?;
            merge
        };
        self.check_cancelled()?;

        self.set_state(SyncState::BuildingWriteSet);
        let write = {
            let tx = self.local.begin()?;
            let ids = tx.storage_ids()?;
            let unknown: HashSet<RawId> = tx.unknown_ids()?.iter().map(|id| *id.raw()).collect();
            let post_merge = find_id_differences(&remote_manifest.storage_ids, &ids);
            let write = build_write_operation(
                &remote_manifest,
                &ids,
                &post_merge,
                self.config.device_id,
                |id| project(&tx, &unknown, id),
            )?;
            tx.commit()?;
            write
        };
        self.check_cancelled()?;

        let mut report = SyncReport {
            remote_version: remote_manifest.version,
            local_version: local_manifest.version,
            remote_only: diff.remote_only.len(),
            local_only: diff.local_only.len(),
            merge,
            reclaimed: reclaimable.len(),
            ..SyncReport::default()
        };

        if let Some(write) = write {
            self.set_state(SyncState::Pushing);
            info!(
                version = write.manifest.version,
                inserts = write.inserts.len(),
                deletes = write.deletes.len(),
                "pushing local changes"
            );
            let conflict = self.remote.write_records(
                &self.config.storage_key,
                &write.manifest,
                &write.inserts,
                &write.deletes,
            )?;
            if let Some(current) = conflict {
                return Err(SyncError::Conflict {
                    expected_version: remote_manifest.version,
                    remote_version: current.version,
                });
            }

            let mut tx = self.local.begin()?;
            tx.save_manifest(&write.manifest)?;
            tx.commit()?;

            report.pushed = true;
            report.inserts_pushed = write.inserts.len();
            report.deletes_pushed = write.deletes.len();
            report.needs_multi_device_sync = true;
        }

        report.needs_reclaim_pass = !self.local.begin()?.unknown_by_kinds(enabled)?.is_empty();

        let anomaly = diff.has_type_mismatches || version_regressed;
        if anomaly && !self.config.is_primary_device {
            info!("remote needs a full rewrite; leaving it to the primary device");
        }
        report.force_push_required = anomaly && self.config.is_primary_device;

        info!(
            version = report.remote_version,
            inserted = report.merge.outcome.inserted,
            merged = report.merge.outcome.updated,
            invalid = report.merge.outcome.invalid,
            pushed = report.pushed,
            "sync pass complete"
        );
        Ok(report)
    }

    /// Reads record bodies in `read_batch_size` chunks.
    fn read_remote(&self, ids: &[StorageId]) -> SyncResult<Vec<StorageRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.config.read_batch_size.max(1)) {
            self.check_cancelled()?;
            records.extend(self.remote.read_records(&self.config.storage_key, chunk)?);
        }
        if records.len() < ids.len() {
            debug!(
                requested = ids.len(),
                received = records.len(),
                "remote returned fewer records than requested"
            );
        }
        Ok(records)
    }

    /// Performs a pass with retry on retryable errors, sleeping between attempts.
    pub fn sync_with_retry(&self) -> SyncResult<SyncReport> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts.max(1) {
            if attempt > 0 {
                std::thread::sleep(retry_config.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.run_sync_pass() {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() => {
                    debug!(attempt, error = %e, "retryable sync failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::transport_retryable("no sync attempts made")))
    }

    /// Overwrites the remote store with the complete local state.
    ///
    /// Every local record gets a fresh storage id first, so no remote id can
    /// collide with one the remote already holds under another kind. Ids held in
    /// the unknown-record side table are kept as they are.
    pub fn force_push(&self) -> SyncResult<Manifest> {
        let Some(_pass) = self.pass_lock.try_lock() else {
            return Err(self.busy("Pushing"));
        };
        let result = self.force_push_inner();
        match &result {
            Ok(_) => {
                self.set_state(SyncState::Done);
                let mut stats = self.stats.write();
                stats.consecutive_failures = 0;
                stats.last_error = None;
            }
            Err(e) => self.handle_error(e),
        }
        result
    }

    fn force_push_inner(&self) -> SyncResult<Manifest> {
        self.set_state(SyncState::FetchManifest);
        let local_manifest = self.local.begin()?.manifest()?;
        let remote_manifest = self
            .remote
            .get_manifest(local_manifest.version)?
            .unwrap_or(local_manifest);
        self.check_cancelled()?;

        self.set_state(SyncState::BuildingWriteSet);
        let (manifest, inserts) = {
            let mut tx = self.local.begin()?;
            tx.rotate_storage_ids(self.keys.as_ref())?;
            let ids = tx.storage_ids()?;
            let unknown: HashSet<RawId> = tx.unknown_ids()?.iter().map(|id| *id.raw()).collect();
            let mut inserts = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(record) = project(&tx, &unknown, id)? {
                    inserts.push(record);
                }
            }
            tx.commit()?;
            (remote_manifest.successor(self.config.device_id, ids), inserts)
        };
        let kept = manifest.raw_ids();
        let deletes: Vec<RawId> = remote_manifest
            .storage_ids
            .iter()
            .map(|id| *id.raw())
            .filter(|raw| !kept.contains(raw))
            .collect();
        self.check_cancelled()?;

        self.set_state(SyncState::Pushing);
        warn!(
            version = manifest.version,
            inserts = inserts.len(),
            deletes = deletes.len(),
            "force pushing local state"
        );
        let conflict =
            self.remote.write_records(&self.config.storage_key, &manifest, &inserts, &deletes)?;
        if let Some(current) = conflict {
            return Err(SyncError::Conflict {
                expected_version: remote_manifest.version,
                remote_version: current.version,
            });
        }

        let mut tx = self.local.begin()?;
        tx.save_manifest(&manifest)?;
        tx.commit()?;
        self.stats.write().records_pushed += inserts.len() as u64;
        Ok(manifest)
    }

    /// Updates state and stats after a failed pass.
    fn handle_error(&self, e: &SyncError) {
        let state = match e {
            SyncError::Conflict { .. } => SyncState::ConflictRetry,
            e if e.is_fatal() => SyncState::Aborted,
            _ => SyncState::Idle,
        };
        if e.is_fatal() {
            error!(error = %e, "sync pass aborted");
        } else {
            warn!(error = %e, "sync pass failed");
        }
        self.set_state(state);

        let mut stats = self.stats.write();
        if matches!(e, SyncError::Conflict { .. }) {
            stats.conflicts += 1;
        }
        if e.is_retryable() {
            stats.consecutive_failures += 1;
        }
        stats.last_error = Some(e.to_string());
    }
}

/// Projects a local id into the record to upload.
///
/// Side-table ids yield `None`: the remote already holds their bodies.
fn project<Tx: LocalTransaction>(
    tx: &Tx,
    unknown: &HashSet<RawId>,
    id: &StorageId,
) -> SyncResult<Option<StorageRecord>> {
    if unknown.contains(id.raw()) {
        return Ok(None);
    }
    match tx.record_by_storage_id(id)? {
        Some(record) => Ok(Some(record)),
        None => Err(SyncError::invariant(format!("no local record for id {id}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLocalStore;
    use crate::transport::InMemoryRemoteStorage;
    use storsync_protocol::{
        AccountRecord, ContactRecord, DeviceId, RecordKind, SequentialKeyGenerator, StorageKey,
        SyncRecord,
    };
    use uuid::Uuid;

    fn account() -> AccountRecord {
        AccountRecord::new(StorageId::new(RecordKind::Account, [0xAA; 16]))
    }

    fn contact(raw: u8) -> ContactRecord {
        ContactRecord {
            aci: Some(Uuid::from_bytes([raw; 16])),
            ..ContactRecord::new(StorageId::new(RecordKind::Contact, [raw; 16]))
        }
    }

    fn engine(
        config: SyncConfig,
        remote: InMemoryRemoteStorage,
    ) -> SyncEngine<InMemoryRemoteStorage, MemoryLocalStore> {
        SyncEngine::new(config, remote, MemoryLocalStore::with_account(account()))
            .with_key_generator(SequentialKeyGenerator::new())
    }

    fn config() -> SyncConfig {
        SyncConfig::new(DeviceId::PRIMARY, StorageKey::from_bytes([7u8; 32]))
    }

    #[test]
    fn state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Done.can_start_sync());
        assert!(SyncState::ConflictRetry.can_start_sync());
        assert!(!SyncState::Merging.can_start_sync());
        assert!(SyncState::Pushing.is_active());
        assert!(!SyncState::Aborted.is_active());
    }

    #[test]
    fn initial_state() {
        let engine = engine(config(), InMemoryRemoteStorage::new());
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats().passes_completed, 0);
        assert!(!engine.is_sync_delayed());
    }

    #[test]
    fn first_pass_uploads_local_state() {
        let engine = engine(config(), InMemoryRemoteStorage::new());

        let report = engine.run_sync_pass().unwrap();
        assert!(report.pushed);
        assert_eq!(report.inserts_pushed, 1);
        assert_eq!(engine.state(), SyncState::Done);
        assert_eq!(engine.remote().manifest().version, 1);
        assert_eq!(engine.local().manifest().unwrap(), engine.remote().manifest());
    }

    #[test]
    fn remote_records_are_merged_then_nothing_to_push() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(
            Manifest::new(3, DeviceId(2), vec![*account().id(), contact(1).id]),
            [account().into_storage_record(), contact(1).into_storage_record()],
        );
        let engine = engine(config(), remote);

        let report = engine.run_sync_pass().unwrap();
        assert_eq!(report.remote_only, 1);
        assert_eq!(report.merge.outcome.inserted, 1);
        assert!(!report.pushed);
        assert_eq!(engine.local().manifest().unwrap().version, 3);
        assert_eq!(engine.stats().records_inserted, 1);
    }

    #[test]
    fn cancel_stops_at_next_phase() {
        let engine = engine(config(), InMemoryRemoteStorage::new());
        engine.cancel();

        let err = engine.run_sync_pass().unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.remote().writes(), 0);

        assert!(engine.run_sync_pass().is_ok());
    }

    #[test]
    fn transport_failures_mark_sync_delayed() {
        let remote = InMemoryRemoteStorage::new();
        remote.set_connected(false);
        let engine = engine(config().with_delayed_after_failures(2), remote);

        assert!(engine.run_sync_pass().unwrap_err().is_retryable());
        assert!(!engine.is_sync_delayed());
        assert!(engine.run_sync_pass().is_err());
        assert!(engine.is_sync_delayed());
        assert!(engine.stats().last_error.is_some());

        engine.remote().set_connected(true);
        engine.run_sync_pass().unwrap();
        assert!(!engine.is_sync_delayed());
    }

    #[test]
    fn missing_account_aborts() {
        let remote = InMemoryRemoteStorage::new();
        let other = AccountRecord::new(StorageId::new(RecordKind::Account, [0xBB; 16]));
        remote.seed(
            Manifest::new(1, DeviceId(2), vec![other.id]),
            [other.into_storage_record()],
        );
        let engine = SyncEngine::new(config(), remote, MemoryLocalStore::new());

        let err = engine.run_sync_pass().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(engine.state(), SyncState::Aborted);
        assert_eq!(engine.local().manifest().unwrap(), Manifest::empty());
    }

    #[test]
    fn sync_with_retry_gives_up_on_fatal_errors() {
        let remote = InMemoryRemoteStorage::new().with_key(StorageKey::from_bytes([1u8; 32]));
        remote.seed(Manifest::new(1, DeviceId(2), vec![contact(1).id]), []);
        let engine = engine(config(), remote);

        let err = engine.sync_with_retry().unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
        assert_eq!(engine.stats().retries, 0);
    }

    #[test]
    fn regressed_remote_requests_force_push_on_primary_only() {
        let seeded = || {
            let remote = InMemoryRemoteStorage::new();
            remote.seed(Manifest::new(2, DeviceId(2), vec![]), []);
            remote
        };

        let primary = engine(config(), seeded());
        primary.local().set_manifest(&Manifest::new(9, DeviceId(1), vec![])).unwrap();
        let report = primary.run_sync_pass().unwrap();
        assert!(report.force_push_required);
        assert_eq!(report.local_version, 9);
        assert_eq!(report.remote_version, 2);

        let linked_config = SyncConfig::new(DeviceId(3), StorageKey::from_bytes([7u8; 32]));
        let linked = engine(linked_config, seeded());
        linked.local().set_manifest(&Manifest::new(9, DeviceId(1), vec![])).unwrap();
        let report = linked.run_sync_pass().unwrap();
        assert!(!report.force_push_required);
    }

    #[test]
    fn force_push_rotates_ids_and_replaces_remote() {
        let remote = InMemoryRemoteStorage::new();
        remote.seed(
            Manifest::new(4, DeviceId(2), vec![StorageId::new(RecordKind::GroupV2, [0xAA; 16])]),
            [],
        );
        let engine = engine(config(), remote);
        engine.local().add_contact(contact(1));

        let manifest = engine.force_push().unwrap();
        assert_eq!(manifest.version, 5);
        assert_eq!(manifest.storage_ids.len(), 2);
        assert!(!manifest.contains_raw(&[0xAA; 16]));
        assert!(!manifest.contains_raw(&[1u8; 16]));
        assert_eq!(engine.remote().manifest(), manifest);
        assert_eq!(engine.remote().record_count(), 2);
        assert_eq!(engine.local().manifest().unwrap(), manifest);
    }
}
