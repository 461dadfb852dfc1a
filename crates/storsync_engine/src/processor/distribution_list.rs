//! Story distribution list processing.

use super::{reject, settle_merge, RecordProcessor};
use crate::error::{SyncError, SyncResult};
use crate::store::{LocalTransaction, RecordTable};
use std::cmp::Ordering;
use storsync_protocol::{KeyGenerator, StorageRecordUpdate, StoryDistributionListRecord};
use tracing::error;

/// Processes story distribution lists.
///
/// "My Story" (the nil identifier) exists on every device from registration and
/// can never be deleted or created by sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct StoryDistributionListProcessor;

impl RecordProcessor for StoryDistributionListProcessor {
    type Record = StoryDistributionListRecord;
    /// Whether a My Story record has already been accepted in this batch.
    type Seen = bool;

    fn is_invalid<Tx: LocalTransaction>(
        &self,
        _tx: &Tx,
        remote: &StoryDistributionListRecord,
        my_story_seen: &mut bool,
    ) -> SyncResult<bool> {
        if remote.distribution_id().is_none() {
            return Ok(reject(&remote.id, "malformed distribution id"));
        }
        if remote.is_my_story() {
            if remote.is_deleted() {
                return Ok(reject(&remote.id, "My Story cannot be deleted"));
            }
            if *my_story_seen {
                return Ok(reject(&remote.id, "more than one My Story record"));
            }
            *my_story_seen = true;
        }
        Ok(false)
    }

    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &StoryDistributionListRecord,
    ) -> SyncResult<Option<StoryDistributionListRecord>> {
        let Some(distribution_id) = remote.distribution_id() else {
            return Ok(None);
        };
        let local = tx.distribution_list_by_id(&distribution_id)?;
        if local.is_none() && remote.is_my_story() {
            error!("no local My Story list to merge into");
            return Err(SyncError::invariant("local My Story list is missing"));
        }
        Ok(local)
    }

    fn merge(
        &self,
        remote: &StoryDistributionListRecord,
        local: &StoryDistributionListRecord,
        keys: &dyn KeyGenerator,
    ) -> StoryDistributionListRecord {
        let candidate = StoryDistributionListRecord {
            deleted_at: remote.deleted_at.max(local.deleted_at),
            ..remote.clone()
        };
        settle_merge(candidate, remote, local, keys)
    }

    fn insert_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        record: StoryDistributionListRecord,
    ) -> SyncResult<()> {
        if record.is_my_story() {
            error!(id = %record.id, "refusing to insert My Story");
            return Err(SyncError::invariant("My Story can only be updated"));
        }
        RecordTable::<StoryDistributionListRecord>::apply_insert(tx, record)
    }

    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<StoryDistributionListRecord>,
    ) -> SyncResult<()> {
        RecordTable::<StoryDistributionListRecord>::apply_update(tx, update)
    }

    fn compare(
        &self,
        a: &StoryDistributionListRecord,
        b: &StoryDistributionListRecord,
    ) -> Ordering {
        a.identifier.cmp(&b.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLocalStore;
    use crate::processor::process_batch;
    use crate::store::LocalStore;
    use bytes::Bytes;
    use storsync_protocol::{RecordKind, SequentialKeyGenerator, StorageId, SyncRecord, MY_STORY_ID};
    use uuid::Uuid;

    fn list(raw: u8, id: Uuid) -> StoryDistributionListRecord {
        StoryDistributionListRecord::new(
            StorageId::new(RecordKind::StoryDistributionList, [raw; 16]),
            id,
            "Close friends",
        )
    }

    fn my_story(raw: u8) -> StoryDistributionListRecord {
        list(raw, MY_STORY_ID)
    }

    #[test]
    fn deleted_or_repeated_my_story_is_invalid() {
        let store = MemoryLocalStore::new();
        let tx = store.begin().unwrap();
        let p = StoryDistributionListProcessor;

        let deleted = StoryDistributionListRecord {
            deleted_at: 10,
            ..my_story(1)
        };
        let mut seen = false;
        assert!(p.is_invalid(&tx, &deleted, &mut seen).unwrap());
        assert!(!p.is_invalid(&tx, &my_story(2), &mut seen).unwrap());
        assert!(p.is_invalid(&tx, &my_story(3), &mut seen).unwrap());

        let malformed = StoryDistributionListRecord {
            identifier: vec![1, 2, 3],
            ..my_story(4)
        };
        assert!(p.is_invalid(&tx, &malformed, &mut false).unwrap());
    }

    #[test]
    fn my_story_must_exist_locally() {
        let store = MemoryLocalStore::new();
        let tx = store.begin().unwrap();

        let err = StoryDistributionListProcessor
            .get_matching(&tx, &my_story(1))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn my_story_cannot_be_inserted() {
        let store = MemoryLocalStore::new();
        let mut tx = store.begin().unwrap();

        let err = StoryDistributionListProcessor
            .insert_local(&mut tx, my_story(1))
            .unwrap_err();
        assert!(matches!(err, SyncError::ProtocolInvariant(_)));
    }

    #[test]
    fn deletion_is_sticky() {
        let keys = SequentialKeyGenerator::new();
        let id = Uuid::from_bytes([4u8; 16]);
        let remote = list(1, id);
        let local = StoryDistributionListRecord {
            deleted_at: 500,
            ..list(2, id)
        };

        let merged = StoryDistributionListProcessor.merge(&remote, &local, &keys);
        assert_eq!(merged, local);
        assert!(merged.is_deleted());
    }

    #[test]
    fn remerging_a_merged_list_is_a_no_op() {
        let keys = SequentialKeyGenerator::new();
        let id = Uuid::from_bytes([4u8; 16]);
        let remote = StoryDistributionListRecord {
            name: "Hiking".into(),
            allows_replies: false,
            ..list(1, id)
        };
        let local = StoryDistributionListRecord {
            deleted_at: 500,
            ..list(2, id)
        };

        let once = StoryDistributionListProcessor.merge(&remote, &local, &keys);
        assert_ne!(once.id, remote.id);
        assert_eq!(once.deleted_at, 500);
        let twice = StoryDistributionListProcessor.merge(&once, &local, &keys);
        assert!(twice.eq_ignoring_id(&once));
        assert_eq!(twice, once);
    }

    #[test]
    fn list_unknown_fields_come_from_remote_verbatim() {
        let keys = SequentialKeyGenerator::new();
        let id = Uuid::from_bytes([4u8; 16]);
        let remote = StoryDistributionListRecord {
            unknown_fields: Bytes::from_static(&[0x2a, 0x00]),
            ..list(1, id)
        };
        let local = StoryDistributionListRecord {
            unknown_fields: Bytes::from_static(&[0xfe]),
            deleted_at: 9,
            ..list(2, id)
        };

        let merged = StoryDistributionListProcessor.merge(&remote, &local, &keys);
        assert_eq!(merged.unknown_fields, remote.unknown_fields);
        assert_eq!(merged.deleted_at, 9);
    }

    #[test]
    fn new_lists_are_inserted_and_known_lists_merged() {
        let store = MemoryLocalStore::new();
        store.add_distribution_list(my_story(1));
        let keys = SequentialKeyGenerator::new();
        let renamed = StoryDistributionListRecord {
            name: "My Story".into(),
            ..my_story(2)
        };

        let mut tx = store.begin().unwrap();
        let outcome = process_batch(
            &StoryDistributionListProcessor,
            &mut tx,
            vec![renamed, list(3, Uuid::from_bytes([4u8; 16]))],
            &keys,
        )
        .unwrap();
        tx.commit().unwrap();

        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(store.distribution_lists().len(), 2);
    }
}
