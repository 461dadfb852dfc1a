//! Group record processing, legacy and current.

use super::{reject, settle_merge, RecordProcessor};
use crate::error::{SyncError, SyncResult};
use crate::store::{LocalTransaction, RecordTable};
use std::cmp::Ordering;
use storsync_protocol::{
    GroupV1Record, GroupV2Record, KeyGenerator, ProtocolError, StorageRecordUpdate,
    GROUP_V1_ID_LEN,
};
use tracing::warn;

/// Processes legacy group records. Remote always wins on merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupV1Processor;

impl RecordProcessor for GroupV1Processor {
    type Record = GroupV1Record;
    type Seen = ();

    fn is_invalid<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &GroupV1Record,
        _seen: &mut (),
    ) -> SyncResult<bool> {
        if remote.group_id.len() != GROUP_V1_ID_LEN {
            return Ok(reject(
                &remote.id,
                format!("group id is {} bytes", remote.group_id.len()),
            ));
        }
        if tx.group_v1_is_migrated(&remote.group_id)? {
            return Ok(reject(&remote.id, "group has been migrated"));
        }
        Ok(false)
    }

    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &GroupV1Record,
    ) -> SyncResult<Option<GroupV1Record>> {
        tx.group_v1_by_id(&remote.group_id)
    }

    fn merge(
        &self,
        remote: &GroupV1Record,
        local: &GroupV1Record,
        keys: &dyn KeyGenerator,
    ) -> GroupV1Record {
        settle_merge(remote.clone(), remote, local, keys)
    }

    fn insert_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        record: GroupV1Record,
    ) -> SyncResult<()> {
        RecordTable::<GroupV1Record>::apply_insert(tx, record)
    }

    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<GroupV1Record>,
    ) -> SyncResult<()> {
        RecordTable::<GroupV1Record>::apply_update(tx, update)
    }

    fn compare(&self, a: &GroupV1Record, b: &GroupV1Record) -> Ordering {
        a.group_id.cmp(&b.group_id)
    }
}

/// Processes group records, keyed by master key. Remote always wins on merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupV2Processor;

impl RecordProcessor for GroupV2Processor {
    type Record = GroupV2Record;
    type Seen = ();

    fn is_invalid<Tx: LocalTransaction>(
        &self,
        _tx: &Tx,
        remote: &GroupV2Record,
        _seen: &mut (),
    ) -> SyncResult<bool> {
        match remote.master_key_bytes() {
            Ok(_) => Ok(false),
            Err(ProtocolError::KeyFormat { expected, actual }) => {
                let err = SyncError::CryptoKeyFormat { expected, actual };
                warn!(id = %remote.id, error = %err, "dropping group with malformed master key");
                Ok(true)
            }
            Err(other) => Ok(reject(&remote.id, other.to_string())),
        }
    }

    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &GroupV2Record,
    ) -> SyncResult<Option<GroupV2Record>> {
        tx.group_v2_by_master_key(&remote.master_key)
    }

    fn merge(
        &self,
        remote: &GroupV2Record,
        local: &GroupV2Record,
        keys: &dyn KeyGenerator,
    ) -> GroupV2Record {
        settle_merge(remote.clone(), remote, local, keys)
    }

    fn insert_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        record: GroupV2Record,
    ) -> SyncResult<()> {
        RecordTable::<GroupV2Record>::apply_insert(tx, record)
    }

    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<GroupV2Record>,
    ) -> SyncResult<()> {
        RecordTable::<GroupV2Record>::apply_update(tx, update)
    }

    fn compare(&self, a: &GroupV2Record, b: &GroupV2Record) -> Ordering {
        a.master_key.cmp(&b.master_key)
    }
}
