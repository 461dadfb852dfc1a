//! Group records.

use super::{StorageRecord, SyncRecord};
use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{RecordKind, StorageId};
use bytes::Bytes;

/// Length of a legacy group id.
pub const GROUP_V1_ID_LEN: usize = 16;

/// Length of a group master key.
pub const GROUP_MASTER_KEY_LEN: usize = 32;

/// A legacy group, keyed by its group id.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupV1Record {
    /// Storage id.
    pub id: StorageId,
    /// Legacy group id; valid ones are [`GROUP_V1_ID_LEN`] bytes.
    pub group_id: Vec<u8>,
    /// Whether the group is blocked.
    pub blocked: bool,
    /// Whether our profile is shared with the group.
    pub profile_sharing: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the conversation is marked unread.
    pub marked_unread: bool,
    /// Mute expiry in milliseconds since the epoch.
    pub muted_until: u64,
    /// Passthrough bytes.
    pub unknown_fields: Bytes,
}

impl GroupV1Record {
    /// Creates a group record with default settings.
    pub fn new(id: StorageId, group_id: Vec<u8>) -> Self {
        Self {
            id,
            group_id,
            blocked: false,
            profile_sharing: false,
            archived: false,
            marked_unread: false,
            muted_until: 0,
            unknown_fields: Bytes::new(),
        }
    }
}

impl SyncRecord for GroupV1Record {
    const KIND: RecordKind = RecordKind::GroupV1;

    fn id(&self) -> &StorageId {
        &self.id
    }

    fn set_id(&mut self, id: StorageId) {
        self.id = id;
    }

    fn unknown_fields(&self) -> &Bytes {
        &self.unknown_fields
    }

    fn into_storage_record(self) -> StorageRecord {
        StorageRecord::GroupV1(self)
    }
}

/// Who may post to a group's story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorySendMode {
    /// Follow the account-wide default.
    #[default]
    Default,
    /// Group stories are off.
    Disabled,
    /// Group stories are on.
    Enabled,
}

/// A group addressed by its master key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupV2Record {
    /// Storage id.
    pub id: StorageId,
    /// Group master key; valid ones are [`GROUP_MASTER_KEY_LEN`] bytes.
    pub master_key: Vec<u8>,
    /// Whether the group is blocked.
    pub blocked: bool,
    /// Whether our profile is shared with the group.
    pub profile_sharing: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the conversation is marked unread.
    pub marked_unread: bool,
    /// Mute expiry in milliseconds since the epoch.
    pub muted_until: u64,
    /// Suppress mention notifications while muted.
    pub dont_notify_for_mentions_if_muted: bool,
    /// Whether the group's stories are hidden.
    pub hide_story: bool,
    /// Story posting mode.
    pub story_send_mode: StorySendMode,
    /// Passthrough bytes.
    pub unknown_fields: Bytes,
}

impl GroupV2Record {
    /// Creates a group record with default settings.
    pub fn new(id: StorageId, master_key: Vec<u8>) -> Self {
        Self {
            id,
            master_key,
            blocked: false,
            profile_sharing: false,
            archived: false,
            marked_unread: false,
            muted_until: 0,
            dont_notify_for_mentions_if_muted: false,
            hide_story: false,
            story_send_mode: StorySendMode::Default,
            unknown_fields: Bytes::new(),
        }
    }

    /// Returns the master key, checking its length.
    pub fn master_key_bytes(&self) -> ProtocolResult<&[u8; GROUP_MASTER_KEY_LEN]> {
        self.master_key
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::KeyFormat {
                expected: GROUP_MASTER_KEY_LEN,
                actual: self.master_key.len(),
            })
    }
}

impl SyncRecord for GroupV2Record {
    const KIND: RecordKind = RecordKind::GroupV2;

    fn id(&self) -> &StorageId {
        &self.id
    }

    fn set_id(&mut self, id: StorageId) {
        self.id = id;
    }

    fn unknown_fields(&self) -> &Bytes {
        &self.unknown_fields
    }

    fn into_storage_record(self) -> StorageRecord {
        StorageRecord::GroupV2(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_key_length_is_checked() {
        let id = StorageId::new(RecordKind::GroupV2, [1u8; 16]);
        assert!(GroupV2Record::new(id, vec![0u8; 32]).master_key_bytes().is_ok());

        let err = GroupV2Record::new(id, vec![0u8; 31])
            .master_key_bytes()
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::KeyFormat {
                expected: 32,
                actual: 31
            }
        ));
    }
}
