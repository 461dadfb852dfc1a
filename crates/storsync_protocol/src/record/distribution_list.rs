//! Story distribution list records.

use super::{StorageRecord, SyncRecord};
use crate::id::{RecordKind, StorageId};
use bytes::Bytes;
use uuid::Uuid;

/// Identifier of the primary "My Story" list.
pub const MY_STORY_ID: Uuid = Uuid::nil();

/// A named audience for story posts.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryDistributionListRecord {
    /// Storage id.
    pub id: StorageId,
    /// Distribution list UUID bytes; valid ones are 16 bytes.
    pub identifier: Vec<u8>,
    /// Display name.
    pub name: String,
    /// Members of the list.
    pub recipients: Vec<Uuid>,
    /// Deletion timestamp in milliseconds, 0 if live.
    pub deleted_at: u64,
    /// Whether viewers may reply.
    pub allows_replies: bool,
    /// Whether `recipients` are excluded rather than included.
    pub is_block_list: bool,
    /// Passthrough bytes.
    pub unknown_fields: Bytes,
}

impl StoryDistributionListRecord {
    /// Creates a live, empty list.
    pub fn new(id: StorageId, identifier: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            identifier: identifier.as_bytes().to_vec(),
            name: name.into(),
            recipients: Vec::new(),
            deleted_at: 0,
            allows_replies: true,
            is_block_list: false,
            unknown_fields: Bytes::new(),
        }
    }

    /// Parses the identifier, returning `None` if it is malformed.
    pub fn distribution_id(&self) -> Option<Uuid> {
        Uuid::from_slice(&self.identifier).ok()
    }

    /// Returns true if this is the primary "My Story" list.
    pub fn is_my_story(&self) -> bool {
        self.distribution_id() == Some(MY_STORY_ID)
    }

    /// Returns true if the list has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at > 0
    }
}

impl SyncRecord for StoryDistributionListRecord {
    const KIND: RecordKind = RecordKind::StoryDistributionList;

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
        StorageRecord::StoryDistributionList(self)
    }
}
