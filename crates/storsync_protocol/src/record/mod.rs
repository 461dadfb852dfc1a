//! Typed record payloads.
//!
//! Every payload carries its own [`StorageId`] plus `unknown_fields`: bytes this
//! build does not understand, which must survive merges byte-for-byte.

mod account;
mod contact;
mod distribution_list;
mod group;

pub use account::{AccountRecord, PhoneNumberSharingMode};
pub use contact::ContactRecord;
pub use distribution_list::{StoryDistributionListRecord, MY_STORY_ID};
pub use group::{GroupV1Record, GroupV2Record, StorySendMode, GROUP_MASTER_KEY_LEN, GROUP_V1_ID_LEN};

use crate::id::{RecordKind, StorageId};
use bytes::Bytes;
use std::fmt;

/// Behaviour shared by every known record payload.
pub trait SyncRecord: Clone + PartialEq + fmt::Debug {
    /// The kind every id of this record carries.
    const KIND: RecordKind;

    /// Returns the record's storage id.
    fn id(&self) -> &StorageId;

    /// Replaces the record's storage id.
    fn set_id(&mut self, id: StorageId);

    /// Returns the passthrough bytes.
    fn unknown_fields(&self) -> &Bytes;

    /// Wraps the payload in a [`StorageRecord`].
    fn into_storage_record(self) -> StorageRecord;

    /// Returns the record with a different storage id.
    #[must_use]
    fn with_id(mut self, id: StorageId) -> Self {
        self.set_id(id);
        self
    }

    /// Field-by-field equality that ignores the storage id.
    fn eq_ignoring_id(&self, other: &Self) -> bool {
        self.clone().with_id(*other.id()) == *other
    }
}

/// A record whose kind this build does not recognize, kept opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownRecord {
    /// Storage id.
    pub id: StorageId,
    /// Undecoded payload.
    pub data: Bytes,
}

/// One decoded record as stored remotely.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageRecord {
    /// Contact payload.
    Contact(ContactRecord),
    /// Legacy group payload.
    GroupV1(GroupV1Record),
    /// Group payload.
    GroupV2(GroupV2Record),
    /// Account payload.
    Account(AccountRecord),
    /// Story distribution list payload.
    StoryDistributionList(StoryDistributionListRecord),
    /// Payload of a kind this build does not recognize.
    Unknown(UnknownRecord),
}

impl StorageRecord {
    /// Returns the storage id.
    pub fn id(&self) -> &StorageId {
        match self {
            StorageRecord::Contact(r) => r.id(),
            StorageRecord::GroupV1(r) => r.id(),
            StorageRecord::GroupV2(r) => r.id(),
            StorageRecord::Account(r) => r.id(),
            StorageRecord::StoryDistributionList(r) => r.id(),
            StorageRecord::Unknown(r) => &r.id,
        }
    }

    /// Returns the record kind, taken from the id.
    pub fn kind(&self) -> RecordKind {
        self.id().kind()
    }
}

/// A local record before and after a merge.
///
/// Handed to the local store so it can apply side effects only for the
/// sub-fields that actually changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRecordUpdate<T> {
    /// The record as it was stored locally.
    pub old: T,
    /// The record that replaces it.
    pub new: T,
}

impl<T> StorageRecordUpdate<T> {
    /// Creates an update.
    pub fn new(old: T, new: T) -> Self {
        Self { old, new }
    }

    /// Returns true if the projected field differs between `old` and `new`.
    pub fn changed<V: PartialEq>(&self, field: impl Fn(&T) -> V) -> bool {
        field(&self.old) != field(&self.new)
    }
}
