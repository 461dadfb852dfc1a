//! Contact records.

use super::{StorageRecord, SyncRecord};
use crate::id::{RecordKind, StorageId};
use bytes::Bytes;
use std::cmp::Ordering;
use uuid::Uuid;

/// Another user, as known to every linked device.
///
/// The business key is the ACI, falling back to the PNI and then the phone
/// number; storage ids rotate and are never used to match contacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactRecord {
    /// Storage id.
    pub id: StorageId,
    /// Account identity.
    pub aci: Option<Uuid>,
    /// Phone-number identity.
    pub pni: Option<Uuid>,
    /// Phone number in E.164 form.
    pub e164: Option<String>,
    /// Profile key material.
    pub profile_key: Vec<u8>,
    /// Profile given name.
    pub given_name: String,
    /// Profile family name.
    pub family_name: String,
    /// Whether the contact is blocked.
    pub blocked: bool,
    /// Whether our profile is shared with the contact.
    pub profile_sharing: bool,
    /// Whether the conversation is archived.
    pub archived: bool,
    /// Whether the conversation is marked unread.
    pub marked_unread: bool,
    /// Mute expiry in milliseconds since the epoch, 0 if not muted.
    pub muted_until: u64,
    /// Whether the contact's stories are hidden.
    pub hide_story: bool,
    /// When the contact was seen unregistered, 0 if registered.
    pub unregistered_at: u64,
    /// Whether the contact is hidden from the contact list.
    pub hidden: bool,
    /// Passthrough bytes.
    pub unknown_fields: Bytes,
}

impl ContactRecord {
    /// Creates an empty contact with the given id.
    pub fn new(id: StorageId) -> Self {
        Self {
            id,
            aci: None,
            pni: None,
            e164: None,
            profile_key: Vec::new(),
            given_name: String::new(),
            family_name: String::new(),
            blocked: false,
            profile_sharing: false,
            archived: false,
            marked_unread: false,
            muted_until: 0,
            hide_story: false,
            unregistered_at: 0,
            hidden: false,
            unknown_fields: Bytes::new(),
        }
    }

    /// Returns true if the record carries any identifier at all.
    pub fn has_identifier(&self) -> bool {
        self.aci.is_some() || self.pni.is_some() || self.e164.is_some()
    }

    /// Orders contacts by business key; `Equal` means the same person.
    ///
    /// Keys are tried in matching order: ACI, then PNI, then phone number.
    pub fn cmp_business_key(&self, other: &Self) -> Ordering {
        cmp_present(self.aci.as_ref(), other.aci.as_ref())
            .or_else(|| cmp_present(self.pni.as_ref(), other.pni.as_ref()))
            .or_else(|| cmp_present(self.e164.as_ref(), other.e164.as_ref()))
            .unwrap_or(Ordering::Equal)
    }
}

/// Compares one key field. `None` when neither side has it; a present key
/// sorts before a missing one.
fn cmp_present<T: Ord>(a: Option<&T>, b: Option<&T>) -> Option<Ordering> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        (Some(_), None) => Some(Ordering::Less),
        (None, Some(_)) => Some(Ordering::Greater),
        (None, None) => None,
    }
}

impl SyncRecord for ContactRecord {
    const KIND: RecordKind = RecordKind::Contact;

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
        StorageRecord::Contact(self)
    }
}
