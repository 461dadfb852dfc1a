//! The local account's own record.

use super::{StorageRecord, SyncRecord};
use crate::id::{RecordKind, StorageId};
use bytes::Bytes;

/// Who can see the account's phone number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhoneNumberSharingMode {
    /// Everybody.
    #[default]
    Everybody,
    /// Nobody.
    Nobody,
}

/// Settings of the local account, shared by all linked devices.
///
/// Exactly one account record is live at any time, and the local store always
/// holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    /// Storage id.
    pub id: StorageId,
    /// Profile key material.
    pub profile_key: Vec<u8>,
    /// Profile given name.
    pub given_name: String,
    /// Profile family name.
    pub family_name: String,
    /// Avatar location.
    pub avatar_url: String,
    /// Phone number; owned by the local device.
    pub e164: Option<String>,
    /// Note-to-self conversation archived.
    pub note_to_self_archived: bool,
    /// Note-to-self conversation marked unread.
    pub note_to_self_marked_unread: bool,
    /// Send read receipts.
    pub read_receipts: bool,
    /// Send typing indicators.
    pub typing_indicators: bool,
    /// Show sealed sender indicators.
    pub sealed_sender_indicators: bool,
    /// Generate link previews.
    pub link_previews: bool,
    /// Phone number visibility.
    pub phone_number_sharing: PhoneNumberSharingMode,
    /// Hide the phone number from lookups.
    pub unlisted_phone_number: bool,
    /// Default disappearing-message timer in seconds.
    pub universal_expire_timer: u32,
    /// Prefer system contact avatars.
    pub prefer_contact_avatars: bool,
    /// Show badges on the profile.
    pub display_badges_on_profile: bool,
    /// Stories turned off.
    pub stories_disabled: bool,
    /// The onboarding story was viewed on some device.
    pub has_viewed_onboarding_story: bool,
    /// My Story privacy was set on some device.
    pub has_set_my_stories_privacy: bool,
    /// Group story education was shown on some device.
    pub has_seen_group_story_education: bool,
    /// Passthrough bytes.
    pub unknown_fields: Bytes,
}

impl AccountRecord {
    /// Creates an account record with default settings.
    pub fn new(id: StorageId) -> Self {
        Self {
            id,
            profile_key: Vec::new(),
            given_name: String::new(),
            family_name: String::new(),
            avatar_url: String::new(),
            e164: None,
            note_to_self_archived: false,
            note_to_self_marked_unread: false,
            read_receipts: true,
            typing_indicators: true,
            sealed_sender_indicators: false,
            link_previews: true,
            phone_number_sharing: PhoneNumberSharingMode::Everybody,
            unlisted_phone_number: false,
            universal_expire_timer: 0,
            prefer_contact_avatars: false,
            display_badges_on_profile: true,
            stories_disabled: false,
            has_viewed_onboarding_story: false,
            has_set_my_stories_privacy: false,
            has_seen_group_story_education: false,
            unknown_fields: Bytes::new(),
        }
    }
}

impl SyncRecord for AccountRecord {
    const KIND: RecordKind = RecordKind::Account;

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
        StorageRecord::Account(self)
    }
}
