//! Account record processing.

use super::{prefer_non_empty, reject, settle_merge, RecordProcessor};
use crate::error::{SyncError, SyncResult};
use crate::store::{LocalTransaction, RecordTable};
use std::cmp::Ordering;
use storsync_protocol::{AccountRecord, KeyGenerator, StorageRecordUpdate};
use tracing::error;

/// Processes the single account record.
///
/// There is exactly one account per store. It is created at registration, never
/// by sync, so a missing local account is a protocol invariant violation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccountProcessor;

impl RecordProcessor for AccountProcessor {
    type Record = AccountRecord;
    /// Whether an account record has already been accepted in this batch.
    type Seen = bool;

    fn is_invalid<Tx: LocalTransaction>(
        &self,
        _tx: &Tx,
        remote: &AccountRecord,
        seen: &mut bool,
    ) -> SyncResult<bool> {
        if *seen {
            return Ok(reject(&remote.id, "more than one account record"));
        }
        *seen = true;
        Ok(false)
    }

    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        _remote: &AccountRecord,
    ) -> SyncResult<Option<AccountRecord>> {
        match tx.account()? {
            Some(local) => Ok(Some(local)),
            None => {
                error!("no local account record to merge into");
                Err(SyncError::invariant("local account record is missing"))
            }
        }
    }

    fn merge(
        &self,
        remote: &AccountRecord,
        local: &AccountRecord,
        keys: &dyn KeyGenerator,
    ) -> AccountRecord {
        let candidate = AccountRecord {
            id: remote.id,
            profile_key: prefer_non_empty(&remote.profile_key, &local.profile_key),
            given_name: prefer_non_empty(&remote.given_name, &local.given_name),
            family_name: prefer_non_empty(&remote.family_name, &local.family_name),
            avatar_url: remote.avatar_url.clone(),
            // The phone number is owned by registration on this device.
            e164: local.e164.clone(),
            note_to_self_archived: remote.note_to_self_archived,
            note_to_self_marked_unread: remote.note_to_self_marked_unread,
            read_receipts: remote.read_receipts,
            typing_indicators: remote.typing_indicators,
            sealed_sender_indicators: remote.sealed_sender_indicators,
            link_previews: remote.link_previews,
            phone_number_sharing: remote.phone_number_sharing,
            unlisted_phone_number: remote.unlisted_phone_number,
            universal_expire_timer: remote.universal_expire_timer,
            prefer_contact_avatars: remote.prefer_contact_avatars,
            display_badges_on_profile: remote.display_badges_on_profile,
            stories_disabled: remote.stories_disabled,
            has_viewed_onboarding_story: remote.has_viewed_onboarding_story
                || local.has_viewed_onboarding_story,
            has_set_my_stories_privacy: remote.has_set_my_stories_privacy
                || local.has_set_my_stories_privacy,
            has_seen_group_story_education: remote.has_seen_group_story_education
                || local.has_seen_group_story_education,
            unknown_fields: remote.unknown_fields.clone(),
        };
        settle_merge(candidate, remote, local, keys)
    }

    fn insert_local<Tx: LocalTransaction>(
        &self,
        _tx: &mut Tx,
        record: AccountRecord,
    ) -> SyncResult<()> {
        error!(id = %record.id, "refusing to insert an account record");
        Err(SyncError::invariant("account record can only be updated"))
    }

    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<AccountRecord>,
    ) -> SyncResult<()> {
        RecordTable::<AccountRecord>::apply_update(tx, update)
    }

    fn compare(&self, _a: &AccountRecord, _b: &AccountRecord) -> Ordering {
        Ordering::Equal
    }
}
