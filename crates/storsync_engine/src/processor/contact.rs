//! Contact record processing.

use super::{prefer_non_empty, reject, settle_merge, RecordProcessor};
use crate::config::SelfIdentity;
use crate::error::SyncResult;
use crate::store::{LocalTransaction, RecordTable};
use std::cmp::Ordering;
use storsync_protocol::{ContactRecord, KeyGenerator, StorageRecordUpdate};

/// Processes contact records.
///
/// Phone-number fields (`pni`, `e164`) belong to the source-of-truth device: on
/// the primary device the local values win whenever they are set, on linked
/// devices the remote values do.
#[derive(Debug, Clone)]
pub struct ContactProcessor {
    self_identity: SelfIdentity,
    is_primary_device: bool,
}

impl ContactProcessor {
    /// Creates a processor for the given local account.
    pub fn new(self_identity: SelfIdentity, is_primary_device: bool) -> Self {
        Self {
            self_identity,
            is_primary_device,
        }
    }

    fn describes_self(&self, remote: &ContactRecord) -> bool {
        let me = &self.self_identity;
        (remote.aci.is_some() && remote.aci == me.aci)
            || (remote.pni.is_some() && remote.pni == me.pni)
            || (remote.e164.is_some() && remote.e164 == me.e164)
    }

    fn phone_field<T: Clone>(&self, remote: &Option<T>, local: &Option<T>) -> Option<T> {
        if self.is_primary_device {
            local.clone().or_else(|| remote.clone())
        } else {
            remote.clone().or_else(|| local.clone())
        }
    }
}

impl RecordProcessor for ContactProcessor {
    type Record = ContactRecord;
    type Seen = ();

    fn is_invalid<Tx: LocalTransaction>(
        &self,
        _tx: &Tx,
        remote: &ContactRecord,
        _seen: &mut (),
    ) -> SyncResult<bool> {
        if !remote.has_identifier() {
            return Ok(reject(&remote.id, "contact has no identifier"));
        }
        if remote.aci.is_none() && remote.pni.is_some() && remote.e164.is_none() {
            return Ok(reject(&remote.id, "PNI-only contact without a phone number"));
        }
        if self.describes_self(remote) {
            return Ok(reject(&remote.id, "contact describes the local account"));
        }
        Ok(false)
    }

    fn get_matching<Tx: LocalTransaction>(
        &self,
        tx: &Tx,
        remote: &ContactRecord,
    ) -> SyncResult<Option<ContactRecord>> {
        if let Some(aci) = &remote.aci {
            if let Some(local) = tx.contact_by_aci(aci)? {
                return Ok(Some(local));
            }
        }
        if let Some(pni) = &remote.pni {
            if let Some(local) = tx.contact_by_pni(pni)? {
                return Ok(Some(local));
            }
        }
        match &remote.e164 {
            Some(e164) => tx.contact_by_e164(e164),
            None => Ok(None),
        }
    }

    fn merge(
        &self,
        remote: &ContactRecord,
        local: &ContactRecord,
        keys: &dyn KeyGenerator,
    ) -> ContactRecord {
        let candidate = ContactRecord {
            id: remote.id,
            aci: remote.aci.or(local.aci),
            pni: self.phone_field(&remote.pni, &local.pni),
            e164: self.phone_field(&remote.e164, &local.e164),
            profile_key: prefer_non_empty(&remote.profile_key, &local.profile_key),
            given_name: prefer_non_empty(&remote.given_name, &local.given_name),
            family_name: prefer_non_empty(&remote.family_name, &local.family_name),
            blocked: remote.blocked,
            profile_sharing: remote.profile_sharing,
            archived: remote.archived,
            marked_unread: remote.marked_unread,
            muted_until: remote.muted_until,
            hide_story: remote.hide_story,
            unregistered_at: remote.unregistered_at,
            hidden: remote.hidden,
            unknown_fields: remote.unknown_fields.clone(),
        };
        settle_merge(candidate, remote, local, keys)
    }

    fn insert_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        record: ContactRecord,
    ) -> SyncResult<()> {
        RecordTable::<ContactRecord>::apply_insert(tx, record)
    }

    fn update_local<Tx: LocalTransaction>(
        &self,
        tx: &mut Tx,
        update: StorageRecordUpdate<ContactRecord>,
    ) -> SyncResult<()> {
        RecordTable::<ContactRecord>::apply_update(tx, update)
    }

    fn compare(&self, a: &ContactRecord, b: &ContactRecord) -> Ordering {
        a.cmp_business_key(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryLocalStore;
    use crate::processor::process_batch;
    use crate::store::LocalStore;
    use bytes::Bytes;
    use storsync_protocol::{RecordKind, SequentialKeyGenerator, StorageId, SyncRecord};
    use uuid::Uuid;

    const ME: Uuid = Uuid::from_bytes([0x11; 16]);

    fn processor(primary: bool) -> ContactProcessor {
        ContactProcessor::new(SelfIdentity::new(ME).with_e164("+15550000"), primary)
    }

    fn contact(raw: u8, aci: u8) -> ContactRecord {
        ContactRecord {
            aci: Some(Uuid::from_bytes([aci; 16])),
            ..ContactRecord::new(StorageId::new(RecordKind::Contact, [raw; 16]))
        }
    }

    #[test]
    fn rejects_records_without_identifier_or_about_self() {
        let store = MemoryLocalStore::new();
        let tx = store.begin().unwrap();
        let p = processor(true);

        let anonymous = ContactRecord::new(StorageId::new(RecordKind::Contact, [1u8; 16]));
        assert!(p.is_invalid(&tx, &anonymous, &mut ()).unwrap());

        let me = ContactRecord {
            aci: Some(ME),
            ..anonymous.clone()
        };
        assert!(p.is_invalid(&tx, &me, &mut ()).unwrap());

        let my_number = ContactRecord {
            e164: Some("+15550000".into()),
            ..anonymous.clone()
        };
        assert!(p.is_invalid(&tx, &my_number, &mut ()).unwrap());

        let pni_only = ContactRecord {
            pni: Some(Uuid::from_bytes([5u8; 16])),
            ..anonymous
        };
        assert!(p.is_invalid(&tx, &pni_only, &mut ()).unwrap());

        assert!(!p.is_invalid(&tx, &contact(2, 0x22), &mut ()).unwrap());
    }

    #[test]
    fn matches_by_aci_then_e164() {
        let store = MemoryLocalStore::new();
        store.add_contact(contact(1, 0x22));
        store.add_contact(ContactRecord {
            e164: Some("+15551234".into()),
            ..ContactRecord::new(StorageId::new(RecordKind::Contact, [2u8; 16]))
        });
        let tx = store.begin().unwrap();
        let p = processor(true);

        let by_aci = p.get_matching(&tx, &contact(9, 0x22)).unwrap().unwrap();
        assert_eq!(by_aci.id.raw(), &[1u8; 16]);

        let by_phone = ContactRecord {
            e164: Some("+15551234".into()),
            ..contact(9, 0x33)
        };
        let matched = p.get_matching(&tx, &by_phone).unwrap().unwrap();
        assert_eq!(matched.id.raw(), &[2u8; 16]);

        assert!(p.get_matching(&tx, &contact(9, 0x44)).unwrap().is_none());
    }

    #[test]
    fn merge_prefers_remote_settings() {
        let keys = SequentialKeyGenerator::new();
        let remote = ContactRecord {
            blocked: true,
            ..contact(1, 0x22)
        };
        let local = ContactRecord {
            given_name: "Ada".into(),
            ..contact(2, 0x22)
        };

        let merged = processor(true).merge(&remote, &local, &keys);
        assert!(merged.blocked);
        assert_eq!(merged.given_name, "Ada");
        assert_ne!(merged.id, remote.id);
        assert_ne!(merged.id, local.id);
    }

    #[test]
    fn phone_fields_follow_the_source_of_truth() {
        let keys = SequentialKeyGenerator::new();
        let remote = ContactRecord {
            e164: Some("+15550001".into()),
            ..contact(1, 0x22)
        };
        let local = ContactRecord {
            e164: Some("+15550002".into()),
            ..contact(2, 0x22)
        };

        let on_primary = processor(true).merge(&remote, &local, &keys);
        assert_eq!(on_primary.e164.as_deref(), Some("+15550002"));

        let on_linked = processor(false).merge(&remote, &local, &keys);
        assert_eq!(on_linked, remote);
    }

    #[test]
    fn merge_is_idempotent() {
        let keys = SequentialKeyGenerator::new();
        let p = processor(true);
        let remote = ContactRecord {
            blocked: true,
            e164: Some("+15550001".into()),
            ..contact(1, 0x22)
        };
        let local = ContactRecord {
            given_name: "Ada".into(),
            e164: Some("+15550002".into()),
            ..contact(2, 0x22)
        };

        let once = p.merge(&remote, &local, &keys);
        let twice = p.merge(&once, &local, &keys);
        assert!(twice.eq_ignoring_id(&once));
        assert_eq!(twice, once);
    }

    #[test]
    fn unknown_fields_come_from_remote_verbatim() {
        let keys = SequentialKeyGenerator::new();
        let remote = ContactRecord {
            unknown_fields: Bytes::from_static(&[0x08, 0x96, 0x01]),
            blocked: true,
            ..contact(1, 0x22)
        };
        let local = ContactRecord {
            unknown_fields: Bytes::from_static(&[0xff]),
            given_name: "Ada".into(),
            ..contact(2, 0x22)
        };

        let merged = processor(true).merge(&remote, &local, &keys);
        assert_eq!(merged.unknown_fields, remote.unknown_fields);
    }

    #[test]
    fn batch_drops_duplicates_for_one_person() {
        let store = MemoryLocalStore::new();
        let keys = SequentialKeyGenerator::new();
        let mut tx = store.begin().unwrap();

        let outcome = process_batch(
            &processor(true),
            &mut tx,
            vec![contact(1, 0x22), contact(2, 0x22), contact(3, 0x33)],
            &keys,
        )
        .unwrap();
        tx.commit().unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.contacts().len(), 2);
    }
}
