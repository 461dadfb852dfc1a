//! Building the remote write for local-only changes.

use crate::diff::IdDifferenceResult;
use crate::id::{DeviceId, RawId, StorageId};
use crate::manifest::Manifest;
use crate::record::StorageRecord;

/// Everything needed to bring the remote store up to the local state.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOperationResult {
    /// The manifest to write; its version is one past the manifest it replaces.
    pub manifest: Manifest,
    /// Records the remote does not have yet.
    pub inserts: Vec<StorageRecord>,
    /// Raw ids the remote no longer needs.
    pub deletes: Vec<RawId>,
}

impl WriteOperationResult {
    /// Returns true if the write changes nothing but the manifest.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// Builds the write that replaces `remote` with the local id set.
///
/// `diff` must be the difference between `remote.storage_ids` and `local_ids`.
/// `project` turns a local-only id into the record to upload; returning
/// `Ok(None)` leaves the id in the manifest without uploading a body (ids held
/// opaquely for kinds this build does not process).
///
/// Returns `Ok(None)` when neither side has anything the other lacks.
pub fn build_write_operation<E>(
    remote: &Manifest,
    local_ids: &[StorageId],
    diff: &IdDifferenceResult,
    device_id: DeviceId,
    mut project: impl FnMut(&StorageId) -> Result<Option<StorageRecord>, E>,
) -> Result<Option<WriteOperationResult>, E> {
    if diff.is_empty() {
        return Ok(None);
    }

    let mut inserts = Vec::with_capacity(diff.local_only.len());
    for id in &diff.local_only {
        if let Some(record) = project(id)? {
            inserts.push(record);
        }
    }

    let deletes = diff.remote_only.iter().map(|id| *id.raw()).collect();

    Ok(Some(WriteOperationResult {
        manifest: remote.successor(device_id, local_ids.to_vec()),
        inserts,
        deletes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::find_id_differences;
    use crate::id::RecordKind;
    use crate::record::{ContactRecord, SyncRecord};
    use std::convert::Infallible;

    fn contact(b: u8) -> StorageId {
        StorageId::new(RecordKind::Contact, [b; 16])
    }

    fn project(id: &StorageId) -> Result<Option<StorageRecord>, Infallible> {
        Ok(Some(ContactRecord::new(*id).into_storage_record()))
    }

    #[test]
    fn nothing_to_write_when_sets_match() {
        let remote = Manifest::new(5, DeviceId(1), vec![contact(1)]);
        let local = vec![contact(1)];
        let diff = find_id_differences(&remote.storage_ids, &local);

        let write = build_write_operation(&remote, &local, &diff, DeviceId(2), project).unwrap();
        assert!(write.is_none());
    }

    #[test]
    fn local_only_become_inserts_and_remote_only_deletes() {
        let remote = Manifest::new(5, DeviceId(1), vec![contact(1), contact(2)]);
        let local = vec![contact(2), contact(3)];
        let diff = find_id_differences(&remote.storage_ids, &local);

        let write = build_write_operation(&remote, &local, &diff, DeviceId(2), project)
            .unwrap()
            .unwrap();

        assert_eq!(write.manifest.version, 6);
        assert_eq!(write.manifest.device_id, DeviceId(2));
        assert_eq!(write.manifest.storage_ids, local);
        assert_eq!(write.inserts.len(), 1);
        assert_eq!(write.inserts[0].id(), &contact(3));
        assert_eq!(write.deletes, vec![[1u8; 16]]);
    }

    #[test]
    fn unprojected_ids_stay_in_manifest() {
        let remote = Manifest::new(1, DeviceId(1), vec![]);
        let opaque = StorageId::new(RecordKind::Unknown(30), [9u8; 16]);
        let local = vec![opaque];
        let diff = find_id_differences(&remote.storage_ids, &local);

        let write = build_write_operation(&remote, &local, &diff, DeviceId(1), |_| {
            Ok::<_, Infallible>(None)
        })
        .unwrap()
        .unwrap();

        assert!(write.inserts.is_empty());
        assert_eq!(write.manifest.storage_ids, vec![opaque]);
    }

    #[test]
    fn projector_errors_propagate() {
        let remote = Manifest::empty();
        let local = vec![contact(4)];
        let diff = find_id_differences(&remote.storage_ids, &local);

        let result = build_write_operation(&remote, &local, &diff, DeviceId(1), |_| {
            Err::<Option<StorageRecord>, _>("missing")
        });
        assert_eq!(result.unwrap_err(), "missing");
    }
}
