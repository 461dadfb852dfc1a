//! The versioned remote index.

use crate::error::{ProtocolError, ProtocolResult};
use crate::id::{DeviceId, RawId, StorageId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The authoritative index of the remote store.
///
/// Any record not listed here is considered deleted, even if the store still
/// holds its body.
///
/// # Invariants
///
/// - `version` is monotonic and starts at 0
/// - each raw id appears at most once in `storage_ids`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest version.
    pub version: u64,
    /// Device that wrote this manifest.
    pub device_id: DeviceId,
    /// Every live storage id, in write order.
    pub storage_ids: Vec<StorageId>,
}

impl Manifest {
    /// Creates a manifest.
    pub fn new(version: u64, device_id: DeviceId, storage_ids: Vec<StorageId>) -> Self {
        Self {
            version,
            device_id,
            storage_ids,
        }
    }

    /// The manifest a device starts with before its first sync.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the manifest that follows this one.
    pub fn successor(&self, device_id: DeviceId, storage_ids: Vec<StorageId>) -> Self {
        Self::new(self.version + 1, device_id, storage_ids)
    }

    /// Returns the set of raw ids.
    pub fn raw_ids(&self) -> HashSet<RawId> {
        self.storage_ids.iter().map(|id| *id.raw()).collect()
    }

    /// Returns true if the manifest lists the given raw id.
    pub fn contains_raw(&self, raw: &RawId) -> bool {
        self.storage_ids.iter().any(|id| id.raw() == raw)
    }

    /// Returns true if the manifest lists no ids.
    pub fn is_empty(&self) -> bool {
        self.storage_ids.is_empty()
    }

    /// Encodes to CBOR bytes for local persistence.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(ProtocolError::codec)?;
        Ok(buf)
    }

    /// Decodes from CBOR bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(ProtocolError::codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::RecordKind;

    fn sample() -> Manifest {
        Manifest::new(
            5,
            DeviceId(2),
            vec![
                StorageId::new(RecordKind::Contact, [1u8; 16]),
                StorageId::new(RecordKind::Unknown(42), [2u8; 16]),
            ],
        )
    }

    #[test]
    fn empty_manifest_starts_at_zero() {
        let manifest = Manifest::empty();
        assert_eq!(manifest.version, 0);
        assert!(manifest.is_empty());
    }

    #[test]
    fn successor_bumps_version() {
        let next = sample().successor(DeviceId(3), vec![]);
        assert_eq!(next.version, 6);
        assert_eq!(next.device_id, DeviceId(3));
    }

    #[test]
    fn persisted_form_keeps_unknown_kinds() {
        let manifest = sample();
        let decoded = Manifest::decode(&manifest.encode().unwrap()).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.storage_ids[1].kind(), RecordKind::Unknown(42));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Manifest::decode(&[0xff, 0x00]),
            Err(ProtocolError::Codec(_))
        ));
    }

    #[test]
    fn raw_id_lookup() {
        let manifest = sample();
        assert!(manifest.contains_raw(&[1u8; 16]));
        assert!(!manifest.contains_raw(&[3u8; 16]));
        assert_eq!(manifest.raw_ids().len(), 2);
    }
}
