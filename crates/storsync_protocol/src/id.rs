//! Storage identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use crate::keys::KeyGenerator;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of the raw bytes of a storage id.
pub const STORAGE_ID_LEN: usize = 16;

/// Raw bytes of a storage id. Uniqueness within a manifest is keyed on these alone.
pub type RawId = [u8; STORAGE_ID_LEN];

/// The kind of record a storage id names.
///
/// The numeric tags are the ones carried on the wire; any tag this build does not
/// know is preserved in `Unknown` so it can be written back untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum RecordKind {
    /// A contact (another user).
    Contact,
    /// A legacy group.
    GroupV1,
    /// A group addressed by its master key.
    GroupV2,
    /// The local account's own settings. Exactly one is live at a time.
    Account,
    /// A story distribution list.
    StoryDistributionList,
    /// A kind this build does not understand, with its original tag.
    Unknown(u32),
}

impl RecordKind {
    /// Every kind this build knows how to process.
    pub const KNOWN: [RecordKind; 5] = [
        RecordKind::Contact,
        RecordKind::GroupV1,
        RecordKind::GroupV2,
        RecordKind::Account,
        RecordKind::StoryDistributionList,
    ];

    /// Converts to the wire tag.
    pub fn to_tag(&self) -> u32 {
        match self {
            RecordKind::Contact => 1,
            RecordKind::GroupV1 => 2,
            RecordKind::GroupV2 => 3,
            RecordKind::Account => 4,
            RecordKind::StoryDistributionList => 5,
            RecordKind::Unknown(tag) => *tag,
        }
    }

    /// Converts from the wire tag.
    pub fn from_tag(tag: u32) -> Self {
        match tag {
            1 => RecordKind::Contact,
            2 => RecordKind::GroupV1,
            3 => RecordKind::GroupV2,
            4 => RecordKind::Account,
            5 => RecordKind::StoryDistributionList,
            other => RecordKind::Unknown(other),
        }
    }

    /// Returns true for `Unknown` kinds.
    pub fn is_unknown(&self) -> bool {
        matches!(self, RecordKind::Unknown(_))
    }
}

impl From<u32> for RecordKind {
    fn from(tag: u32) -> Self {
        Self::from_tag(tag)
    }
}

impl From<RecordKind> for u32 {
    fn from(kind: RecordKind) -> Self {
        kind.to_tag()
    }
}

/// Names one immutable snapshot of a record in the remote store.
///
/// A storage id is never mutated: when the logical record changes, a new id is
/// minted with a [`KeyGenerator`] and the old one is retired.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageId {
    kind: RecordKind,
    raw: RawId,
}

impl StorageId {
    /// Creates a storage id from its parts.
    #[inline]
    #[must_use]
    pub const fn new(kind: RecordKind, raw: RawId) -> Self {
        Self { kind, raw }
    }

    /// Creates a storage id from a slice.
    pub fn from_slice(kind: RecordKind, raw: &[u8]) -> ProtocolResult<Self> {
        let raw: RawId = raw.try_into().map_err(|_| ProtocolError::InvalidIdLength {
            expected: STORAGE_ID_LEN,
            actual: raw.len(),
        })?;
        Ok(Self { kind, raw })
    }

    /// Mints a fresh id of the given kind.
    #[must_use]
    pub fn generate(kind: RecordKind, keys: &dyn KeyGenerator) -> Self {
        Self {
            kind,
            raw: keys.generate(),
        }
    }

    /// Returns the record kind.
    #[inline]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Returns the raw bytes.
    #[inline]
    pub fn raw(&self) -> &RawId {
        &self.raw
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageId({:?}, {self})", self.kind)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.raw {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Identifies the device that wrote a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The primary device id.
    pub const PRIMARY: DeviceId = DeviceId(1);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key used to authenticate reads and writes against the remote store.
///
/// The bytes are opaque to this crate and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageKey([u8; 32]);

impl StorageKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StorageKey(..)")
    }
}
