//! # storsync protocol
//!
//! Record model and pure set logic for the storage-service sync engine.
//!
//! This crate provides:
//! - `StorageId` / `RecordKind` identifiers and the versioned `Manifest`
//! - Typed record payloads (`ContactRecord`, `GroupV2Record`, ...) wrapped in
//!   `StorageRecord`
//! - `KeyGenerator` for minting fresh storage ids
//! - The id differencer (`find_id_differences`) and the write-set builder
//!   (`build_write_operation`)
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
mod id;
mod keys;
mod manifest;
mod record;
mod write_set;

pub use diff::{find_id_differences, IdDifferenceResult};
pub use error::{ProtocolError, ProtocolResult};
pub use id::{DeviceId, RawId, RecordKind, StorageId, StorageKey, STORAGE_ID_LEN};
pub use keys::{KeyGenerator, RandomKeyGenerator, SequentialKeyGenerator};
pub use manifest::Manifest;
pub use record::{
    AccountRecord, ContactRecord, GroupV1Record, GroupV2Record, PhoneNumberSharingMode,
    StorageRecord, StorageRecordUpdate, StoryDistributionListRecord, StorySendMode, SyncRecord,
    UnknownRecord, GROUP_MASTER_KEY_LEN, GROUP_V1_ID_LEN, MY_STORY_ID,
};
pub use write_set::{build_write_operation, WriteOperationResult};
