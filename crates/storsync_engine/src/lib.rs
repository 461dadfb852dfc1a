//! # storsync engine
//!
//! Reconciles a device's contacts, groups, account settings and story
//! distribution lists with the remote record store shared by its linked devices.
//!
//! This crate provides:
//! - The sync pass state machine (fetch → diff → merge → write set → push)
//! - Per-kind record processors with explicit merge policies
//! - Remote storage and local store abstractions, with in-memory versions
//! - Retry configuration and a retryable/fatal error taxonomy
//!
//! ## Key Invariants
//!
//! - No network call is made while a local transaction is open
//! - The remote manifest is persisted locally before any push
//! - Merges are idempotent; an unchanged record keeps its storage id
//! - At most one pass runs at a time per engine

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod apply;
mod config;
mod error;
mod memory;
mod processor;
mod state;
mod store;
mod transport;

pub use apply::{apply_remote_records, MergeSummary, Processors};
pub use config::{RetryConfig, SelfIdentity, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use memory::{MemoryLocalStore, MemoryTransaction};
pub use processor::{
    process_batch, AccountProcessor, BatchOutcome, ContactProcessor, GroupV1Processor,
    GroupV2Processor, RecordProcessor, StoryDistributionListProcessor,
};
pub use state::{SyncEngine, SyncReport, SyncState, SyncStats};
pub use store::{LocalStore, LocalTransaction, RecordTable};
pub use transport::{InMemoryRemoteStorage, RemoteStorage};
