//! # deltasync core
//!
//! Records, schemas and the record store adapter for deltasync.
//!
//! This crate provides:
//! - [`Record`] with its sync metadata (revision, dirty, deleted)
//! - [`SchemaRegistry`] for the record types that participate in sync
//! - The [`RecordStore`] adapter trait and [`MemoryRecordStore`]
//! - [`LocalMutations`] for application writes that keep sync metadata right
//! - Logical deletion helpers in [`deletion`]
//!
//! ## Invariants
//!
//! - A record's revision strictly increases with every local mutation
//! - `dirty == false` implies no unsynced local change exists
//! - Tombstones are excluded from live scans but still sync

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod deletion;
mod error;
mod id;
mod memory;
mod record;
mod schema;
mod store;
mod types;

pub use deltasync_codec::{FieldKind, Fields, Value};
pub use error::{CoreError, CoreResult};
pub use id::RecordId;
pub use memory::MemoryRecordStore;
pub use record::{changed_fields, Record};
pub use schema::{FieldDef, RecordSchema, SchemaRegistry};
pub use store::{LocalMutations, RecordStore, Visibility};
pub use types::{now_millis, RecordKey, RecordType, Revision};
