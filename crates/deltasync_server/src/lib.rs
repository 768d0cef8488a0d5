//! # deltasync server
//!
//! Reference in-memory remote for deltasync.
//!
//! This crate provides:
//! - [`SyncServer`]: answers pull and push requests, raw or CBOR-encoded
//! - [`DeltaLog`]: latest delta per record, stamped with an increasing UST
//! - Redelivery detection by pack ID
//!
//! The server holds no record store of its own; the log is the state.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod log;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use log::{DeltaLog, LogPage};
pub use server::{SyncServer, PULL_PATH, PUSH_PATH};
