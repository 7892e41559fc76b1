//! Processing and storage layer for nfsen-ng.
//!
//! Drives the external flow tool through the [`processor::Processor`]
//! contract and persists day buckets through the
//! [`datasource::Datasource`] contract. Both are resolved once from the
//! settings by a static registry.

pub mod datasource;
pub mod json_store;
pub mod memory;
pub mod nfdump;
pub mod processor;
pub mod summary;

pub use nfsen_core as core;
