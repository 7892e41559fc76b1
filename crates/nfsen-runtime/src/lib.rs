//! Runtime orchestration layer for nfsen-ng.
//!
//! Runs the bounded-concurrency historical import, the polling listener and
//! the PID-file based daemon lifecycle on top of the processor and datasource
//! contracts from `nfsen-data`.

pub mod checkpoint;
pub mod control;
pub mod import;
pub mod ingest;
pub mod listener;
pub mod pid;
pub mod signal;

#[cfg(test)]
mod testing;

pub use nfsen_core as core;
pub use nfsen_data as data;
