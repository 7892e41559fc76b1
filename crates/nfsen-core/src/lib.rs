//! Shared domain layer for nfsen-ng.
//!
//! Models, errors, settings, capture file naming and directory layout
//! validation used by the data and runtime crates.

pub mod capture;
pub mod error;
pub mod layout;
pub mod models;
pub mod settings;
pub mod time_utils;

pub use error::{NfsenError, Result};
