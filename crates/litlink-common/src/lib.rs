//! litlink-common: Shared error type used across all litlink crates.

pub mod error;

pub use error::{LitlinkError, Result};
