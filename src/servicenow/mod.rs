//! ServiceNow REST module
//!
//! Thin client over the table and attachment APIs: attachment listing,
//! owner record lookup and streamed attachment downloads.

pub mod client;
pub mod errors;
pub mod types;

pub use client::RecordClient;
pub use errors::SnowError;
pub use types::*;
