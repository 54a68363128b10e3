//! Core data model types: UIDs, fetched messages, and extracted files.

pub mod attachment;
pub mod message;
