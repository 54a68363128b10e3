//! Writing extracted attachments to disk.

pub mod attachment;
