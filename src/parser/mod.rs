//! Message decoding: header and encoded-word handling, MIME tree walking.

pub mod header;
pub mod message;
pub mod mime;
