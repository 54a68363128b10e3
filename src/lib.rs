//! `goatee` — polls an IMAP mailbox and saves the PDF attachments of unread
//! messages to a directory.
//!
//! The library holds the whole pipeline: configuration, the IMAP session,
//! MIME decoding, attachment extraction, and the scheduling loop. The binary
//! only parses arguments and sets up logging.

pub mod config;
pub mod cycle;
pub mod error;
pub mod export;
pub mod imap;
pub mod model;
pub mod parser;
pub mod scheduler;
