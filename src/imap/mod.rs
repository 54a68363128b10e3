//! Minimal blocking IMAP4rev1 client: byte transport, response conversion,
//! and the mailbox session used by a fetch cycle.

pub mod connection;
pub mod response;
pub mod session;

pub use session::{connect, ImapSession, MailSession, SessionOptions};
