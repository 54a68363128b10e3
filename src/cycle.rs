//! One pass over the mailbox: search, fetch, extract, mark seen.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::imap::MailSession;
use crate::model::message::UidSet;
use crate::parser::message;
use crate::parser::mime::MultipartWalker;
use crate::scheduler::Shutdown;

/// Counters for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// UIDs returned by the unseen search.
    pub unread: usize,
    /// Bodies actually returned by the server.
    pub fetched: usize,
    pub parsed: usize,
    /// Messages that could not be decoded.
    pub skipped: usize,
    pub attachments: usize,
    pub failed_attachments: usize,
}

pub struct FetchCycle {
    walker: MultipartWalker,
    shutdown: Shutdown,
}

impl FetchCycle {
    pub fn new(walker: MultipartWalker, shutdown: Shutdown) -> Self {
        Self { walker, shutdown }
    }

    /// Run one cycle against an established session.
    ///
    /// Messages that fail to decode and attachments that fail to save are
    /// logged and counted; they do not fail the cycle and their UIDs are
    /// still marked seen. UIDs the server returned no body for are not.
    /// A shutdown request seen between messages aborts with
    /// [`Error::Cancelled`] before anything is marked.
    pub fn run_once(&self, session: &mut impl MailSession) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        self.walker.writer().ensure_dir()?;

        let uids = session.search_unseen()?;
        report.unread = uids.len();
        if uids.is_empty() {
            info!("No unread messages");
            return Ok(report);
        }
        info!(count = uids.len(), "Found unread messages");

        let messages = session.fetch_bodies(&uids)?;
        report.fetched = messages.len();

        for fetched in &messages {
            if self.shutdown.is_requested() {
                warn!(
                    remaining = messages.len() - report.parsed - report.skipped,
                    "Shutdown requested, leaving messages unseen"
                );
                return Err(Error::Cancelled);
            }

            let Some(parsed) = message::decode(fetched) else {
                warn!(uid = %fetched.uid, bytes = fetched.raw.len(), "Could not parse message, skipping");
                report.skipped += 1;
                continue;
            };
            report.parsed += 1;
            info!(uid = %parsed.uid, "|-- {}", parsed.subject);

            let walked = self.walker.walk(&parsed);
            debug!(
                uid = %parsed.uid,
                leaves = walked.leaves,
                extracted = walked.extracted.len(),
                "Message processed"
            );
            report.attachments += walked.extracted.len();
            report.failed_attachments += walked.failed;
        }

        // only messages whose body was actually processed
        let processed: UidSet = messages.iter().map(|m| m.uid).collect();
        if processed.len() < uids.len() {
            warn!(
                missing = uids.len() - processed.len(),
                "Some unread messages were not returned, leaving them unseen"
            );
        }
        if processed.is_empty() {
            return Ok(report);
        }
        session.mark_seen(&processed)?;
        info!(
            count = processed.len(),
            attachments = report.attachments,
            "Messages marked seen"
        );
        Ok(report)
    }
}
