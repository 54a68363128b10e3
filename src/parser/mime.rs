//! MIME tree descent and PDF attachment extraction.

use humansize::{format_size, BINARY};
use mail_parser::{Message, MessagePart, MessagePartId, MimeHeaders, PartType};
use tracing::{debug, info, warn};

use crate::export::attachment::{AttachmentWriter, DEFAULT_ATTACHMENT_NAME};
use crate::model::attachment::ExtractedFile;
use crate::model::message::Uid;
use crate::parser::message::ParsedMessage;

/// Maximum depth for recursive multipart descent (to bound work on adversarial input).
pub const MAX_DEPTH: usize = 16;

/// `true` for parts that should be saved as PDFs.
///
/// Accepts `application/pdf`, and `application/octet-stream` when the
/// filename ends in `.pdf` (case-insensitive). Many mail clients send PDFs
/// as octet-stream; the filename is a heuristic, not a security check.
pub fn is_pdf_attachment(media_type: &str, filename: Option<&str>) -> bool {
    let media_type = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/pdf" => true,
        "application/octet-stream" => {
            filename.is_some_and(|name| name.trim().to_ascii_lowercase().ends_with(".pdf"))
        }
        _ => false,
    }
}

/// A leaf of the MIME tree, as seen by the classifier.
#[derive(Debug)]
pub struct MimePart<'p> {
    /// Lowercase `type/subtype`; `text/plain` when the part declares none.
    pub media_type: String,

    /// `Content-Transfer-Encoding`, if declared.
    pub transfer_encoding: Option<&'p str>,

    /// Declared filename (`Content-Disposition` filename or `Content-Type` name).
    pub filename: Option<&'p str>,

    /// Transfer-decoded content.
    pub contents: &'p [u8],

    /// The declared transfer encoding could not be decoded.
    pub encoding_problem: bool,
}

impl<'p> MimePart<'p> {
    fn from_part(part: &'p MessagePart<'_>) -> Self {
        Self {
            media_type: media_type_of(part),
            transfer_encoding: part.content_transfer_encoding(),
            filename: part.attachment_name(),
            contents: part.contents(),
            encoding_problem: part.is_encoding_problem,
        }
    }

    pub fn is_pdf_attachment(&self) -> bool {
        is_pdf_attachment(&self.media_type, self.filename)
    }
}

fn media_type_of(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        },
        None => "text/plain".to_string(),
    }
}

/// What one walk over a message found and did.
#[derive(Debug, Default)]
pub struct WalkReport {
    /// Parts that were not descended into.
    pub leaves: usize,
    pub extracted: Vec<ExtractedFile>,
    /// Leaves that were not PDFs, or PDFs kept out by the collision policy.
    pub skipped: usize,
    /// PDFs that could not be decoded or written.
    pub failed: usize,
    /// Containers left unvisited because they were nested too deeply.
    pub depth_exceeded: usize,
}

/// Descends into `multipart/mixed` containers and saves PDF leaves.
#[derive(Debug, Clone)]
pub struct MultipartWalker {
    writer: AttachmentWriter,
    max_depth: usize,
}

impl MultipartWalker {
    pub fn new(writer: AttachmentWriter) -> Self {
        Self {
            writer,
            max_depth: MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn writer(&self) -> &AttachmentWriter {
        &self.writer
    }

    /// Walk a message's MIME tree. Messages that are not multipart are ignored.
    pub fn walk(&self, msg: &ParsedMessage<'_>) -> WalkReport {
        let mut report = WalkReport::default();
        if !msg.is_multipart() {
            debug!(uid = %msg.uid, content_type = %msg.content_type, "Not multipart, nothing to extract");
            return report;
        }

        debug!(
            uid = %msg.uid,
            content_type = %msg.content_type,
            boundary = msg.boundary.as_deref().unwrap_or("-"),
            "Extracting attachments"
        );
        self.walk_message(msg.uid, &msg.message, 0, &mut report);
        report
    }

    fn walk_message(&self, uid: Uid, message: &Message<'_>, depth: usize, report: &mut WalkReport) {
        if let PartType::Multipart(children) = &message.root_part().body {
            self.walk_children(uid, message, children, depth, report);
        }
    }

    fn walk_children(
        &self,
        uid: Uid,
        message: &Message<'_>,
        children: &[MessagePartId],
        depth: usize,
        report: &mut WalkReport,
    ) {
        for &id in children {
            let Some(part) = message.parts.get(id) else {
                continue;
            };
            let media_type = media_type_of(part);

            match &part.body {
                PartType::Multipart(nested) if media_type == "multipart/mixed" => {
                    if depth + 1 > self.max_depth {
                        warn!(%uid, depth, "Multipart nesting too deep, skipping container");
                        report.depth_exceeded += 1;
                        continue;
                    }
                    debug!(%uid, depth = depth + 1, "Descending into nested multipart/mixed");
                    self.walk_children(uid, message, nested, depth + 1, report);
                }
                PartType::Message(inner) if is_multipart_message(inner) => {
                    if depth + 1 > self.max_depth {
                        warn!(%uid, depth, "Attached message nested too deep, skipping");
                        report.depth_exceeded += 1;
                        continue;
                    }
                    debug!(%uid, depth = depth + 1, "Descending into attached message");
                    self.walk_message(uid, inner, depth + 1, report);
                }
                _ => self.visit_leaf(uid, &MimePart::from_part(part), report),
            }
        }
    }

    fn visit_leaf(&self, uid: Uid, part: &MimePart<'_>, report: &mut WalkReport) {
        report.leaves += 1;

        if !part.is_pdf_attachment() {
            report.skipped += 1;
            return;
        }

        let name = part.filename.unwrap_or(DEFAULT_ATTACHMENT_NAME);

        if part.encoding_problem {
            warn!(
                %uid,
                filename = name,
                encoding = part.transfer_encoding.unwrap_or("7bit"),
                "Attachment content could not be decoded, skipping"
            );
            report.failed += 1;
            return;
        }

        match self.writer.write(name, part.contents) {
            Ok(Some(file)) => {
                info!(
                    %uid,
                    path = %file.path.display(),
                    size = %format_size(file.size, BINARY),
                    "Extracted attachment"
                );
                report.extracted.push(file);
            }
            Ok(None) => {
                info!(%uid, filename = name, "Attachment already exists, keeping existing file");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(%uid, filename = name, error = %e, "Failed to store attachment");
                report.failed += 1;
            }
        }
    }
}

fn is_multipart_message(message: &Message<'_>) -> bool {
    matches!(message.root_part().body, PartType::Multipart(_))
}
