//! Decode a fetched message body into headers and a MIME tree.

use mail_parser::{Message, MessageParser, MimeHeaders};

use crate::model::message::{FetchedMessage, Uid};
use crate::parser::header;

/// A fetched message with its headers parsed and its MIME tree available.
///
/// Borrows from the [`FetchedMessage`] it was decoded from.
#[derive(Debug)]
pub struct ParsedMessage<'a> {
    pub uid: Uid,

    /// Subject with encoded words resolved, for logging.
    pub subject: String,

    /// Lowercase top-level media type (e.g. `"multipart/mixed"`).
    pub content_type: String,

    /// The `boundary` parameter of a multipart top-level type.
    pub boundary: Option<String>,

    /// The full MIME tree.
    pub message: Message<'a>,
}

impl ParsedMessage<'_> {
    pub fn is_multipart(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }
}

/// Parse a fetched message.
///
/// Returns `None` for bytes that are not an RFC 5322 message (no header
/// block, no recognizable header, or rejected by the MIME parser). The
/// caller skips such messages; they do not abort the cycle.
pub fn decode(fetched: &FetchedMessage) -> Option<ParsedMessage<'_>> {
    let raw = fetched.raw.as_slice();

    let block = header::header_block(raw)?;
    let headers = header::unfold_headers(&header::decode_header_bytes(block));
    if headers.is_empty() {
        return None;
    }

    let message = MessageParser::default().parse(raw)?;

    let subject = header::get_header(&headers, "subject")
        .map(|s| header::decode_subject(&s))
        .unwrap_or_default();

    let root = message.root_part();
    let (content_type, boundary) = match root.content_type() {
        Some(ct) => {
            let media = match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            };
            (media.to_lowercase(), ct.attribute("boundary").map(String::from))
        }
        None => ("text/plain".to_string(), None),
    };

    Some(ParsedMessage {
        uid: fetched.uid,
        subject,
        content_type,
        boundary,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(raw: &[u8]) -> FetchedMessage {
        FetchedMessage {
            uid: Uid::new(7).unwrap(),
            raw: raw.to_vec(),
            flags: Vec::new(),
        }
    }

    #[test]
    fn test_decode_plain_message() {
        let msg = fetched(b"From: a@example.com\r\nSubject: Hello\r\n\r\nBody\r\n");
        let parsed = decode(&msg).expect("parsed");
        assert_eq!(parsed.uid.get(), 7);
        assert_eq!(parsed.subject, "Hello");
        assert_eq!(parsed.content_type, "text/plain");
        assert!(!parsed.is_multipart());
        assert!(parsed.boundary.is_none());
    }

    #[test]
    fn test_decode_multipart_boundary() {
        let msg = fetched(
            b"Subject: =?UTF-8?Q?Factura_n=C2=BA_3?=\r\n\
              Content-Type: Multipart/Mixed; boundary=\"XYZ\"\r\n\r\n\
              --XYZ\r\nContent-Type: text/plain\r\n\r\nhi\r\n--XYZ--\r\n",
        );
        let parsed = decode(&msg).expect("parsed");
        assert_eq!(parsed.subject, "Factura nº 3");
        assert_eq!(parsed.content_type, "multipart/mixed");
        assert_eq!(parsed.boundary.as_deref(), Some("XYZ"));
        assert!(parsed.is_multipart());
    }

    #[test]
    fn test_decode_missing_subject() {
        let msg = fetched(b"From: a@example.com\n\nBody\n");
        assert_eq!(decode(&msg).expect("parsed").subject, "");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(&fetched(b"")).is_none());
        assert!(decode(&fetched(b"no header separator at all")).is_none());
        assert!(decode(&fetched(b"\r\n\r\nonly a body")).is_none());
    }
}
