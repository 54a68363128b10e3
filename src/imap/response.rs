//! Owned view of the server responses goatee consumes.
//!
//! Parsing is done by `imap-proto`; this module converts its borrowed
//! responses into owned values so the receive buffer can be drained.
//! Only status responses, `SEARCH`, `EXISTS` and `FETCH` (`UID`, `FLAGS`,
//! `BODY[]`) are kept in detail.

use imap_proto::{AttributeValue, MailboxDatum};

use crate::error::{Error, Result};
use crate::model::message::Uid;

/// Completion or condition state of a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    No,
    Bad,
    PreAuth,
    Bye,
}

impl From<imap_proto::Status> for Status {
    fn from(status: imap_proto::Status) -> Self {
        #[allow(unreachable_patterns)]
        match status {
            imap_proto::Status::Ok => Self::Ok,
            imap_proto::Status::No => Self::No,
            imap_proto::Status::Bad => Self::Bad,
            imap_proto::Status::PreAuth => Self::PreAuth,
            imap_proto::Status::Bye => Self::Bye,
            _ => Self::Bad,
        }
    }
}

/// Attributes of one `FETCH` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchData {
    pub uid: Option<Uid>,
    pub flags: Vec<String>,
    /// `BODY[]` (or `RFC822`) content.
    pub body: Option<Vec<u8>>,
}

/// Untagged (`* …`) server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Untagged {
    Status { status: Status, text: String },
    Search(Vec<Uid>),
    Fetch { seq: u32, data: FetchData },
    Exists(u32),
    Other,
}

/// One complete server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Tagged {
        tag: String,
        status: Status,
        text: String,
    },
    Untagged(Untagged),
    Continuation(String),
}

/// Parse the first complete response in `buffer`.
///
/// Returns the response and the number of bytes it occupied, or `Ok(None)`
/// if more data is needed.
pub fn parse(buffer: &[u8]) -> Result<Option<(Response, usize)>> {
    if buffer.is_empty() {
        return Ok(None);
    }
    match imap_proto::parser::parse_response(buffer) {
        Ok((rest, response)) => {
            let consumed = buffer.len() - rest.len();
            Ok(Some((convert(response), consumed)))
        }
        Err(e) if e.is_incomplete() => Ok(None),
        Err(_) => {
            let line_end = buffer
                .windows(2)
                .position(|w| w == b"\r\n")
                .unwrap_or(buffer.len());
            Err(Error::Protocol(format!(
                "unparseable response: {}",
                String::from_utf8_lossy(&buffer[..line_end.min(200)])
            )))
        }
    }
}

fn convert(response: imap_proto::Response<'_>) -> Response {
    use imap_proto::Response as Proto;

    match response {
        Proto::Done {
            tag,
            status,
            information,
            ..
        } => Response::Tagged {
            tag: tag.0,
            status: status.into(),
            text: information.map(|s| s.to_string()).unwrap_or_default(),
        },
        Proto::Data {
            status,
            information,
            ..
        } => Response::Untagged(Untagged::Status {
            status: status.into(),
            text: information.map(|s| s.to_string()).unwrap_or_default(),
        }),
        Proto::Continue { information, .. } => {
            Response::Continuation(information.map(|s| s.to_string()).unwrap_or_default())
        }
        Proto::MailboxData(MailboxDatum::Search(ids)) => {
            Response::Untagged(Untagged::Search(ids.into_iter().filter_map(Uid::new).collect()))
        }
        Proto::MailboxData(MailboxDatum::Exists(n)) => Response::Untagged(Untagged::Exists(n)),
        Proto::Fetch(seq, attributes) => Response::Untagged(Untagged::Fetch {
            seq,
            data: fetch_data(attributes),
        }),
        _ => Response::Untagged(Untagged::Other),
    }
}

fn fetch_data(attributes: Vec<AttributeValue<'_>>) -> FetchData {
    let mut data = FetchData::default();
    for attribute in attributes {
        match attribute {
            AttributeValue::Uid(n) => data.uid = Uid::new(n),
            AttributeValue::Flags(flags) => {
                data.flags = flags.iter().map(|f| f.to_string()).collect();
            }
            // BODY[HEADER] and other sections carry a section path
            AttributeValue::BodySection {
                section: None,
                data: body,
                ..
            } => {
                data.body = body.map(|b| b.to_vec());
            }
            AttributeValue::Rfc822(body) => {
                data.body = body.map(|b| b.to_vec());
            }
            _ => {}
        }
    }
    data
}
