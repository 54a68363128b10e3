//! The mailbox session: login, INBOX selection, and the three commands a
//! fetch cycle needs (search unseen, fetch bodies, mark seen).

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::MailboxConfig;
use crate::error::{Error, Result};
use crate::imap::connection::{TlsTransport, Transport};
use crate::imap::response::{self, FetchData, Response, Status, Untagged};
use crate::model::message::{FetchedMessage, Uid, UidSet};

/// Largest response accepted, literals included.
const MAX_RESPONSE_SIZE: usize = 256 * 1024 * 1024;

/// Mailbox opened for every session.
pub const MAILBOX: &str = "INBOX";

/// Per-receive wait used unless configured otherwise.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive receive timeouts tolerated before a command is abandoned.
pub const DEFAULT_MAX_TIMEOUTS: u32 = 3;

/// Operations a fetch cycle performs against the mailbox.
pub trait MailSession {
    /// UIDs of all messages without the `\Seen` flag.
    fn search_unseen(&mut self) -> Result<UidSet>;

    /// Full bodies of `uids`. Either every response is drained or the call fails.
    fn fetch_bodies(&mut self, uids: &UidSet) -> Result<Vec<FetchedMessage>>;

    /// Add `\Seen` to every message in `uids`.
    fn mark_seen(&mut self, uids: &UidSet) -> Result<()>;

    /// Log out, waiting at most `timeout`. Best-effort; never fails.
    fn disconnect(&mut self, timeout: Duration);
}

/// Receive budget for commands.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub recv_timeout: Duration,
    pub max_timeouts: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            max_timeouts: DEFAULT_MAX_TIMEOUTS,
        }
    }
}

/// Lifecycle of the protocol connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    LoggedIn,
    MailboxSelected,
}

/// Generates sequential command tags: `A0001`, `A0002`, …
#[derive(Debug, Default)]
struct TagGenerator {
    counter: u32,
}

impl TagGenerator {
    fn next(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("A{:04}", self.counter)
    }
}

/// An IMAP session over any [`Transport`].
pub struct ImapSession<T: Transport> {
    transport: T,
    /// Received bytes not yet consumed as a complete response.
    buffer: Vec<u8>,
    tags: TagGenerator,
    state: SessionState,
    options: SessionOptions,
}

/// Open a TLS connection to the configured server, log in, and select INBOX.
pub fn connect(config: &MailboxConfig, options: SessionOptions) -> Result<ImapSession<TlsTransport>> {
    let (host, port) = config.host_port()?;
    info!(server = %config.server, "Connecting to server");
    let transport = TlsTransport::connect(host, port, options.recv_timeout)?;
    ImapSession::establish(transport, config, options)
}

impl<T: Transport> ImapSession<T> {
    /// Run the greeting, LOGIN (unless pre-authenticated) and SELECT over an
    /// already connected transport.
    pub fn establish(transport: T, config: &MailboxConfig, options: SessionOptions) -> Result<Self> {
        let mut session = Self {
            transport,
            buffer: Vec::new(),
            tags: TagGenerator::default(),
            state: SessionState::Connecting,
            options,
        };

        match session.establish_inner(config) {
            Ok(()) => Ok(session),
            Err(e) => {
                session.transport.close();
                session.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    fn establish_inner(&mut self, config: &MailboxConfig) -> Result<()> {
        let greeting = self.read_greeting(&config.server)?;

        if greeting == Status::PreAuth {
            debug!("Server pre-authenticated the connection, skipping login");
        } else {
            info!(user = %config.user, "Logging in");
            let command = format!("LOGIN {} {}", quote(&config.user)?, quote(&config.password)?);
            self.execute(&command, |_| Ok(())).map_err(|e| match e {
                Error::No { text, .. } | Error::Bad { text, .. } => Error::Login {
                    user: config.user.clone(),
                    reason: text,
                },
                other => other,
            })?;
        }
        self.state = SessionState::LoggedIn;

        info!(mailbox = MAILBOX, "Opening mailbox");
        let mut exists = None;
        self.execute(&format!("SELECT {MAILBOX}"), |u| {
            if let Untagged::Exists(n) = u {
                exists = Some(n);
            }
            Ok(())
        })?;
        self.state = SessionState::MailboxSelected;
        debug!(mailbox = MAILBOX, messages = ?exists, "Mailbox selected");
        Ok(())
    }

    fn read_greeting(&mut self, server: &str) -> Result<Status> {
        let mut timeouts = 0;
        loop {
            let Some(greeting) = self.read_response()? else {
                timeouts += 1;
                if timeouts >= self.options.max_timeouts {
                    return Err(Error::Connection {
                        server: server.to_string(),
                        reason: "no greeting from server".to_string(),
                    });
                }
                continue;
            };
            return match greeting {
                Response::Untagged(Untagged::Status { status, text }) => match status {
                    Status::Ok | Status::PreAuth => Ok(status),
                    _ => Err(Error::Connection {
                        server: server.to_string(),
                        reason: format!("server refused connection: {text}"),
                    }),
                },
                other => Err(Error::Connection {
                    server: server.to_string(),
                    reason: format!("unexpected greeting: {other:?}"),
                }),
            };
        }
    }

    /// Next complete response, reading from the transport as needed.
    ///
    /// Returns `Ok(None)` when one receive timed out before a full response
    /// was buffered; the partial bytes are kept for the next call.
    fn read_response(&mut self) -> Result<Option<Response>> {
        loop {
            if let Some((response, consumed)) = response::parse(&self.buffer)? {
                trace!("<< {}", summarize(&self.buffer[..consumed]));
                self.buffer.drain(..consumed);
                return Ok(Some(response));
            }
            if self.buffer.len() > MAX_RESPONSE_SIZE {
                return Err(Error::Protocol(format!(
                    "response exceeds {MAX_RESPONSE_SIZE} bytes"
                )));
            }
            match self.transport.recv(self.options.recv_timeout)? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn require_selected(&self, operation: &str) -> Result<()> {
        if self.state == SessionState::MailboxSelected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{operation} requires a selected mailbox (state: {:?})",
                self.state
            )))
        }
    }

    /// Send one command and drain responses until its tagged completion.
    ///
    /// Untagged data is handed to `on_untagged`. Each receive waits at most
    /// `recv_timeout`; `max_timeouts` consecutive empty receives abandon the
    /// command. Any received response resets the count.
    fn execute<F>(&mut self, command: &str, mut on_untagged: F) -> Result<()>
    where
        F: FnMut(Untagged) -> Result<()>,
    {
        let tag = self.tags.next();
        let name = command_name(command);
        trace!(">> {tag} {}", redact(command));
        self.transport.send(format!("{tag} {command}\r\n").as_bytes())?;

        let mut timeouts = 0;
        loop {
            let Some(response) = self.read_response()? else {
                timeouts += 1;
                warn!(
                    command = %name,
                    attempt = timeouts,
                    max = self.options.max_timeouts,
                    "Timed out waiting for server response"
                );
                if timeouts >= self.options.max_timeouts {
                    return Err(Error::Timeout {
                        command: name,
                        attempts: timeouts,
                        per_recv: self.options.recv_timeout,
                    });
                }
                continue;
            };
            timeouts = 0;

            match response {
                Response::Tagged {
                    tag: got,
                    status,
                    text,
                } if got == tag => {
                    return match status {
                        Status::Ok => Ok(()),
                        Status::No => Err(Error::No { command: name, text }),
                        Status::Bad => Err(Error::Bad { command: name, text }),
                        _ => Err(Error::Protocol(format!("{name}: unexpected completion {status:?}"))),
                    };
                }
                Response::Tagged { tag: got, .. } => {
                    debug!(tag = %got, "Ignoring completion for another command");
                }
                Response::Untagged(Untagged::Status {
                    status: Status::Bye,
                    text,
                }) => {
                    if name != "LOGOUT" {
                        return Err(Error::Bye(text));
                    }
                }
                Response::Untagged(untagged) => on_untagged(untagged)?,
                Response::Continuation(text) => {
                    return Err(Error::Protocol(format!(
                        "{name}: unexpected continuation request: {text}"
                    )));
                }
            }
        }
    }
}

impl<T: Transport> MailSession for ImapSession<T> {
    fn search_unseen(&mut self) -> Result<UidSet> {
        self.require_selected("UID SEARCH")?;
        info!("Fetching unread UIDs");

        let mut found: Vec<Uid> = Vec::new();
        self.execute("UID SEARCH 1:* NOT SEEN", |u| {
            if let Untagged::Search(uids) = u {
                found.extend(uids);
            }
            Ok(())
        })?;

        let set = UidSet::new(found);
        info!(count = set.len(), "Search complete");
        Ok(set)
    }

    fn fetch_bodies(&mut self, uids: &UidSet) -> Result<Vec<FetchedMessage>> {
        self.require_selected("UID FETCH")?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        info!(count = uids.len(), "Fetching mail bodies");

        let mut messages: Vec<FetchedMessage> = Vec::with_capacity(uids.len());
        let command = format!("UID FETCH {} (UID FLAGS BODY.PEEK[])", uids.to_sequence_set());
        self.execute(&command, |u| {
            if let Untagged::Fetch { seq, data } = u {
                collect_fetch(seq, data, uids, &mut messages);
            }
            Ok(())
        })?;

        if messages.len() < uids.len() {
            warn!(
                requested = uids.len(),
                received = messages.len(),
                "Server returned fewer bodies than requested"
            );
        }
        Ok(messages)
    }

    fn mark_seen(&mut self, uids: &UidSet) -> Result<()> {
        self.require_selected("UID STORE")?;
        if uids.is_empty() {
            return Ok(());
        }
        info!(count = uids.len(), "Marking messages seen");
        let command = format!("UID STORE {} +FLAGS.SILENT (\\Seen)", uids.to_sequence_set());
        self.execute(&command, |_| Ok(()))
    }

    fn disconnect(&mut self, timeout: Duration) {
        if self.state == SessionState::Disconnected {
            return;
        }
        let saved = self.options;
        self.options = SessionOptions {
            recv_timeout: timeout,
            max_timeouts: 1,
        };
        if let Err(e) = self.execute("LOGOUT", |_| Ok(())) {
            debug!(error = %e, "Logout did not complete cleanly");
        }
        self.options = saved;
        self.transport.close();
        self.state = SessionState::Disconnected;
        debug!("Disconnected");
    }
}

fn collect_fetch(seq: u32, data: FetchData, requested: &UidSet, out: &mut Vec<FetchedMessage>) {
    let FetchData { uid, flags, body } = data;
    let Some(uid) = uid else {
        debug!(seq, "FETCH response without UID, ignoring");
        return;
    };
    let Some(raw) = body else {
        // unsolicited flag update
        debug!(%uid, "FETCH response without body, ignoring");
        return;
    };
    if !requested.contains(uid) {
        warn!(%uid, "Server returned a message that was not requested, ignoring");
        return;
    }
    if out.iter().any(|m| m.uid == uid) {
        return;
    }
    out.push(FetchedMessage { uid, raw, flags });
}

/// `LOGIN` arguments as IMAP quoted strings.
fn quote(s: &str) -> Result<String> {
    if s.contains(['\r', '\n', '\0']) {
        return Err(Error::Protocol("credentials contain line breaks".to_string()));
    }
    Ok(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
}

/// Command keyword(s) used in errors and logs: `UID FETCH`, `LOGIN`, …
fn command_name(command: &str) -> String {
    let mut words = command.split(' ');
    match words.next() {
        Some("UID") => format!("UID {}", words.next().unwrap_or("")),
        Some(word) => word.to_string(),
        None => String::new(),
    }
}

fn redact(command: &str) -> String {
    if command.starts_with("LOGIN ") {
        "LOGIN <redacted>".to_string()
    } else {
        command.to_string()
    }
}

/// First line of a response plus the size of anything that follows.
fn summarize(raw: &[u8]) -> String {
    let first_end = raw
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(raw.len());
    let first = String::from_utf8_lossy(&raw[..first_end]);
    let rest = raw.len().saturating_sub(first_end + 2);
    if rest > 0 {
        format!("{first} … (+{rest} bytes)")
    } else {
        first.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use super::*;
    use crate::config::CollisionPolicy;

    /// Replays canned server output; `None` entries are receive timeouts.
    #[derive(Default)]
    struct Scripted {
        replies: VecDeque<Option<Vec<u8>>>,
        sent: Vec<String>,
        closed: bool,
    }

    impl Scripted {
        fn new(replies: &[Option<&str>]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|r| r.map(|s| s.as_bytes().to_vec()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl Transport for Scripted {
        fn send(&mut self, data: &[u8]) -> Result<()> {
            self.sent.push(String::from_utf8_lossy(data).into_owned());
            Ok(())
        }

        fn recv(&mut self, _timeout: Duration) -> Result<Option<Vec<u8>>> {
            Ok(self.replies.pop_front().flatten())
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn config() -> MailboxConfig {
        MailboxConfig {
            server: "imap.example.com:993".into(),
            user: "scanner".into(),
            password: "pa\"ss".into(),
            destination: PathBuf::from("out"),
            on_collision: CollisionPolicy::Overwrite,
        }
    }

    fn login_script() -> Vec<Option<&'static str>> {
        vec![
            Some("* OK IMAP4rev1 ready\r\n"),
            Some("A0001 OK LOGIN completed\r\n"),
            Some("* 3 EXISTS\r\n"),
            Some("A0002 OK [READ-WRITE] SELECT completed\r\n"),
        ]
    }

    fn session(extra: &[Option<&'static str>]) -> ImapSession<Scripted> {
        let mut script = login_script();
        script.extend_from_slice(extra);
        ImapSession::establish(Scripted::new(&script), &config(), SessionOptions::default())
            .expect("establish")
    }

    fn uids(values: &[u32]) -> UidSet {
        values.iter().filter_map(|&v| Uid::new(v)).collect()
    }

    #[test]
    fn test_establish_logs_in_and_selects() {
        let s = session(&[]);
        assert_eq!(s.state(), SessionState::MailboxSelected);
        assert_eq!(s.transport.sent[0], "A0001 LOGIN \"scanner\" \"pa\\\"ss\"\r\n");
        assert_eq!(s.transport.sent[1], "A0002 SELECT INBOX\r\n");
    }

    #[test]
    fn test_preauth_skips_login() {
        let script = [
            Some("* PREAUTH welcome back\r\n"),
            Some("A0001 OK SELECT completed\r\n"),
        ];
        let s = ImapSession::establish(Scripted::new(&script), &config(), SessionOptions::default())
            .unwrap();
        assert_eq!(s.transport.sent, vec!["A0001 SELECT INBOX\r\n".to_string()]);
    }

    #[test]
    fn test_login_rejected_is_login_error() {
        let script = [
            Some("* OK ready\r\n"),
            Some("A0001 NO [AUTHENTICATIONFAILED] bad password\r\n"),
        ];
        let err = ImapSession::establish(Scripted::new(&script), &config(), SessionOptions::default())
            .err()
            .expect("login must fail");
        assert!(matches!(err, Error::Login { .. }), "{err:?}");
    }

    #[test]
    fn test_bye_greeting_is_connection_error() {
        let script = [Some("* BYE too many connections\r\n")];
        let err = ImapSession::establish(Scripted::new(&script), &config(), SessionOptions::default())
            .err()
            .expect("must fail");
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[test]
    fn test_search_unseen() {
        let mut s = session(&[
            Some("* SEARCH 12 4 9\r\n"),
            Some("A0003 OK SEARCH completed\r\n"),
        ]);
        let set = s.search_unseen().unwrap();
        assert_eq!(set, uids(&[4, 9, 12]));
        assert_eq!(s.transport.sent[2], "A0003 UID SEARCH 1:* NOT SEEN\r\n");
    }

    #[test]
    fn test_search_empty() {
        let mut s = session(&[Some("* SEARCH\r\n"), Some("A0003 OK done\r\n")]);
        assert!(s.search_unseen().unwrap().is_empty());
    }

    #[test]
    fn test_fetch_drains_until_completion() {
        let mut s = session(&[
            Some("* 1 FETCH (UID 4 FLAGS () BODY[] {9}\r\nSubject:\n)\r\n"),
            None,
            Some("* 2 FETCH (FLAGS (\\Recent) UID 9 BODY[] {2}\r\nhi)\r\n"),
            Some("* 2 FETCH (FLAGS (\\Seen) UID 9)\r\n"),
            Some("A0003 OK FETCH completed\r\n"),
        ]);
        let got = s.fetch_bodies(&uids(&[4, 9])).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].uid.get(), 4);
        assert_eq!(got[0].raw, b"Subject:\n");
        assert_eq!(got[1].raw, b"hi");
        assert_eq!(got[1].flags, vec!["\\Recent".to_string()]);
        assert_eq!(
            s.transport.sent[2],
            "A0003 UID FETCH 4,9 (UID FLAGS BODY.PEEK[])\r\n"
        );
    }

    #[test]
    fn test_fetch_literal_split_across_receives() {
        let mut s = session(&[
            Some("* 1 FETCH (UID 4 BODY[] {5}\r\nhe"),
            None,
            Some("llo)\r\n* 2 FETCH (UID 5 BODY[] {2}\r\nok)\r\nA0003 OK"),
            None,
            Some(" FETCH completed\r\n"),
        ]);
        let got = s.fetch_bodies(&uids(&[4, 5])).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].raw, b"hello");
        assert_eq!(got[1].raw, b"ok");
    }

    #[test]
    fn test_fetch_times_out_after_consecutive_timeouts() {
        let mut s = session(&[
            Some("* 1 FETCH (UID 4 BODY[] {2}\r\nhi)\r\n"),
            None,
            None,
            None,
        ]);
        let err = s.fetch_bodies(&uids(&[4, 5])).unwrap_err();
        assert!(matches!(err, Error::Timeout { attempts: 3, .. }), "{err:?}");
    }

    #[test]
    fn test_fetch_no_is_error() {
        let mut s = session(&[Some("A0003 NO [SERVERBUG] try later\r\n")]);
        assert!(matches!(
            s.fetch_bodies(&uids(&[1])).unwrap_err(),
            Error::No { .. }
        ));
    }

    #[test]
    fn test_bye_during_command() {
        let mut s = session(&[Some("* BYE shutting down\r\n")]);
        assert!(matches!(s.search_unseen().unwrap_err(), Error::Bye(_)));
    }

    #[test]
    fn test_mark_seen_command() {
        let mut s = session(&[Some("A0003 OK STORE completed\r\n")]);
        s.mark_seen(&uids(&[1, 2, 3, 8])).unwrap();
        assert_eq!(
            s.transport.sent[2],
            "A0003 UID STORE 1:3,8 +FLAGS.SILENT (\\Seen)\r\n"
        );
    }

    #[test]
    fn test_disconnect_is_best_effort() {
        let mut s = session(&[None]);
        s.disconnect(Duration::from_millis(10));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.transport.closed);
        assert_eq!(s.transport.sent.last().unwrap(), "A0003 LOGOUT\r\n");
        // second call does nothing
        s.disconnect(Duration::from_millis(10));
        assert_eq!(s.transport.sent.len(), 3);
    }

    #[test]
    fn test_operations_require_selected_mailbox() {
        let mut s = session(&[None]);
        s.disconnect(Duration::from_millis(10));
        assert!(matches!(s.search_unseen(), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_quote_rejects_line_breaks() {
        assert!(quote("a\r\nb").is_err());
        assert_eq!(quote("a\\b").unwrap(), "\"a\\\\b\"");
    }

    #[test]
    fn test_command_name() {
        assert_eq!(command_name("UID FETCH 1:3 (BODY[])"), "UID FETCH");
        assert_eq!(command_name("LOGOUT"), "LOGOUT");
    }
}
