//! Message identifiers and fetched message bodies.

use std::fmt;
use std::num::NonZeroU32;

/// A per-mailbox unique identifier. IMAP UIDs are never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid(NonZeroU32);

impl Uid {
    /// Returns `None` for zero.
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unread UIDs discovered by one search, sorted and free of duplicates.
///
/// Consumed exactly once per cycle: fetched, then marked seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidSet {
    uids: Vec<Uid>,
}

impl UidSet {
    pub fn new(uids: impl IntoIterator<Item = Uid>) -> Self {
        let mut uids: Vec<Uid> = uids.into_iter().collect();
        uids.sort_unstable();
        uids.dedup();
        Self { uids }
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.uids.binary_search(&uid).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = Uid> + '_ {
        self.uids.iter().copied()
    }

    /// IMAP sequence-set syntax with consecutive runs collapsed: `1:3,7,9:10`.
    pub fn to_sequence_set(&self) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < self.uids.len() {
            let start = self.uids[i].get();
            let mut end = start;
            while i + 1 < self.uids.len() && self.uids[i + 1].get() == end + 1 {
                end += 1;
                i += 1;
            }
            if !out.is_empty() {
                out.push(',');
            }
            if start == end {
                out.push_str(&start.to_string());
            } else {
                out.push_str(&format!("{start}:{end}"));
            }
            i += 1;
        }
        out
    }
}

impl FromIterator<Uid> for UidSet {
    fn from_iter<I: IntoIterator<Item = Uid>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// One message body returned by `UID FETCH`.
///
/// Lives only for the duration of the cycle that fetched it.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: Uid,

    /// Full RFC 5322 bytes (`BODY[]`).
    pub raw: Vec<u8>,

    /// Flags as reported by the server at fetch time (e.g. `\Recent`).
    pub flags: Vec<String>,
}
