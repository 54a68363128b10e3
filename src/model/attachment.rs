//! Extracted attachment artifacts.

use std::path::PathBuf;

/// A PDF attachment written to the destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Final path of the file (after sanitization and collision handling).
    pub path: PathBuf,

    /// Decoded size in bytes.
    pub size: u64,
}
