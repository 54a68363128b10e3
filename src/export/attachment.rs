//! Write extracted attachments into the destination directory.
//!
//! Content goes to a temporary file in the same directory first and is only
//! renamed into place once fully written, so a failed write never leaves a
//! truncated PDF behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::CollisionPolicy;
use crate::error::{Error, Result};
use crate::model::attachment::ExtractedFile;

/// Name used for a PDF part that declares no filename.
pub const DEFAULT_ATTACHMENT_NAME: &str = "attachment.pdf";

/// Longest filename we produce, in bytes.
const MAX_FILENAME_LEN: usize = 200;

/// Make a declared attachment filename safe to use as a single path component.
///
/// Every character that is not an ASCII letter, digit, `_` or `.` becomes `_`.
/// Names made only of dots (`.`, `..`) or empty names map to
/// [`DEFAULT_ATTACHMENT_NAME`]. Applying this twice yields the same result.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();

    if sanitized.chars().all(|c| c == '.') {
        DEFAULT_ATTACHMENT_NAME.to_string()
    } else {
        sanitized
    }
}

/// Writes attachments under one directory with one collision policy.
#[derive(Debug, Clone)]
pub struct AttachmentWriter {
    dir: PathBuf,
    policy: CollisionPolicy,
}

impl AttachmentWriter {
    pub fn new(dir: impl Into<PathBuf>, policy: CollisionPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the destination directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))
    }

    /// Store `contents` under the sanitized form of `declared_name`.
    ///
    /// Returns `Ok(None)` when the policy is [`CollisionPolicy::Skip`] and the
    /// target already exists.
    pub fn write(&self, declared_name: &str, contents: &[u8]) -> Result<Option<ExtractedFile>> {
        let target = self.dir.join(sanitize_filename(declared_name));

        let target = match self.policy {
            CollisionPolicy::Overwrite => target,
            CollisionPolicy::Rename => unique_path(&target),
            CollisionPolicy::Skip if target.exists() => return Ok(None),
            CollisionPolicy::Skip => target,
        };

        // Dropping the temp file on any early return deletes it.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| Error::io(&self.dir, e))?;
        tmp.write_all(contents)
            .and_then(|()| tmp.flush())
            .map_err(|e| Error::io(tmp.path(), e))?;

        match self.policy {
            CollisionPolicy::Overwrite => tmp.persist(&target),
            CollisionPolicy::Rename | CollisionPolicy::Skip => tmp.persist_noclobber(&target),
        }
        .map_err(|e| Error::io(&target, e.error))?;

        Ok(Some(ExtractedFile {
            path: target,
            size: contents.len() as u64,
        }))
    }
}

/// If `path` already exists, append a counter to make it unique.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }

    parent.join(format!("{stem}_dup.{ext}"))
}
