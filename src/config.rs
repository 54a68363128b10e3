//! Mailbox configuration.
//!
//! Loaded once at startup from a TOML file (default `<cwd>/goatee.cfg`):
//!
//! ```toml
//! server = "imap.example.com:993"
//! user = "scanner@example.com"
//! password = "secret"
//! destination = "invoices"
//! # optional: "overwrite" (default), "rename" or "skip"
//! on_collision = "overwrite"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Port used when `server` has no `:port` suffix.
pub const DEFAULT_IMAPS_PORT: u16 = 993;

/// What to do when an extracted attachment's name is already taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Append `_1`, `_2`, … before the extension.
    Rename,
    /// Keep the existing file and drop the new one.
    Skip,
}

/// The single user/mailbox/destination triple this process serves.
#[derive(Clone, Deserialize)]
pub struct MailboxConfig {
    /// `host:port` of the IMAPS server.
    #[serde(alias = "Server")]
    pub server: String,
    #[serde(alias = "User")]
    pub user: String,
    #[serde(alias = "Password")]
    pub password: String,
    /// Output directory, relative to the working directory unless absolute.
    #[serde(alias = "Destination")]
    pub destination: PathBuf,
    #[serde(default, alias = "OnCollision")]
    pub on_collision: CollisionPolicy,
}

// Keep the password out of debug logs.
impl fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("destination", &self.destination)
            .field("on_collision", &self.on_collision)
            .finish()
    }
}

impl MailboxConfig {
    /// Split `server` into host and port.
    pub fn host_port(&self) -> Result<(&str, u16)> {
        let server = self.server.trim();
        match server.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| Error::Connection {
                    server: self.server.clone(),
                    reason: format!("invalid port '{port}'"),
                })?;
                Ok((host, port))
            }
            Some(_) => Err(Error::Connection {
                server: self.server.clone(),
                reason: "missing host".to_string(),
            }),
            None if !server.is_empty() => Ok((server, DEFAULT_IMAPS_PORT)),
            None => Err(Error::Connection {
                server: self.server.clone(),
                reason: "empty server address".to_string(),
            }),
        }
    }

    /// Absolute destination directory, resolving relative paths against `cwd`.
    pub fn destination_dir(&self, cwd: &Path) -> PathBuf {
        if self.destination.is_absolute() {
            self.destination.clone()
        } else {
            cwd.join(&self.destination)
        }
    }
}

/// Parse a configuration from TOML text.
pub fn parse_config(contents: &str, path: &Path) -> Result<MailboxConfig> {
    let cfg: MailboxConfig = toml::from_str(contents).map_err(|e| Error::InvalidConfig {
        path: path.to_path_buf(),
        reason: e.message().to_string(),
    })?;

    for (key, value) in [
        ("server", cfg.server.as_str()),
        ("user", cfg.user.as_str()),
    ] {
        if value.trim().is_empty() {
            return Err(Error::InvalidConfig {
                path: path.to_path_buf(),
                reason: format!("'{key}' must not be empty"),
            });
        }
    }
    if cfg.destination.as_os_str().is_empty() {
        return Err(Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: "'destination' must not be empty".to_string(),
        });
    }
    if let Err(e) = cfg.host_port() {
        return Err(Error::InvalidConfig {
            path: path.to_path_buf(),
            reason: format!("'server': {e}"),
        });
    }

    Ok(cfg)
}

/// Load the configuration file. Any failure here is fatal.
pub fn load_config(path: &Path) -> Result<MailboxConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ConfigNotFound(path.to_path_buf())
        } else {
            Error::InvalidConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    let cfg = parse_config(&contents, path)?;
    tracing::info!(path = %path.display(), server = %cfg.server, user = %cfg.user, "Loaded config");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<MailboxConfig> {
        parse_config(s, Path::new("goatee.cfg"))
    }

    #[test]
    fn test_parse_lowercase_keys() {
        let cfg = parse(
            r#"
server = "imap.example.com:993"
user = "scanner"
password = "pw"
destination = "pdfs"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.server, "imap.example.com:993");
        assert_eq!(cfg.destination, PathBuf::from("pdfs"));
        assert_eq!(cfg.on_collision, CollisionPolicy::Overwrite);
    }

    #[test]
    fn test_parse_capitalized_keys() {
        let cfg = parse(
            r#"
Server = "mail.example.org:1993"
User = "a"
Password = "b"
Destination = "/srv/pdf"
on_collision = "rename"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.user, "a");
        assert_eq!(cfg.on_collision, CollisionPolicy::Rename);
        assert_eq!(cfg.host_port().unwrap(), ("mail.example.org", 1993));
    }

    #[test]
    fn test_missing_field_is_error() {
        let err = parse("server = \"x:993\"\nuser = \"u\"\npassword = \"p\"\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_empty_server_is_error() {
        let err = parse("server = \"\"\nuser = \"u\"\npassword = \"p\"\ndestination = \"d\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("server"));
    }

    #[test]
    fn test_host_port_default() {
        let cfg = parse("server = \"imap.example.com\"\nuser = \"u\"\npassword = \"p\"\ndestination = \"d\"\n")
            .unwrap();
        assert_eq!(cfg.host_port().unwrap(), ("imap.example.com", DEFAULT_IMAPS_PORT));
    }

    #[test]
    fn test_malformed_server_rejected_at_load() {
        for server in ["imap.example.com:abc", ":993", "imap.example.com:70000"] {
            let err = parse(&format!(
                "server = \"{server}\"\nuser = \"u\"\npassword = \"p\"\ndestination = \"d\"\n"
            ))
            .unwrap_err();
            assert!(matches!(err, Error::InvalidConfig { .. }), "{server}: {err:?}");
            assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
        }
    }

    #[test]
    fn test_destination_dir() {
        let cfg = parse("server = \"h:1\"\nuser = \"u\"\npassword = \"p\"\ndestination = \"out\"\n")
            .unwrap();
        assert_eq!(
            cfg.destination_dir(Path::new("/work")),
            PathBuf::from("/work/out")
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let cfg = parse("server = \"h:1\"\nuser = \"u\"\npassword = \"hunter2\"\ndestination = \"out\"\n")
            .unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_config(&tmp.path().join("nope.cfg")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }
}
