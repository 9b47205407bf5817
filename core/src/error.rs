//! Error types for triggers, the server and mail delivery.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for trigger and server operations.
pub type Result<T> = std::result::Result<T, TriggerError>;

/// Errors raised while loading, watching or flushing triggers.
#[derive(Error, Debug)]
pub enum TriggerError {
    /// A trigger definition could not be decoded.
    #[error("invalid trigger definition {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The event source refused to watch a path.
    #[error("cannot watch {path}: {reason}")]
    Watch { path: PathBuf, reason: String },

    /// Another trigger already uses this name.
    #[error("duplicate trigger name: {0}")]
    DuplicateTrigger(String),

    /// The outbound mail queue has been closed.
    #[error("mail queue closed")]
    QueueClosed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result type alias for mail operations.
pub type MailResult<T> = std::result::Result<T, MailError>;

/// Errors raised while configuring or delivering mail.
#[derive(Error, Debug)]
pub enum MailError {
    /// The credential string is not `user:password@host:port`.
    #[error("malformed mail host")]
    MalformedHost,

    /// No usable mail credentials were configured at startup.
    #[error("mail is not configured")]
    NotConfigured,

    /// The mail server did not answer in time.
    #[error("mail server timed out")]
    Timeout,

    /// The mail server rejected a command.
    #[error("mail server replied {code}: {message}")]
    Protocol { code: u16, message: String },

    /// Credentials would have crossed an unencrypted link to a remote host.
    #[error("refusing to authenticate without TLS to {0}")]
    InsecureAuth(String),

    /// The TLS upgrade could not be set up.
    #[error("tls error: {0}")]
    Tls(String),

    /// The mail server sent something that is not an SMTP reply.
    #[error("unexpected reply from mail server: {0}")]
    UnexpectedReply(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
