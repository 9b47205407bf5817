//! Mail messages, credentials and the transport seam.

use std::fmt;

use async_trait::async_trait;

use crate::error::{MailError, MailResult};

/// An outbound notification. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    recipients: Vec<String>,
    subject: String,
    body: String,
}

impl Message {
    /// Create a new message.
    pub fn new(
        recipients: Vec<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// Username and password presented to the mail server.
#[derive(Clone, PartialEq, Eq)]
pub struct MailAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for MailAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Mail server settings derived from a `user:password@host:port` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailCredentials {
    pub auth: MailAuth,
    pub host: String,
    pub port: u16,
    /// Envelope and header sender, `noreply@<host>`.
    pub sender: String,
}

impl MailCredentials {
    /// Parse a credential string.
    ///
    /// The user ends at the first `:` (so it may be an e-mail address), the
    /// password ends at the next `@`, and the rest must be `host:port`.
    pub fn parse(s: &str) -> MailResult<Self> {
        let (username, rest) = s.split_once(':').ok_or(MailError::MalformedHost)?;
        let (password, host_port) = rest.split_once('@').ok_or(MailError::MalformedHost)?;
        let (host, port) = split_host_port(host_port)?;

        Ok(Self {
            auth: MailAuth {
                username: username.to_string(),
                password: password.to_string(),
            },
            sender: format!("noreply@{host}"),
            host: host.to_string(),
            port,
        })
    }

    /// The `host:port` address to connect to.
    pub fn server(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_host_port(s: &str) -> MailResult<(&str, u16)> {
    let (host, port) = if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or(MailError::MalformedHost)?;
        let port = after.strip_prefix(':').ok_or(MailError::MalformedHost)?;
        (host, port)
    } else {
        let (host, port) = s.rsplit_once(':').ok_or(MailError::MalformedHost)?;
        if host.contains(':') {
            return Err(MailError::MalformedHost);
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(MailError::MalformedHost);
    }
    let port = port.parse::<u16>().map_err(|_| MailError::MalformedHost)?;
    Ok((host, port))
}

/// Build the wire payload for `message`: headers, a blank line, the body.
pub fn format_payload(sender: &str, message: &Message) -> String {
    format!(
        "From: {sender}\r\nSubject: {}\r\n\r\n{}\r\n",
        message.subject(),
        message.body()
    )
}

/// Delivers a fully formatted payload to a mail server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_mail(
        &self,
        server: &str,
        auth: &MailAuth,
        from: &str,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<()>;
}
