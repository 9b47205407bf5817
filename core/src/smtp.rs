//! Minimal SMTP client used as the default mail transport.
//!
//! Greeting, `EHLO`, `STARTTLS` whenever the server offers it, optional
//! `AUTH PLAIN`, envelope, `DATA` with dot-stuffing, `QUIT`. Credentials are
//! only sent over TLS, or in the clear to a loopback host.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::error::{MailError, MailResult};
use crate::mailer::{MailAuth, MailTransport};

const HELLO_NAME: &str = "localhost";

/// SMTP transport over TCP, upgraded with `STARTTLS` when available.
#[derive(Debug, Clone, Default)]
pub struct SmtpTransport;

impl SmtpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send_mail(
        &self,
        server: &str,
        auth: &MailAuth,
        from: &str,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<()> {
        let host = host_of(server);
        let stream = TcpStream::connect(server).await?;
        let mut conn = Connection::new(stream);

        conn.expect_reply(&[220]).await?;
        let features = conn.command(&format!("EHLO {HELLO_NAME}"), &[250]).await?;

        if advertises(&features, "STARTTLS") {
            conn.command("STARTTLS", &[220]).await?;
            let mut conn = conn.start_tls(host).await?;
            debug!("TLS established with {host}");
            conn.command(&format!("EHLO {HELLO_NAME}"), &[250]).await?;
            conn.deliver(auth, from, recipients, payload).await
        } else {
            check_plaintext_auth(host, auth)?;
            conn.deliver(auth, from, recipients, payload).await
        }
    }
}

/// Host part of a `host:port` or `[v6]:port` address.
fn host_of(server: &str) -> &str {
    let host = server.rsplit_once(':').map_or(server, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

/// Refuse to send a password over an unencrypted link unless the relay is local.
fn check_plaintext_auth(host: &str, auth: &MailAuth) -> MailResult<()> {
    if auth.username.is_empty() || is_loopback(host) {
        Ok(())
    } else {
        Err(MailError::InsecureAuth(host.to_string()))
    }
}

/// Whether an `EHLO` reply lists `keyword`. The first line is the greeting.
fn advertises(reply: &str, keyword: &str) -> bool {
    reply.lines().skip(1).any(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|k| k.eq_ignore_ascii_case(keyword))
    })
}

fn tls_connector() -> MailResult<TlsConnector> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let provider = tokio_rustls::rustls::crypto::ring::default_provider();
    let config = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| MailError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

struct Connection<S> {
    stream: BufReader<S>,
}

impl Connection<TcpStream> {
    /// Hand the socket to rustls after the server accepted `STARTTLS`.
    async fn start_tls(self, host: &str) -> MailResult<Connection<TlsStream<TcpStream>>> {
        // Anything buffered now was sent before the handshake and cannot be trusted.
        if !self.stream.buffer().is_empty() {
            return Err(MailError::UnexpectedReply(
                "data received before TLS handshake".to_string(),
            ));
        }
        let name = ServerName::try_from(host.to_string())
            .map_err(|e| MailError::Tls(format!("{host}: {e}")))?;
        let tls = tls_connector()?.connect(name, self.stream.into_inner()).await?;
        Ok(Connection::new(tls))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Authenticate if asked to, then hand over the envelope and message.
    async fn deliver(
        &mut self,
        auth: &MailAuth,
        from: &str,
        recipients: &[String],
        payload: &[u8],
    ) -> MailResult<()> {
        if !auth.username.is_empty() {
            let token = STANDARD.encode(format!("\0{}\0{}", auth.username, auth.password));
            self.command(&format!("AUTH PLAIN {token}"), &[235]).await?;
        }

        self.command(&format!("MAIL FROM:<{from}>"), &[250]).await?;
        for rcpt in recipients {
            self.command(&format!("RCPT TO:<{rcpt}>"), &[250, 251]).await?;
        }

        self.command("DATA", &[354]).await?;
        self.write_data(payload).await?;
        self.expect_reply(&[250]).await?;

        if let Err(e) = self.command("QUIT", &[221]).await {
            debug!("QUIT after delivery failed: {e}");
        }
        Ok(())
    }

    async fn command(&mut self, line: &str, accepted: &[u16]) -> MailResult<String> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.expect_reply(accepted).await
    }

    /// Read one reply and check its code.
    async fn expect_reply(&mut self, accepted: &[u16]) -> MailResult<String> {
        let (code, message) = self.read_reply().await?;
        if accepted.contains(&code) {
            Ok(message)
        } else {
            Err(MailError::Protocol { code, message })
        }
    }

    /// Read a possibly multi-line reply.
    async fn read_reply(&mut self) -> MailResult<(u16, String)> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(MailError::UnexpectedReply("connection closed".to_string()));
            }
            let line = line.trim_end_matches(['\r', '\n']);

            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| MailError::UnexpectedReply(line.to_string()))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or_default().to_string());

            if !more {
                return Ok((code, lines.join("\n")));
            }
        }
    }

    /// Send the message body, CRLF-normalised and dot-stuffed, then the terminator.
    async fn write_data(&mut self, payload: &[u8]) -> MailResult<()> {
        let text = String::from_utf8_lossy(payload);
        let mut data = String::with_capacity(text.len() + 8);
        for line in text.lines() {
            if line.starts_with('.') {
                data.push('.');
            }
            data.push_str(line);
            data.push_str("\r\n");
        }
        data.push_str(".\r\n");

        self.stream.write_all(data.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
