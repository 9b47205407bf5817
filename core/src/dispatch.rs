//! The mail dispatch worker: a single consumer of the outbound queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DEFAULT_SEND_TIMEOUT;
use crate::error::{MailError, MailResult};
use crate::mailer::{MailCredentials, MailTransport, Message, format_payload};

/// Delivers queued messages one at a time.
pub struct MailDispatcher {
    transport: Arc<dyn MailTransport>,
    credentials: Option<MailCredentials>,
    send_timeout: Duration,
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
}

impl MailDispatcher {
    /// Create a dispatcher. Without credentials every delivery fails.
    pub fn new(transport: Arc<dyn MailTransport>, credentials: Option<MailCredentials>) -> Self {
        Self {
            transport,
            credentials,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Bound each delivery attempt.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    /// Format and deliver a single message.
    pub async fn deliver(&self, message: &Message) -> MailResult<()> {
        let creds = self.credentials.as_ref().ok_or(MailError::NotConfigured)?;
        let payload = format_payload(&creds.sender, message);
        let server = creds.server();

        let send = self.transport.send_mail(
            &server,
            &creds.auth,
            &creds.sender,
            message.recipients(),
            payload.as_bytes(),
        );
        tokio::time::timeout(self.send_timeout, send)
            .await
            .map_err(|_| MailError::Timeout)?
    }

    /// Run the worker on `queue` until told to quit.
    pub fn spawn(self, queue: mpsc::Receiver<Message>) -> DispatchHandle {
        let (quit_tx, quit_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(queue, quit_rx));
        DispatchHandle {
            quit: quit_tx,
            task,
        }
    }

    async fn run(
        self,
        mut queue: mpsc::Receiver<Message>,
        mut quit: oneshot::Receiver<()>,
    ) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            tokio::select! {
                message = queue.recv() => match message {
                    Some(message) => self.process(&message, &mut stats).await,
                    None => break,
                },
                _ = &mut quit => {
                    // Refuse new work, then deliver what is already queued.
                    queue.close();
                    while let Some(message) = queue.recv().await {
                        self.process(&message, &mut stats).await;
                    }
                    break;
                }
            }
        }

        debug!(
            "Mail dispatcher stopped ({} delivered, {} failed)",
            stats.delivered, stats.failed
        );
        stats
    }

    async fn process(&self, message: &Message, stats: &mut DispatchStats) {
        match self.deliver(message).await {
            Ok(()) => {
                stats.delivered += 1;
                info!(
                    "Mailed \"{}\" to {} recipient(s)",
                    message.subject(),
                    message.recipients().len()
                );
            }
            Err(e) => {
                stats.failed += 1;
                error!("Error sending mail \"{}\": {e}", message.subject());
            }
        }
    }
}

/// Handle to a running dispatch worker.
pub struct DispatchHandle {
    quit: oneshot::Sender<()>,
    task: JoinHandle<DispatchStats>,
}

impl DispatchHandle {
    /// Stop the worker after it has drained the queue.
    pub async fn quit(self) -> DispatchStats {
        // The worker may already have exited because every sender is gone.
        let _ = self.quit.send(());
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Mail dispatcher task failed: {e}");
                DispatchStats::default()
            }
        }
    }
}
