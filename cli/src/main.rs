use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trigger_core::{NotifyEventSource, Server, ServerConfig, SmtpTransport};

/// Watch directories and mail batched change reports.
#[derive(Debug, Parser)]
#[command(name = "trigger", version)]
struct Cli {
    /// Directory containing trigger definition files.
    #[arg(long, env = "TRIGGERS_PATH", default_value = "triggers")]
    triggers: String,

    /// Mail server credentials as user:password@host:port.
    #[arg(long, env = "MAILHOST", default_value = "", hide_env_values = true)]
    mail_host: String,

    /// Message server address.
    #[arg(long, env = "MESSAGE_SERVER")]
    message_server: Option<String>,

    /// Message server access token.
    #[arg(long, env = "MESSAGE_TOKEN", hide_env_values = true)]
    message_token: Option<String>,

    /// Seconds between periodic flushes.
    #[arg(long, env = "TRIGGER_FLUSH_SECS", default_value_t = 300)]
    flush_secs: u64,

    /// Number of messages the mail queue can hold.
    #[arg(long, env = "TRIGGER_QUEUE_CAPACITY", default_value_t = 10)]
    queue_capacity: usize,

    /// Seconds allowed for one mail delivery.
    #[arg(long, env = "MAIL_TIMEOUT_SECS", default_value_t = 60)]
    mail_timeout_secs: u64,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let triggers = PathBuf::from(self.triggers.trim());
        let triggers = std::path::absolute(&triggers)
            .with_context(|| format!("invalid triggers path {}", triggers.display()))?;

        Ok(ServerConfig::new(triggers)
            .with_mail_host(self.mail_host)
            .with_message_server(self.message_server, self.message_token)
            .with_flush_interval(Duration::from_secs(self.flush_secs.max(1)))
            .with_queue_capacity(self.queue_capacity)
            .with_send_timeout(Duration::from_secs(self.mail_timeout_secs)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let mut server = match Server::new(
        config,
        Arc::new(NotifyEventSource::new()),
        Arc::new(SmtpTransport::new()),
    ) {
        Ok(server) => server,
        Err(e) => {
            error!("Error starting server: {e}");
            return Ok(ExitCode::from(2));
        }
    };

    server.start();
    wait_for_shutdown().await?;
    info!("Shutting down");
    server.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
