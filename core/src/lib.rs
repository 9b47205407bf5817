//! # Trigger
//!
//! Watches directories for changes and mails batched change reports.
//!
//! Each [`Trigger`] watches one path for a set of [`Mode`]s (create, write,
//! remove, chmod) and accumulates matching events as log lines. Every flush
//! interval, and once more on shutdown, the log becomes a [`Message`] on a
//! bounded queue drained by a single [`MailDispatcher`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Server                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EventSource ──► Trigger ──► [flush] ──► queue ──► Dispatcher   │
//! │                    │                                   │        │
//! │                    ▼                                   ▼        │
//! │                 log lines                        MailTransport  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod mailer;
pub mod mode;
pub mod server;
pub mod smtp;
pub mod trigger;
pub mod watcher;

pub use config::{ServerConfig, TriggerDefinition};
pub use dispatch::{DispatchHandle, DispatchStats, MailDispatcher};
pub use error::{MailError, MailResult, Result, TriggerError};
pub use event::FileEvent;
pub use mailer::{MailAuth, MailCredentials, MailTransport, Message, format_payload};
pub use mode::{Mode, ModeSet};
pub use server::Server;
pub use smtp::SmtpTransport;
pub use trigger::{Trigger, TriggerHandle};
pub use watcher::{ChannelEventSource, EventSource, EventStream, NotifyEventSource};
