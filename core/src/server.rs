//! The server owns every trigger and the mail dispatch worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ServerConfig, TriggerDefinition};
use crate::dispatch::{DispatchHandle, DispatchStats, MailDispatcher};
use crate::error::{Result, TriggerError};
use crate::mailer::{MailCredentials, MailTransport, Message};
use crate::trigger::{Trigger, TriggerHandle};
use crate::watcher::EventSource;

/// Coordinates trigger lifecycles and mail delivery.
///
/// Startup loads every definition in the triggers directory; bad
/// definitions are logged and skipped. [`Server::start`] sets triggers
/// watching and starts the dispatcher. [`Server::shutdown`] stops all
/// triggers (each does a final flush) before it stops the dispatcher, so
/// no final flush is lost.
pub struct Server {
    config: ServerConfig,
    source: Arc<dyn EventSource>,

    /// Sender side of the outbound queue, cloned into each trigger.
    outbox: mpsc::Sender<Message>,

    /// Receiver side, handed to the dispatcher on start.
    queue: Option<mpsc::Receiver<Message>>,

    /// Dispatcher waiting to be started.
    dispatcher: Option<MailDispatcher>,

    /// Running dispatcher.
    dispatch: Option<DispatchHandle>,

    mail_configured: bool,

    /// Triggers loaded but not yet started.
    loaded: HashMap<String, Trigger>,

    /// Triggers currently watching.
    running: HashMap<String, TriggerHandle>,
}

impl Server {
    /// Configure mail and load all trigger definitions.
    ///
    /// Fails only if the triggers directory cannot be read. A malformed
    /// mail credential string is logged and leaves mail unconfigured.
    pub fn new(
        config: ServerConfig,
        source: Arc<dyn EventSource>,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self> {
        let credentials = match MailCredentials::parse(&config.mail_host) {
            Ok(creds) => {
                debug!("Mail server: {}", creds.server());
                Some(creds)
            }
            Err(e) => {
                error!("Error configuring mail: {e}");
                None
            }
        };
        let mail_configured = credentials.is_some();

        let (outbox, queue) = mpsc::channel(config.queue_capacity.max(1));
        let dispatcher =
            MailDispatcher::new(transport, credentials).with_send_timeout(config.send_timeout);

        let mut server = Self {
            config,
            source,
            outbox,
            queue: Some(queue),
            dispatcher: Some(dispatcher),
            dispatch: None,
            mail_configured,
            loaded: HashMap::new(),
            running: HashMap::new(),
        };

        let count = server.load_triggers()?;
        info!(
            "Loaded {count} trigger(s) from {}",
            server.config.triggers_dir.display()
        );
        Ok(server)
    }

    /// Load every definition file in the triggers directory, in name order.
    fn load_triggers(&mut self) -> Result<usize> {
        let mut files = std::fs::read_dir(&self.config.triggers_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<PathBuf>>>()?;
        files.sort();

        let mut count = 0;
        for file in files {
            match self.load_trigger(&file) {
                Ok(()) => count += 1,
                Err(e) => error!("Error loading trigger {}: {e}", file.display()),
            }
        }
        Ok(count)
    }

    /// Decode one definition file, attach it and register it.
    ///
    /// If the server is already running the trigger starts immediately.
    pub fn load_trigger(&mut self, file: &Path) -> Result<()> {
        let definition = TriggerDefinition::load(file)?;
        if self.has_trigger(&definition.name) {
            return Err(TriggerError::DuplicateTrigger(definition.name));
        }

        let trigger = Trigger::attach(definition, self.source.as_ref(), self.outbox.clone())?;
        let name = trigger.name().to_string();
        debug!("Loaded trigger {name} from {}", file.display());

        if self.dispatch.is_some() {
            self.running
                .insert(name, trigger.start(self.config.flush_interval));
        } else {
            self.loaded.insert(name, trigger);
        }
        Ok(())
    }

    /// Start all loaded triggers and the mail dispatcher.
    pub fn start(&mut self) {
        let (Some(dispatcher), Some(queue)) = (self.dispatcher.take(), self.queue.take()) else {
            warn!("Server already started");
            return;
        };

        for (name, trigger) in self.loaded.drain() {
            self.running
                .insert(name, trigger.start(self.config.flush_interval));
        }
        self.dispatch = Some(dispatcher.spawn(queue));
        info!("Started Trigger.");
    }

    /// Stop every trigger, then the dispatcher. Safe to call repeatedly.
    pub async fn shutdown(&mut self) -> DispatchStats {
        let handles: Vec<TriggerHandle> = self.running.drain().map(|(_, h)| h).collect();
        let results = join_all(handles.into_iter().map(|handle| async move {
            let name = handle.name().to_string();
            (name, handle.quit().await)
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                error!("Trigger {name}: final flush failed: {e}");
            }
        }

        // Never started, so nothing was recorded.
        self.loaded.clear();

        let Some(dispatch) = self.dispatch.take() else {
            debug!("Mail dispatcher not running");
            return DispatchStats::default();
        };
        let stats = dispatch.quit().await;
        info!(
            "Stopped Trigger. ({} mail(s) delivered, {} failed)",
            stats.delivered, stats.failed
        );
        stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_mail_configured(&self) -> bool {
        self.mail_configured
    }

    pub fn is_running(&self) -> bool {
        self.dispatch.is_some()
    }

    pub fn has_trigger(&self, name: &str) -> bool {
        self.loaded.contains_key(name) || self.running.contains_key(name)
    }

    /// Names of all registered triggers, sorted.
    pub fn trigger_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .loaded
            .keys()
            .chain(self.running.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}
