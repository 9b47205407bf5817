//! Triggers: watch one path, collect matching events, mail them in batches.
//!
//! A trigger moves through `Created -> Watching -> Stopped`:
//!
//! - [`Trigger`] is a loaded definition with its event stream attached.
//! - [`Trigger::start`] spawns the watch task and returns a
//!   [`TriggerHandle`]. The task handles events in arrival order and
//!   flushes the log on every tick of the flush interval.
//! - [`TriggerHandle::quit`] stops the task, waits for it, and performs
//!   one final flush.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::{MIN_FLUSH_INTERVAL, TriggerDefinition};
use crate::error::{Result, TriggerError};
use crate::event::FileEvent;
use crate::mailer::Message;
use crate::mode::ModeSet;
use crate::watcher::{EventSource, EventStream};

/// Timestamp layout for log lines, e.g. `Mon Jan 02 15:04:05.000000 2006`.
const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S%.6f %Y";

/// State shared between a trigger's watch task and its owner.
struct Shared {
    name: String,
    subject: String,
    path: PathBuf,
    modes: ModeSet,
    watchers: Vec<String>,

    /// Formatted event lines since the last flush.
    log: Mutex<Vec<String>>,

    /// Outbound mail queue.
    outbox: mpsc::Sender<Message>,
}

impl Shared {
    /// Append a line for `event` if it matches the trigger's modes.
    async fn record(&self, event: &FileEvent) -> bool {
        if !self.modes.intersects(event.kinds) {
            return false;
        }

        let line = format!(
            "{} {} {}\n",
            Local::now().format(TIMESTAMP_FORMAT),
            event.kinds,
            self.path.join(&event.path).display()
        );
        self.log.lock().await.push(line);
        true
    }

    /// Move the accumulated log into a message and queue it.
    ///
    /// Returns `Ok(false)` without queueing anything if the log is empty.
    async fn flush(&self) -> Result<bool> {
        let (body, lines) = {
            let mut log = self.log.lock().await;
            if log.is_empty() {
                return Ok(false);
            }
            let lines = std::mem::take(&mut *log);
            (lines.concat(), lines.len())
        };

        let message = Message::new(self.watchers.clone(), self.subject.clone(), body);
        self.outbox.send(message).await.map_err(|_| {
            error!("Trigger {}: dropped {lines} line(s), mail queue closed", self.name);
            TriggerError::QueueClosed
        })?;

        debug!("Trigger {}: queued {lines} line(s)", self.name);
        Ok(true)
    }
}

/// A loaded trigger that is not yet watching.
pub struct Trigger {
    shared: Arc<Shared>,
    stream: EventStream,
}

impl Trigger {
    /// Build a trigger from its definition and an already attached stream.
    pub fn new(
        definition: TriggerDefinition,
        stream: EventStream,
        outbox: mpsc::Sender<Message>,
    ) -> Self {
        let modes = definition.mode_set();
        let shared = Shared {
            name: definition.name,
            subject: definition.subject,
            path: PathBuf::from(definition.path),
            modes,
            watchers: definition.watchers,
            log: Mutex::new(Vec::new()),
            outbox,
        };

        Self {
            shared: Arc::new(shared),
            stream,
        }
    }

    /// Attach to `source` for the definition's path and build the trigger.
    pub fn attach(
        definition: TriggerDefinition,
        source: &dyn EventSource,
        outbox: mpsc::Sender<Message>,
    ) -> Result<Self> {
        let stream = source.subscribe(Path::new(&definition.path))?;
        Ok(Self::new(definition, stream, outbox))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn modes(&self) -> ModeSet {
        self.shared.modes
    }

    /// Spawn the watch task, flushing every `flush_interval`.
    ///
    /// Intervals shorter than [`MIN_FLUSH_INTERVAL`] are raised to it.
    pub fn start(self, flush_interval: Duration) -> TriggerHandle {
        let flush_interval = flush_interval.max(MIN_FLUSH_INTERVAL);
        let (quit_tx, quit_rx) = oneshot::channel();
        let task = tokio::spawn(watch(
            self.shared.clone(),
            self.stream,
            flush_interval,
            quit_rx,
        ));

        info!(
            "Trigger {} watching {} for {}",
            self.shared.name,
            self.shared.path.display(),
            self.shared.modes
        );
        TriggerHandle {
            shared: self.shared,
            quit: quit_tx,
            task,
        }
    }
}

/// A running trigger.
pub struct TriggerHandle {
    shared: Arc<Shared>,
    quit: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TriggerHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of lines waiting for the next flush.
    pub async fn pending(&self) -> usize {
        self.shared.log.lock().await.len()
    }

    /// Flush now instead of waiting for the timer.
    pub async fn flush(&self) -> Result<bool> {
        self.shared.flush().await
    }

    /// Stop watching and send whatever is left.
    pub async fn quit(self) -> Result<bool> {
        // The task only exits early if it panicked; the join reports that.
        let _ = self.quit.send(());
        if let Err(e) = self.task.await {
            error!("Trigger {} watch task failed: {e}", self.shared.name);
        }

        let flushed = self.shared.flush().await;
        info!("Trigger {} stopped", self.shared.name);
        flushed
    }
}

async fn watch(
    shared: Arc<Shared>,
    mut stream: EventStream,
    flush_interval: Duration,
    mut quit: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream_open = true;

    loop {
        tokio::select! {
            _ = &mut quit => break,
            event = stream.recv(), if stream_open => match event {
                Some(event) => {
                    shared.record(&event).await;
                }
                None => {
                    debug!("Trigger {}: event stream ended", shared.name);
                    stream_open = false;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = shared.flush().await {
                    error!("Trigger {}: flush failed: {e}", shared.name);
                }
            }
        }
    }

    // Events that arrived before the quit signal still belong in the log.
    while let Some(event) = stream.try_recv() {
        shared.record(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use pretty_assertions::assert_eq;

    const INTERVAL: Duration = Duration::from_secs(300);

    fn definition(modes: &[&str]) -> TriggerDefinition {
        TriggerDefinition {
            name: "uploads".to_string(),
            subject: "New uploads".to_string(),
            path: "/data/in".to_string(),
            modes: modes.iter().map(|m| m.to_string()).collect(),
            watchers: vec!["ops@example.com".to_string(), "ops@example.com".to_string()],
        }
    }

    fn trigger(modes: &[&str]) -> (Trigger, mpsc::Sender<FileEvent>, mpsc::Receiver<Message>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (outbox_tx, outbox_rx) = mpsc::channel(16);
        let trigger = Trigger::new(definition(modes), EventStream::new(event_rx), outbox_tx);
        (trigger, event_tx, outbox_rx)
    }

    #[tokio::test]
    async fn test_empty_flush_queues_nothing() {
        let (trigger, _events, mut outbox) = trigger(&["create"]);
        let handle = trigger.start(INTERVAL);

        assert!(!handle.flush().await.unwrap());
        assert!(!handle.quit().await.unwrap());
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_filtered_events_and_final_flush() {
        let (trigger, events, mut outbox) = trigger(&["create", "write"]);
        let handle = trigger.start(INTERVAL);

        events.send(FileEvent::new(Mode::Create, "report.csv")).await.unwrap();
        events.send(FileEvent::new(Mode::Chmod, "report.csv")).await.unwrap();
        assert!(handle.quit().await.unwrap());

        let message = outbox.recv().await.unwrap();
        assert_eq!(message.subject(), "New uploads");
        assert_eq!(message.recipients(), ["ops@example.com", "ops@example.com"]);

        let lines: Vec<&str> = message.body().lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" create /data/in/report.csv"));
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_absolute_event_path_is_kept() {
        let (trigger, events, mut outbox) = trigger(&["remove"]);
        let handle = trigger.start(INTERVAL);

        events
            .send(FileEvent::new(Mode::Remove, "/data/in/old.log"))
            .await
            .unwrap();
        handle.quit().await.unwrap();

        let message = outbox.recv().await.unwrap();
        assert!(message.body().ends_with(" remove /data/in/old.log\n"));
    }

    #[tokio::test]
    async fn test_lines_keep_arrival_order() {
        let (trigger, events, mut outbox) = trigger(&["create", "write", "remove"]);
        let handle = trigger.start(INTERVAL);

        events.send(FileEvent::new(Mode::Create, "a")).await.unwrap();
        events.send(FileEvent::new(Mode::Write, "a")).await.unwrap();
        events.send(FileEvent::new(Mode::Remove, "a")).await.unwrap();
        handle.quit().await.unwrap();

        let message = outbox.recv().await.unwrap();
        let kinds: Vec<&str> = message
            .body()
            .lines()
            .map(|l| l.split(' ').nth(5).unwrap())
            .collect();
        assert_eq!(kinds, vec!["create", "write", "remove"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_periodically() {
        let (trigger, events, mut outbox) = trigger(&["write"]);
        let handle = trigger.start(INTERVAL);

        events.send(FileEvent::new(Mode::Write, "data.bin")).await.unwrap();
        tokio::time::sleep(INTERVAL + Duration::from_secs(1)).await;

        let message = outbox.recv().await.unwrap();
        assert!(message.body().contains("write /data/in/data.bin"));
        assert_eq!(handle.pending().await, 0);

        // Nothing new since the periodic flush, so quitting sends nothing.
        assert!(!handle.quit().await.unwrap());
        assert!(outbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_keeps_watching() {
        let (trigger, events, mut outbox) = trigger(&["create"]);
        let handle = trigger.start(Duration::ZERO);

        events.send(FileEvent::new(Mode::Create, "x")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.quit().await.unwrap();

        let message = outbox.try_recv().unwrap();
        assert!(message.body().contains(" create /data/in/x"));
    }

    #[tokio::test]
    async fn test_stream_end_keeps_trigger_alive() {
        let (trigger, events, mut outbox) = trigger(&["create"]);
        let handle = trigger.start(INTERVAL);

        events.send(FileEvent::new(Mode::Create, "x")).await.unwrap();
        drop(events);
        tokio::task::yield_now().await;

        assert!(handle.quit().await.unwrap());
        assert!(outbox.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_flush_reports_closed_queue() {
        let (trigger, events, outbox) = trigger(&["create"]);
        drop(outbox);
        let handle = trigger.start(INTERVAL);

        events.send(FileEvent::new(Mode::Create, "x")).await.unwrap();
        let result = handle.quit().await;
        assert!(matches!(result, Err(TriggerError::QueueClosed)));
    }
}
