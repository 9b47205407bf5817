//! Event sources that feed triggers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::{Result, TriggerError};
use crate::event::FileEvent;

/// Capacity of the per-subscription event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Something that can report change events for a path.
pub trait EventSource: Send + Sync {
    /// Start watching `path`. The watch lasts as long as the returned stream.
    fn subscribe(&self, path: &Path) -> Result<EventStream>;
}

/// Asynchronous stream of events for one watched path.
pub struct EventStream {
    rx: mpsc::Receiver<FileEvent>,

    /// Keeps the underlying OS watch alive.
    _watch: Option<Box<dyn Send>>,
}

impl EventStream {
    /// Create a stream with no watch handle attached.
    pub fn new(rx: mpsc::Receiver<FileEvent>) -> Self {
        Self { rx, _watch: None }
    }

    /// Create a stream that owns `watch` until it is dropped.
    pub fn with_watch(rx: mpsc::Receiver<FileEvent>, watch: impl Send + 'static) -> Self {
        Self {
            rx,
            _watch: Some(Box::new(watch)),
        }
    }

    /// Wait for the next event. Returns `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.rx.recv().await
    }

    /// Take an already buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<FileEvent> {
        self.rx.try_recv().ok()
    }
}

/// Event source backed by the platform's native watcher.
#[derive(Debug, Default)]
pub struct NotifyEventSource;

impl NotifyEventSource {
    pub fn new() -> Self {
        Self
    }
}

impl EventSource for NotifyEventSource {
    fn subscribe(&self, path: &Path) -> Result<EventStream> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for file_event in FileEvent::from_notify(event) {
                        if event_tx.blocking_send(file_event).is_err() {
                            debug!("Event stream closed, dropping event");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Watch error: {e}");
                }
            },
        )?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| TriggerError::Watch {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        debug!("Started watching: {}", path.display());
        Ok(EventStream::with_watch(event_rx, watcher))
    }
}

/// Event source whose events are injected programmatically.
///
/// Subscribing to a path that does not exist fails, the same way the
/// native watcher does. Every live subscription on a path receives each
/// event emitted for it.
#[derive(Debug, Default)]
pub struct ChannelEventSource {
    senders: Mutex<HashMap<PathBuf, Vec<mpsc::Sender<FileEvent>>>>,
}

impl ChannelEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open subscriptions on `path`.
    pub fn subscribers(&self, path: &Path) -> usize {
        self.live_senders(path).len()
    }

    /// Inject an event for every subscription on `path`.
    pub async fn emit(&self, path: &Path, event: FileEvent) -> Result<()> {
        let senders = self.live_senders(path);
        if senders.is_empty() {
            return Err(TriggerError::Watch {
                path: path.to_path_buf(),
                reason: "not subscribed".to_string(),
            });
        }

        let mut delivered = false;
        for tx in senders {
            delivered |= tx.send(event.clone()).await.is_ok();
        }
        if delivered {
            Ok(())
        } else {
            Err(TriggerError::Watch {
                path: path.to_path_buf(),
                reason: "subscription closed".to_string(),
            })
        }
    }

    /// Senders for `path` whose stream is still alive. Closed ones are pruned.
    fn live_senders(&self, path: &Path) -> Vec<mpsc::Sender<FileEvent>> {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = senders.get_mut(path) else {
            return Vec::new();
        };
        list.retain(|tx| !tx.is_closed());
        list.clone()
    }
}

impl EventSource for ChannelEventSource {
    fn subscribe(&self, path: &Path) -> Result<EventStream> {
        if !path.exists() {
            return Err(TriggerError::Watch {
                path: path.to_path_buf(),
                reason: "no such file or directory".to_string(),
            });
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_default()
            .push(event_tx);
        Ok(EventStream::new(event_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_notify_rejects_missing_path() {
        let source = NotifyEventSource::new();
        let result = source.subscribe(Path::new("/nonexistent/path/12345"));
        assert!(matches!(result, Err(TriggerError::Watch { .. })));
    }

    #[tokio::test]
    async fn test_notify_subscribes_existing_dir() {
        let temp_dir = TempDir::new().unwrap();
        let source = NotifyEventSource::new();
        assert!(source.subscribe(temp_dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_notify_reports_created_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = NotifyEventSource::new();
        let mut stream = source.subscribe(temp_dir.path()).unwrap();

        let created = temp_dir.path().join("new.txt");
        std::fs::write(&created, "hello").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = stream.recv().await.unwrap();
                if event.kinds.contains(Mode::Create) {
                    return event;
                }
            }
        })
        .await
        .expect("no create event within 5s");

        assert_eq!(event.path, created);
        assert!(event.path.is_absolute());
    }

    #[tokio::test]
    async fn test_channel_source_delivers_events() {
        let temp_dir = TempDir::new().unwrap();
        let source = ChannelEventSource::new();
        let mut stream = source.subscribe(temp_dir.path()).unwrap();

        let event = FileEvent::new(Mode::Create, "report.csv");
        source.emit(temp_dir.path(), event.clone()).await.unwrap();

        assert_eq!(stream.recv().await, Some(event));
    }

    #[test]
    fn test_channel_source_rejects_missing_path() {
        let source = ChannelEventSource::new();
        assert!(source.subscribe(Path::new("/nonexistent/path/12345")).is_err());
        assert_eq!(source.subscribers(Path::new("/nonexistent/path/12345")), 0);
    }

    #[tokio::test]
    async fn test_channel_source_fans_out_to_every_subscription() {
        let temp_dir = TempDir::new().unwrap();
        let source = ChannelEventSource::new();
        let mut first = source.subscribe(temp_dir.path()).unwrap();
        let mut second = source.subscribe(temp_dir.path()).unwrap();
        assert_eq!(source.subscribers(temp_dir.path()), 2);

        let event = FileEvent::new(Mode::Write, "shared.log");
        source.emit(temp_dir.path(), event.clone()).await.unwrap();
        assert_eq!(first.recv().await, Some(event.clone()));
        assert_eq!(second.recv().await, Some(event.clone()));

        drop(first);
        assert_eq!(source.subscribers(temp_dir.path()), 1);
        source.emit(temp_dir.path(), event.clone()).await.unwrap();
        assert_eq!(second.recv().await, Some(event));

        drop(second);
        let result = source.emit(temp_dir.path(), FileEvent::new(Mode::Write, "x")).await;
        assert!(matches!(result, Err(TriggerError::Watch { .. })));
    }
}
