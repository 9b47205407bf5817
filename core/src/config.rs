//! Configuration types: trigger definitions and server settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TriggerError};
use crate::mode::ModeSet;

/// Default interval between periodic flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest accepted flush interval. A zero period cannot drive a timer.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of messages the outbound queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default bound on a single mail delivery.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// A trigger as described by one definition file.
///
/// Decoding is lenient: missing keys fall back to empty values and unknown
/// keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TriggerDefinition {
    /// Unique trigger name.
    pub name: String,

    /// Subject line for every notification.
    pub subject: String,

    /// The single path to watch. Stored under the historical `paths` key.
    #[serde(rename = "paths", alias = "path")]
    pub path: String,

    /// Change kinds of interest. Unknown entries are ignored.
    pub modes: Vec<String>,

    /// Recipient addresses, kept verbatim.
    pub watchers: Vec<String>,
}

impl TriggerDefinition {
    /// Read and decode a definition file.
    pub fn load(file: &Path) -> Result<Self> {
        let data = std::fs::read(file)?;
        Self::from_slice(&data).map_err(|source| TriggerError::Json {
            path: file.to_path_buf(),
            source,
        })
    }

    /// Decode a definition from JSON bytes.
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// The recognised modes as a set.
    pub fn mode_set(&self) -> ModeSet {
        ModeSet::from_names(&self.modes)
    }
}

/// Runtime configuration for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding trigger definition files.
    pub triggers_dir: PathBuf,

    /// Mail credentials as `user:password@host:port`. May be empty.
    pub mail_host: String,

    /// Message server address, carried for integrations.
    pub message_server: Option<String>,

    /// Message server token, carried for integrations.
    pub message_token: Option<String>,

    /// Interval between periodic flushes of each trigger.
    pub flush_interval: Duration,

    /// Capacity of the outbound mail queue.
    pub queue_capacity: usize,

    /// Upper bound on one mail delivery.
    pub send_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration with default values.
    pub fn new(triggers_dir: impl Into<PathBuf>) -> Self {
        Self {
            triggers_dir: triggers_dir.into(),
            mail_host: String::new(),
            message_server: None,
            message_token: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Set the mail credential string.
    pub fn with_mail_host(mut self, mail_host: impl Into<String>) -> Self {
        self.mail_host = mail_host.into();
        self
    }

    /// Set the message server integration values.
    pub fn with_message_server(mut self, server: Option<String>, token: Option<String>) -> Self {
        self.message_server = server;
        self.message_token = token;
        self
    }

    /// Set the periodic flush interval, no shorter than [`MIN_FLUSH_INTERVAL`].
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(MIN_FLUSH_INTERVAL);
        self
    }

    /// Set the outbound queue capacity. Zero is raised to one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the delivery timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_definition_decoding() {
        let json = br#"{
            "name": "uploads",
            "subject": "New uploads",
            "paths": "/data/in",
            "modes": ["create", "write", "bogus"],
            "watchers": ["ops@example.com", "ops@example.com"],
            "extra": 42
        }"#;

        let def = TriggerDefinition::from_slice(json).unwrap();
        assert_eq!(def.name, "uploads");
        assert_eq!(def.path, "/data/in");
        assert_eq!(def.watchers, vec!["ops@example.com", "ops@example.com"]);

        let modes = def.mode_set();
        assert!(modes.contains(Mode::Create));
        assert!(modes.contains(Mode::Write));
        assert!(!modes.contains(Mode::Chmod));
    }

    #[test]
    fn test_definition_missing_keys_default() {
        let def = TriggerDefinition::from_slice(br#"{"name": "bare", "path": "/tmp"}"#).unwrap();
        assert_eq!(def.path, "/tmp");
        assert!(def.subject.is_empty());
        assert!(def.mode_set().is_empty());
        assert!(def.watchers.is_empty());
    }

    #[test]
    fn test_load_reports_file_on_bad_json() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("broken.json");
        std::fs::write(&file, "{ not json").unwrap();

        match TriggerDefinition::load(&file) {
            Err(TriggerError::Json { path, .. }) => assert_eq!(path, file),
            other => panic!("expected json error, got {other:?}"),
        }
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::new("/etc/triggers")
            .with_mail_host("alice:secret@smtp.example.com:587")
            .with_queue_capacity(0)
            .with_flush_interval(Duration::from_secs(30));

        assert_eq!(config.triggers_dir, Path::new("/etc/triggers"));
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
    }

    #[test]
    fn test_zero_flush_interval_is_raised() {
        let config = ServerConfig::new("/etc/triggers").with_flush_interval(Duration::ZERO);
        assert_eq!(config.flush_interval, MIN_FLUSH_INTERVAL);
    }
}
