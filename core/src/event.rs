//! File events delivered to triggers.

use std::path::PathBuf;

use notify::event::{EventKind, ModifyKind};

use crate::mode::{Mode, ModeSet};

/// A file system event as seen by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The kinds of change carried by the event.
    pub kinds: ModeSet,

    /// Affected path. Either absolute or relative to the watched path.
    pub path: PathBuf,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kinds: impl Into<ModeSet>, path: impl Into<PathBuf>) -> Self {
        Self {
            kinds: kinds.into(),
            path: path.into(),
        }
    }

    /// Convert a notify event into one event per affected path.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        let kinds = kinds_of(event.kind);
        event
            .paths
            .into_iter()
            .map(|path| Self { kinds, path })
            .collect()
    }
}

/// Map a notify event kind onto trigger modes.
///
/// Renames, accesses and unclassified events carry no mode and therefore
/// never match a trigger.
pub fn kinds_of(kind: EventKind) -> ModeSet {
    match kind {
        EventKind::Create(_) => Mode::Create.into(),
        EventKind::Remove(_) => Mode::Remove.into(),
        EventKind::Modify(modify) => match modify {
            ModifyKind::Metadata(_) => Mode::Chmod.into(),
            ModifyKind::Name(_) => ModeSet::empty(),
            _ => Mode::Write.into(),
        },
        _ => ModeSet::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{
        AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode,
    };
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_notify_kind_mapping() {
        assert_eq!(kinds_of(EventKind::Create(CreateKind::File)), Mode::Create.into());
        assert_eq!(kinds_of(EventKind::Remove(RemoveKind::Any)), Mode::Remove.into());
        assert_eq!(
            kinds_of(EventKind::Modify(ModifyKind::Data(DataChange::Content))),
            Mode::Write.into()
        );
        assert_eq!(
            kinds_of(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            Mode::Chmod.into()
        );
        assert!(kinds_of(EventKind::Modify(ModifyKind::Name(RenameMode::Both))).is_empty());
        assert!(kinds_of(EventKind::Access(AccessKind::Any)).is_empty());
    }

    #[test]
    fn test_from_notify_splits_paths() {
        let event = notify::Event::new(EventKind::Create(CreateKind::File))
            .add_path("/data/in/a.csv".into())
            .add_path("/data/in/b.csv".into());

        let events = FileEvent::from_notify(event);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].path, Path::new("/data/in/a.csv"));
        assert_eq!(events[1].kinds, Mode::Create.into());
    }
}
