//! Change kinds a trigger can react to.

use std::fmt;

/// A filesystem change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A file or directory was created.
    Create,

    /// File contents were written.
    Write,

    /// A file or directory was removed.
    Remove,

    /// Permissions or other metadata changed.
    Chmod,
}

impl Mode {
    /// All modes, in display order.
    pub const ALL: [Mode; 4] = [Mode::Create, Mode::Write, Mode::Remove, Mode::Chmod];

    /// Map a configuration name to a mode. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "write" => Some(Self::Write),
            "remove" => Some(Self::Remove),
            "chmod" => Some(Self::Chmod),
            _ => None,
        }
    }

    /// The configuration name of this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Chmod => "chmod",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::Create => 1,
            Self::Write => 1 << 1,
            Self::Remove => 1 << 2,
            Self::Chmod => 1 << 3,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`Mode`]s, stored as a bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ModeSet(u8);

impl ModeSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build a set from configuration names, silently skipping unknown ones.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|name| Mode::parse(name.as_ref()))
            .collect()
    }

    /// Add a mode to the set.
    pub fn insert(&mut self, mode: Mode) {
        self.0 |= mode.bit();
    }

    /// Return the set with `mode` added.
    pub fn with(mut self, mode: Mode) -> Self {
        self.insert(mode);
        self
    }

    pub fn contains(self, mode: Mode) -> bool {
        self.0 & mode.bit() != 0
    }

    /// Whether the two sets share at least one mode.
    pub fn intersects(self, other: ModeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the modes in the set.
    pub fn iter(self) -> impl Iterator<Item = Mode> {
        Mode::ALL.into_iter().filter(move |m| self.contains(*m))
    }
}

impl From<Mode> for ModeSet {
    fn from(mode: Mode) -> Self {
        Self(mode.bit())
    }
}

impl FromIterator<Mode> for ModeSet {
    fn from_iter<T: IntoIterator<Item = Mode>>(iter: T) -> Self {
        let mut set = Self::empty();
        for mode in iter {
            set.insert(mode);
        }
        set
    }
}

impl fmt::Display for ModeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Mode::as_str).collect();
        f.write_str(&names.join("|"))
    }
}
