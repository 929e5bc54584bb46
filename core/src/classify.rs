//! Change classification between two snapshots of the same file.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::snapshot::FileSnapshot;

/// Label of a snapshot transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Did not exist, now exists.
    Add,

    /// Existed before and still exists.
    Mod,

    /// Existed before, now gone.
    Del,

    /// Neither snapshot exists.
    Unk,
}

impl ChangeKind {
    /// Label a transition between two existence states.
    pub fn between(previous_exists: bool, current_exists: bool) -> Self {
        match (previous_exists, current_exists) {
            (false, true) => Self::Add,
            (true, true) => Self::Mod,
            (true, false) => Self::Del,
            (false, false) => Self::Unk,
        }
    }

    /// Short uppercase label used in messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Mod => "MOD",
            Self::Del => "DEL",
            Self::Unk => "UNK",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Transition label.
    pub kind: ChangeKind,

    /// Basename of the file.
    pub name: String,

    /// Human-readable messages, possibly none.
    pub messages: Vec<String>,
}

impl Classification {
    /// Whether the transition produced anything worth showing.
    pub fn is_silent(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Classify the transition from `previous` to `current`.
///
/// Equal sizes report an in-place edit when content differs, and an
/// "Empty file." line for non-`MOD` transitions otherwise. Differing
/// sizes always report the size change, followed by the appended tail
/// when the old content is an exact prefix of the new content.
pub fn classify(previous: &FileSnapshot, current: &FileSnapshot) -> Classification {
    let kind = ChangeKind::between(previous.exists, current.exists);
    let name = current.name.clone();
    let prefix = format!("{kind}[{name}]");
    let mut messages = Vec::new();

    if current.size == previous.size {
        let differs = match (&previous.content, &current.content) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        if differs {
            messages.push(format!("{prefix}: Data modified in place."));
        } else if kind != ChangeKind::Mod {
            messages.push(format!("{prefix}: Empty file."));
        }
    } else {
        messages.push(format!(
            "{prefix}: File size changed from {} to {}.",
            previous.size, current.size
        ));
        if let Some(tail) = appended_tail(previous, current) {
            messages.push(tail);
        }
    }

    Classification {
        kind,
        name,
        messages,
    }
}

/// Bytes appended to `previous` to form `current`, as text.
fn appended_tail(previous: &FileSnapshot, current: &FileSnapshot) -> Option<String> {
    if current.size <= previous.size {
        return None;
    }
    let old = previous.content.as_deref()?;
    let new = current.content.as_deref()?;
    let tail = new.strip_prefix(old)?;
    Some(String::from_utf8_lossy(tail).into_owned())
}
