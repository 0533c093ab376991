use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::UnitId;

/// What kind of turn a unit represents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    User,
    Assistant,
    System,
    /// Free-standing annotation; rendered to the model as a system turn.
    #[default]
    Note,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Note => write!(f, "note"),
        }
    }
}

impl std::str::FromStr for UnitKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "note" => Ok(Self::Note),
            other => Err(format!("unknown unit kind: {other}")),
        }
    }
}

/// One atomic conversation turn. `removed` is a tombstone, never a hard
/// delete: retracted units stay in the conversation for audit and for
/// forget-notice synthesis. `timestamp` is the sole ordering key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextUnit {
    #[serde(default = "UnitId::new")]
    pub id: UnitId,
    #[serde(default)]
    pub kind: UnitKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub removed: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ContextUnit {
    pub fn new(kind: UnitKind, content: impl Into<String>) -> Self {
        Self {
            id: UnitId::new(),
            kind,
            content: content.into(),
            tags: Vec::new(),
            pinned: false,
            removed: false,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(UnitKind::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(UnitKind::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(UnitKind::System, content)
    }

    pub fn note(content: impl Into<String>) -> Self {
        Self::new(UnitKind::Note, content)
    }

    pub fn visible(&self) -> bool {
        !self.removed
    }
}
