use serde::{Deserialize, Serialize};

use crate::units::UnitKind;

/// Role tag on an assembled API message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl From<UnitKind> for Role {
    fn from(kind: UnitKind) -> Self {
        match kind {
            UnitKind::User => Role::User,
            UnitKind::Assistant => Role::Assistant,
            UnitKind::System | UnitKind::Note => Role::System,
        }
    }
}

/// One role-tagged message in an assembled API payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_to_role_mapping() {
        assert_eq!(Role::from(UnitKind::User), Role::User);
        assert_eq!(Role::from(UnitKind::Assistant), Role::Assistant);
        assert_eq!(Role::from(UnitKind::System), Role::System);
        assert_eq!(Role::from(UnitKind::Note), Role::System);
    }

    #[test]
    fn role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), r#""system""#);
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
    }

    #[test]
    fn message_serde_roundtrip() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
        let parsed: ChatMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.role, Role::User);
        assert_eq!(parsed.content, "hello");
    }
}
