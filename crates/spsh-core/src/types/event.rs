//! Domain events emitted after confirmed directory writes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectoryEventKind {
    /// Mail attributes of a person entry were rewritten
    PersonEntryChanged {
        person_id: String,
        username: String,
        mail_primary_address: Option<String>,
        mail_alternative_address: Option<String>,
    },
    /// A new password was written to `userPassword`
    PasswordChanged { person_id: String, username: String },
    /// The person entry was removed from the directory
    PersonEntryDeleted { person_id: String, username: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: DirectoryEventKind,
}

impl DirectoryEvent {
    pub fn new(kind: DirectoryEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn person_id(&self) -> &str {
        match &self.kind {
            DirectoryEventKind::PersonEntryChanged { person_id, .. }
            | DirectoryEventKind::PasswordChanged { person_id, .. }
            | DirectoryEventKind::PersonEntryDeleted { person_id, .. } => person_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            DirectoryEventKind::PersonEntryChanged { .. } => "PersonEntryChanged",
            DirectoryEventKind::PasswordChanged { .. } => "PasswordChanged",
            DirectoryEventKind::PersonEntryDeleted { .. } => "PersonEntryDeleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_flat() {
        let event = DirectoryEvent::new(DirectoryEventKind::PasswordChanged {
            person_id: "p-1".to_string(),
            username: "mmustermann".to_string(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "password_changed");
        assert_eq!(json["person_id"], "p-1");
        assert_eq!(event.name(), "PasswordChanged");
        assert_eq!(event.person_id(), "p-1");
    }
}
