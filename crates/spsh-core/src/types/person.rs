//! Person types

use serde::{Deserialize, Serialize};

/// Identity of a person as supplied by the upstream person service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonData {
    pub id: String,
    /// Directory username (`uid`); unset until the person has been assigned one
    pub username: Option<String>,
    pub vorname: String,
    pub familienname: String,
    /// Directory-assigned identifier, known once the entry was read back
    #[serde(default)]
    pub entry_uuid: Option<String>,
}

impl PersonData {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        vorname: impl Into<String>,
        familienname: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: Some(username.into()),
            vorname: vorname.into(),
            familienname: familienname.into(),
            entry_uuid: None,
        }
    }

    /// The username, if one is set and non-empty
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Attribute changes requested for an existing person entry.
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonAttributeChanges {
    pub vorname: Option<String>,
    pub familienname: Option<String>,
    pub username: Option<String>,
}

impl PersonAttributeChanges {
    pub fn is_empty(&self) -> bool {
        self.vorname.is_none() && self.familienname.is_none() && self.username.is_none()
    }
}
