use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::{deserialize_timestamp, keyed_record};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AvatarSize {
    /// Label such as `300x300`
    pub string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Avatar {
    pub url: String,
    pub size: AvatarSize,
}

/// Account that owns the client's credentials
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(remote = "Self")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Vec<Avatar>,
    #[serde(default, deserialize_with = "deserialize_timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

keyed_record!(User, "User");

impl User {
    /// Avatar with the given size label. The last match wins.
    pub fn avatar_size(&self, size: &str) -> Option<&Avatar> {
        self.avatar.iter().rev().find(|avatar| avatar.size.string == size)
    }
}
