use std::collections::BTreeMap;
use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;
use uuid::Uuid;

// Timestamps arrive either as RFC 3339 strings or as epoch milliseconds
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|date| Some(date.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
        Some(Raw::Millis(millis)) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", millis))),
    }
}

/// Records may carry `_id`, `id` or both. `id` wins when both are present.
///
/// The record derives with `#[serde(remote = "Self")]`; this wires the trait
/// impls through a wrapper that reads `_id` on the side.
macro_rules! keyed_record {
    ($record:ident, $path:literal) => {
        impl<'de> serde::Deserialize<'de> for $record {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                #[derive(serde::Deserialize)]
                struct Keyed {
                    #[serde(default, rename = "_id")]
                    underscore_id: Option<String>,
                    #[serde(flatten, with = $path)]
                    record: $record,
                }

                let Keyed { underscore_id, mut record } = <Keyed as serde::Deserialize>::deserialize(deserializer)?;
                if record.id.is_none() {
                    record.id = underscore_id;
                }
                Ok(record)
            }
        }

        impl serde::Serialize for $record {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                $record::serialize(self, serializer)
            }
        }
    };
}

pub(crate) use keyed_record;

fn merge_field<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Client-side identity of an item, stable before the remote side assigns an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct LocalId(Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upload lifecycle of a single item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ItemState {
    /// Not known to the remote side
    New,
    /// Remote record exists, payload not yet transferred
    MetadataCreated,
    /// Payload transfer in progress
    Uploading,
    /// Payload stored and record flagged complete
    Complete,
    /// Last save attempt failed
    Failed,
}

impl ItemState {
    pub fn can_transition_to(self, next: ItemState) -> bool {
        use ItemState::*;

        matches!(
            (self, next),
            (New, MetadataCreated)
                | (New, Complete)
                | (MetadataCreated, Uploading)
                | (MetadataCreated, Complete)
                | (Uploading, Complete)
                | (Failed, New)
                | (Failed, MetadataCreated)
        ) || (next == Failed && self != Complete)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Complete | ItemState::Failed)
    }
}

/// What an item uploads: exactly one of a local file or a remote url
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSource {
    File(PathBuf),
    Link(Url),
}

/// Byte accounting for one payload transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressInfo {
    pub total: u64,
    pub sent: u64,
    pub remaining: u64,
    pub percent: f64,
}

impl ProgressInfo {
    pub fn new(sent: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            (sent as f64 / total as f64) * 100.0
        };

        Self {
            total,
            sent,
            remaining: total.saturating_sub(sent),
            percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Signed destination for a direct binary upload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadDescriptor {
    pub url: String,
    /// Storage key, when the remote side picks it
    #[serde(default)]
    pub key: Option<String>,
    /// Credential fields forwarded to the storage backend as headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl UploadDescriptor {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(remote = "Self")]
pub struct StreamRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

keyed_record!(StreamRecord, "StreamRecord");

impl StreamRecord {
    /// Overwrite local fields with every field the remote record carries.
    pub fn merge(&mut self, other: StreamRecord) {
        merge_field(&mut self.id, other.id);
        merge_field(&mut self.title, other.title);
        merge_field(&mut self.items, other.items);
        merge_field(&mut self.created_at, other.created_at);
        merge_field(&mut self.updated_at, other.updated_at);
    }

    pub fn apply(&mut self, patch: &StreamPatch) {
        merge_field(&mut self.title, patch.title.clone());
    }
}

/// Partial update of a stream
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl StreamPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Filters for listing streams
#[derive(Debug, Clone, Default)]
pub struct StreamQuery {
    pub title: Option<String>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

impl StreamQuery {
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(title) = &self.title {
            pairs.push(("title".to_string(), title.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip".to_string(), skip.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThumbRecord {
    pub key: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(remote = "Self")]
pub struct ItemRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<ThumbRecord>,
    #[serde(default, deserialize_with = "deserialize_timestamp", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

keyed_record!(ItemRecord, "ItemRecord");

impl ItemRecord {
    /// Overwrite local fields with every field the remote record carries.
    pub fn merge(&mut self, other: ItemRecord) {
        merge_field(&mut self.id, other.id);
        merge_field(&mut self.stream, other.stream);
        merge_field(&mut self.title, other.title);
        merge_field(&mut self.filename, other.filename);
        merge_field(&mut self.mime, other.mime);
        merge_field(&mut self.size, other.size);
        merge_field(&mut self.width, other.width);
        merge_field(&mut self.height, other.height);
        merge_field(&mut self.remote, other.remote);
        merge_field(&mut self.url, other.url);
        merge_field(&mut self.complete, other.complete);
        merge_field(&mut self.progress, other.progress);
        merge_field(&mut self.thumb, other.thumb);
        merge_field(&mut self.created_at, other.created_at);
        merge_field(&mut self.updated_at, other.updated_at);
    }

    pub fn apply(&mut self, patch: &ItemPatch) {
        merge_field(&mut self.title, patch.title.clone());
        merge_field(&mut self.filename, patch.filename.clone());
        merge_field(&mut self.remote, patch.remote.clone());
        merge_field(&mut self.complete, patch.complete);
        merge_field(&mut self.progress, patch.progress);
        merge_field(&mut self.thumb, patch.thumb.clone());
    }

    pub fn is_complete(&self) -> bool {
        self.complete.unwrap_or(false)
    }
}

/// Partial update of an item, limited to the fields the client may write
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb: Option<ThumbRecord>,
}

impl ItemPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn complete(mut self, complete: bool) -> Self {
        self.complete = Some(complete);
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress = Some(percent);
        self
    }

    pub fn thumb(mut self, thumb: ThumbRecord) -> Self {
        self.thumb = Some(thumb);
        self
    }
}

/// Metadata sent when registering a file item
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateFileBody {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub mime: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateLinkBody {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Answer to a file registration: the record plus where to put the bytes
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CreatedItem {
    #[serde(flatten)]
    pub record: ItemRecord,
    #[serde(default)]
    pub upload: Option<UploadDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_state_transition() {
        use ItemState::*;

        // valid
        assert!(New.can_transition_to(MetadataCreated));
        assert!(MetadataCreated.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Complete));
        assert!(New.can_transition_to(Complete));
        assert!(Uploading.can_transition_to(Failed));
        assert!(Failed.can_transition_to(New));

        // invalid
        assert!(!Complete.can_transition_to(Uploading));
        assert!(!Complete.can_transition_to(Failed));
        assert!(!New.can_transition_to(Uploading));
        assert!(!Failed.can_transition_to(Uploading));
    }

    #[test]
    fn test_progress_info() {
        let info = ProgressInfo::new(25, 100);
        assert_eq!(info.remaining, 75);
        assert_eq!(info.percent, 25.0);

        let empty = ProgressInfo::new(0, 0);
        assert_eq!(empty.percent, 100.0);
    }

    #[test]
    fn test_record_timestamps() {
        let record: StreamRecord = serde_json::from_value(json!({
            "_id": "s1",
            "title": "Files",
            "created_at": "2013-07-23T23:30:21.190Z",
            "updated_at": 1374622221198i64,
        }))
        .unwrap();

        assert_eq!(record.id.as_deref(), Some("s1"));
        assert!(record.created_at.is_some());
        assert_eq!(record.updated_at.unwrap().timestamp_millis(), 1374622221198);
    }

    #[test]
    fn test_both_id_keys() {
        let item: ItemRecord = serde_json::from_value(json!({
            "_id": "i1",
            "id": "i1",
            "filename": "a.txt",
        }))
        .unwrap();
        assert_eq!(item.id.as_deref(), Some("i1"));
        assert_eq!(item.filename.as_deref(), Some("a.txt"));

        let stream: StreamRecord = serde_json::from_value(json!({ "id": "s2", "_id": "s1" })).unwrap();
        assert_eq!(stream.id.as_deref(), Some("s2"));

        let created: CreatedItem = serde_json::from_value(json!({
            "_id": "i3",
            "id": "i3",
            "upload": { "url": "https://bucket/i3" }
        }))
        .unwrap();
        assert_eq!(created.record.id.as_deref(), Some("i3"));
        assert!(created.upload.is_some());

        // only the plain key is written back
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({ "id": "i1", "filename": "a.txt" }));
    }

    #[test]
    fn test_merge_keeps_local_fields() {
        let mut local = ItemRecord {
            title: Some("maru".to_string()),
            filename: Some("maru.jpg".to_string()),
            ..Default::default()
        };
        local.merge(ItemRecord {
            id: Some("i1".to_string()),
            title: Some("Maru".to_string()),
            ..Default::default()
        });

        assert_eq!(local.id.as_deref(), Some("i1"));
        assert_eq!(local.title.as_deref(), Some("Maru"));
        assert_eq!(local.filename.as_deref(), Some("maru.jpg"));
    }

    #[test]
    fn test_patch_serializes_only_set_fields() {
        let patch = ItemPatch::new().complete(true).remote("abc.json");
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({ "complete": true, "remote": "abc.json" }));

        let mut record = ItemRecord::default();
        record.apply(&patch);
        assert!(record.is_complete());
    }

    #[test]
    fn test_created_item_with_descriptor() {
        let created: CreatedItem = serde_json::from_value(json!({
            "id": "i1",
            "filename": "a.png",
            "upload": { "url": "https://bucket/abc", "headers": { "x-amz-security-token": "t" } }
        }))
        .unwrap();

        assert_eq!(created.record.id.as_deref(), Some("i1"));
        let upload = created.upload.unwrap();
        assert_eq!(upload.key, None);
        assert_eq!(upload.headers.get("x-amz-security-token").map(String::as_str), Some("t"));
    }
}
