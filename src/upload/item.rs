use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use crate::client::{Client, paths};
use crate::core::{
    ByteStream,
    CreateFileBody,
    CreateLinkBody,
    CreatedItem,
    Emitter,
    ItemEvent,
    ItemPatch,
    ItemRecord,
    ItemState,
    LocalId,
    PayloadSource,
    Result,
    ThumbRecord,
    UploadDescriptor,
    UploadError,
};
use super::probe::{self, FileProbe};
use super::progress::{ProgressStream, ProgressTracker, report_snapshots, snapshot_channel};

/// Called once a thumbnail upload settles
pub type ThumbCallback = Box<dyn FnOnce(std::result::Result<&ThumbRecord, &UploadError>) + Send + Sync>;

struct PendingThumb {
    path: PathBuf,
    callback: Option<ThumbCallback>,
}

/// Result of [`Item::thumb`]
#[derive(Debug, Clone, PartialEq)]
pub enum ThumbStatus {
    Uploaded(ThumbRecord),
    /// Held until the item has a remote id
    Queued,
}

/// Initial fields of a new item
#[derive(Debug, Clone, Default)]
pub struct ItemOptions {
    pub id: Option<String>,
    pub title: Option<String>,
    pub filename: Option<String>,
}

impl ItemOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// One upload: a local file or a remote link, stored as a record under a stream.
///
/// Saving a file item runs three steps. The record is created (which assigns
/// the id and the signed upload target), then the payload is streamed to
/// storage, then the record is flagged complete. A link item is registered
/// with a single request.
pub struct Item {
    client: Client,
    local_id: LocalId,
    stream_id: Option<String>,
    record: ItemRecord,
    source: Option<PayloadSource>,
    descriptor: Option<UploadDescriptor>,
    pending_thumb: Option<PendingThumb>,
    state: ItemState,
    events: Emitter<ItemEvent>,
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("local_id", &self.local_id)
            .field("stream_id", &self.stream_id)
            .field("record", &self.record)
            .field("source", &self.source)
            .field("state", &self.state)
            .field("pending_thumb", &self.pending_thumb.as_ref().map(|thumb| &thumb.path))
            .finish()
    }
}

impl Item {
    pub(crate) fn new(client: Client, options: ItemOptions, stream_id: Option<String>) -> Self {
        let state = if options.id.is_some() {
            ItemState::MetadataCreated
        } else {
            ItemState::New
        };

        Self {
            client,
            local_id: LocalId::new(),
            stream_id: stream_id.clone(),
            record: ItemRecord {
                id: options.id,
                stream: stream_id,
                title: options.title,
                filename: options.filename,
                ..Default::default()
            },
            source: None,
            descriptor: None,
            pending_thumb: None,
            state,
            events: Emitter::new(),
        }
    }

    pub(crate) fn attach(&mut self, stream_id: &str) {
        self.stream_id = Some(stream_id.to_string());
        self.record.stream = Some(stream_id.to_string());
    }

    /// Upload the file at `path`. Replaces any link set before.
    ///
    /// Replacing the payload of an item that was already saved detaches it
    /// from its remote record, so the next save creates a new one.
    pub fn set_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.detach_saved_payload();

        if self.record.title.is_none() {
            self.record.title = probe::title_from_path(&path);
        }
        self.record.filename = Some(probe::filename(&path));
        self.record.mime = Some(probe::media_type(&path).to_string());
        self.record.url = None;
        self.source = Some(PayloadSource::File(path));
        self
    }

    /// Register `url` instead of uploading bytes. Replaces any file set before.
    pub fn set_link(&mut self, url: &str) -> Result<&mut Self> {
        let url = Url::parse(url)?;
        Ok(self.link_to(url))
    }

    pub(crate) fn link_to(&mut self, url: Url) -> &mut Self {
        self.detach_saved_payload();
        self.record.filename = None;
        self.record.mime = None;
        self.record.size = None;
        self.record.url = Some(url.to_string());
        self.source = Some(PayloadSource::Link(url));
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.record.title = Some(title.into());
        self
    }

    pub fn on<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ItemEvent) + Send + Sync + 'static,
    {
        self.events.on(listener);
        self
    }

    pub fn events(&self) -> &Emitter<ItemEvent> {
        &self.events
    }

    pub fn id(&self) -> Option<&str> {
        self.record.id.as_deref()
    }

    /// True until the remote side has assigned an id.
    pub fn is_new(&self) -> bool {
        self.record.id.is_none()
    }

    pub fn local_id(&self) -> LocalId {
        self.local_id
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn title(&self) -> Option<&str> {
        self.record.title.as_deref()
    }

    pub fn record(&self) -> &ItemRecord {
        &self.record
    }

    pub fn source(&self) -> Option<&PayloadSource> {
        self.source.as_ref()
    }

    fn require_id(&self) -> Result<&str> {
        self.record
            .id
            .as_deref()
            .ok_or(UploadError::MissingIdentity("item"))
    }

    fn detach_saved_payload(&mut self) {
        if self.state != ItemState::Complete {
            return;
        }
        debug!(local_id = %self.local_id, id = ?self.record.id, "payload replaced, detaching from remote record");
        self.forget_remote();
    }

    /// Drop everything tied to the remote record. Title and payload stay.
    fn forget_remote(&mut self) {
        self.record.id = None;
        self.record.remote = None;
        self.record.thumb = None;
        self.record.complete = None;
        self.record.progress = None;
        self.record.created_at = None;
        self.record.updated_at = None;
        self.descriptor = None;
        self.state = ItemState::New;
    }

    fn transition(&mut self, next: ItemState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            debug!(local_id = %self.local_id, from = ?self.state, to = ?next, "ignored state change");
            return;
        }
        self.state = next;
    }

    /// Persist the item. A complete item is left alone.
    pub async fn save(&mut self) -> Result<()> {
        if self.state == ItemState::Complete {
            debug!(id = ?self.record.id, "item already complete");
            return Ok(());
        }

        let result = self.run_save().await;
        if let Err(err) = &result {
            warn!(local_id = %self.local_id, id = ?self.record.id, %err, "item save failed");
            self.transition(ItemState::Failed);
        }
        result
    }

    async fn run_save(&mut self) -> Result<()> {
        let source = self.source.clone().ok_or(UploadError::MissingPayload)?;
        let stream_id = self.stream_id.clone().ok_or(UploadError::MissingStream)?;

        if self.state == ItemState::Failed {
            let retry = if self.record.id.is_some() {
                ItemState::MetadataCreated
            } else {
                ItemState::New
            };
            self.transition(retry);
        }

        match source {
            PayloadSource::Link(url) => self.save_link(&stream_id, &url).await,
            PayloadSource::File(path) => self.save_file(&stream_id, &path).await,
        }
    }

    async fn save_link(&mut self, stream_id: &str, url: &Url) -> Result<()> {
        let body = CreateLinkBody {
            url: url.to_string(),
            title: self.record.title.clone(),
        };

        let response = self.client.post(paths::file_url(stream_id)).json(&body).send().await?;
        let status = response.status;
        let record: ItemRecord = response.json()?;
        self.record.merge(record);
        self.record.complete.get_or_insert(true);

        let id = self
            .record
            .id
            .clone()
            .ok_or_else(|| UploadError::api_error(status, "link record without id"))?;
        info!(%id, %url, "link registered");

        self.transition(ItemState::Complete);
        self.events.emit(&ItemEvent::Saved { id });
        self.run_pending_thumb().await;
        self.events.emit(&ItemEvent::End);
        Ok(())
    }

    async fn save_file(&mut self, stream_id: &str, path: &Path) -> Result<()> {
        // Nothing goes over the wire for a file that is missing or too big
        let file = FileProbe::inspect(path, self.client.config().max_file_size)?;

        if self.record.id.is_none() {
            self.create(stream_id, &file).await?;
            self.run_pending_thumb().await;
        }

        self.transition(ItemState::Uploading);
        let remote = self.transfer(&file).await?;

        self.set(ItemPatch::new().complete(true).remote(remote).progress(100.0))
            .await?;
        self.transition(ItemState::Complete);

        info!(id = ?self.record.id, path = %file.path.display(), size = file.size, "item saved");
        self.events.emit(&ItemEvent::End);
        Ok(())
    }

    async fn create(&mut self, stream_id: &str, file: &FileProbe) -> Result<()> {
        let body = CreateFileBody {
            filename: self.record.filename.clone().unwrap_or_else(|| file.filename.clone()),
            title: self.record.title.clone(),
            mime: file.mime.clone(),
            size: file.size,
            width: file.dimensions.map(|d| d.width),
            height: file.dimensions.map(|d| d.height),
        };

        debug!(stream = stream_id, filename = %body.filename, mime = %body.mime, size = body.size, "creating item");
        let response = self.client.post(paths::file_data(stream_id)).json(&body).send().await?;
        let status = response.status;
        let created: CreatedItem = response.json()?;

        self.record.mime = Some(file.mime.clone());
        self.record.size = Some(file.size);
        self.record.width = body.width;
        self.record.height = body.height;
        self.record.merge(created.record);

        let id = self
            .record
            .id
            .clone()
            .ok_or_else(|| UploadError::api_error(status, "item record without id"))?;

        if let Some(key) = created.upload.as_ref().and_then(|upload| upload.key.clone()) {
            self.record.remote = Some(key);
        } else if self.record.remote.is_none() {
            self.record.remote = Some(format!("{}{}", id, probe::extension(&file.path)));
        }
        self.descriptor = created.upload;

        self.transition(ItemState::MetadataCreated);
        self.events.emit(&ItemEvent::Saved { id });
        Ok(())
    }

    /// Stream the payload to storage, publishing throttled progress snapshots
    /// alongside. Returns the storage key.
    async fn transfer(&mut self, file: &FileProbe) -> Result<String> {
        let id = self.require_id()?.to_string();
        let remote = self
            .record
            .remote
            .clone()
            .unwrap_or_else(|| format!("{}{}", id, probe::extension(&file.path)));

        let target = match self.descriptor.clone() {
            Some(target) => target,
            None => self.sign(&remote, &file.mime).await?,
        };

        let config = self.client.config();
        let reader = ReaderStream::with_capacity(tokio::fs::File::open(&file.path).await?, config.chunk_size);
        let (throttle, snapshots) = snapshot_channel(config.progress_interval);
        let tracker = Arc::new(ProgressTracker::new(file.size, self.events.clone()).with_snapshots(throttle));
        let body: ByteStream = ProgressStream::new(reader, tracker).boxed();

        debug!(%id, remote = %remote, url = %target.url, size = file.size, "uploading payload");

        let sink = self.client.sink();
        let done = CancellationToken::new();
        let upload = async {
            let response = sink.put(&target, body, file.size, &file.mime).await;
            done.cancel();
            response
        };

        let client = &self.client;
        let progress = &mut self.record.progress;
        let item_id = id.as_str();
        let report = report_snapshots(snapshots, done.clone(), |percent| {
            *progress = Some(percent);
            let client = client.clone();
            let path = paths::file(item_id);
            async move {
                client
                    .patch(path)
                    .json(&ItemPatch::new().progress(percent))
                    .send()
                    .await
                    .map(|_| ())
            }
        });

        let (response, ()) = tokio::join!(upload, report);
        let response = response?;
        if !response.is_success() {
            return Err(UploadError::api_error(response.status, response.text));
        }

        Ok(remote)
    }

    /// Ask the API for a signed storage url for `name`.
    pub async fn sign(&self, name: &str, mime: &str) -> Result<UploadDescriptor> {
        let id = self.require_id()?;
        let response = self
            .client
            .get(paths::sign(id))
            .query("mime", mime)
            .query("name", name)
            .send()
            .await?;

        let mut target = UploadDescriptor::from_url(response.text.trim());
        target.key = Some(name.to_string());
        Ok(target)
    }

    /// Merge `patch` locally, then send it.
    pub async fn set(&mut self, patch: ItemPatch) -> Result<()> {
        self.record.apply(&patch);
        let id = self.require_id()?;
        self.client.patch(paths::file(id)).json(&patch).send().await?;
        Ok(())
    }

    /// Refresh the local record from the remote one.
    pub async fn load(&mut self) -> Result<&ItemRecord> {
        let id = self.require_id()?;
        let record: ItemRecord = self.client.get(paths::file(id)).send().await?.json()?;
        self.record.merge(record);

        self.state = if self.record.is_complete() {
            ItemState::Complete
        } else {
            ItemState::MetadataCreated
        };
        Ok(&self.record)
    }

    /// Delete the remote record. The item becomes new again and a later save
    /// creates a fresh record.
    pub async fn remove(&mut self) -> Result<()> {
        let id = self.require_id()?;
        self.client.delete(paths::file(id)).send().await?;
        info!(%id, "item removed");

        self.forget_remote();
        Ok(())
    }

    /// Attach a thumbnail image. Without an id yet the thumbnail is queued and
    /// uploaded right after the record is created; a later call replaces the
    /// queued one.
    pub async fn thumb(&mut self, path: impl AsRef<Path>, callback: Option<ThumbCallback>) -> Result<ThumbStatus> {
        let path = path.as_ref();
        if probe::raster_format(path).is_none() {
            return Err(UploadError::InvalidThumbnail { path: path.to_path_buf() });
        }

        if self.is_new() {
            debug!(local_id = %self.local_id, path = %path.display(), "thumbnail queued");
            self.pending_thumb = Some(PendingThumb {
                path: path.to_path_buf(),
                callback,
            });
            return Ok(ThumbStatus::Queued);
        }

        let result = self.upload_thumb(path).await;
        if let Some(callback) = callback {
            callback(result.as_ref());
        }
        result.map(ThumbStatus::Uploaded)
    }

    async fn run_pending_thumb(&mut self) {
        let Some(PendingThumb { path, callback }) = self.pending_thumb.take() else {
            return;
        };

        let result = self.upload_thumb(&path).await;
        if let Err(err) = &result {
            warn!(id = ?self.record.id, path = %path.display(), %err, "queued thumbnail failed");
        }
        if let Some(callback) = callback {
            callback(result.as_ref());
        }
    }

    async fn upload_thumb(&mut self, path: &Path) -> Result<ThumbRecord> {
        let id = self.require_id()?.to_string();
        let file = FileProbe::inspect(path, self.client.config().max_file_size)?;
        let key = thumb_key(self.record.remote.as_deref().unwrap_or(&id), path);

        let target = self.sign(&key, &file.mime).await?;
        let reader = ReaderStream::with_capacity(
            tokio::fs::File::open(&file.path).await?,
            self.client.config().chunk_size,
        );

        let response = self
            .client
            .sink()
            .put(&target, reader.boxed(), file.size, &file.mime)
            .await?;
        if !response.is_success() {
            return Err(UploadError::api_error(response.status, response.text));
        }

        let thumb = ThumbRecord {
            key,
            mime: file.mime,
            width: file.dimensions.map(|d| d.width),
            height: file.dimensions.map(|d| d.height),
        };
        self.set(ItemPatch::new().thumb(thumb.clone())).await?;

        debug!(%id, key = %thumb.key, "thumbnail uploaded");
        Ok(thumb)
    }
}

/// `photos/a.jpg` with `t.png` becomes `photos/a-thumb.png`
fn thumb_key(remote: &str, thumb_path: &Path) -> String {
    let name_start = remote.rfind('/').map(|i| i + 1).unwrap_or(0);
    let stem = match remote[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &remote[..name_start + dot],
        _ => remote,
    };
    format!("{}-thumb{}", stem, probe::extension(thumb_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::{HttpBlobSink, HttpTransport};

    fn offline_client() -> Client {
        let config = ClientConfig::default().with_url("http://127.0.0.1:9").with_token("t");
        Client::new(
            Arc::new(HttpTransport::from_config(&config).unwrap()),
            Arc::new(HttpBlobSink::from_config(&config).unwrap()),
            config,
        )
    }

    #[test]
    fn test_thumb_key() {
        assert_eq!(thumb_key("abc.jpg", Path::new("t.png")), "abc-thumb.png");
        assert_eq!(thumb_key("photos/a.b/c", Path::new("t.jpg")), "photos/a.b/c-thumb.jpg");
        assert_eq!(thumb_key("id", Path::new("t.gif")), "id-thumb.gif");
        assert_eq!(thumb_key(".hidden", Path::new("t.png")), ".hidden-thumb.png");
    }

    #[test]
    fn test_payload_is_exclusive() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), Some("s1".to_string()));

        item.set_file("files/maru-1.jpg");
        assert_eq!(item.title(), Some("maru-1"));
        assert_eq!(item.record().mime.as_deref(), Some("image/jpeg"));

        item.set_link("http://example.com/a").unwrap();
        assert!(matches!(item.source(), Some(PayloadSource::Link(_))));
        assert!(item.record().filename.is_none());
        // the title derived from the file survives
        assert_eq!(item.title(), Some("maru-1"));

        item.set_file("b.txt");
        assert!(matches!(item.source(), Some(PayloadSource::File(_))));
        assert!(item.record().url.is_none());
    }

    #[test]
    fn test_payload_for_existing_record() {
        let mut item = Item::new(offline_client(), ItemOptions::new().id("i1"), Some("s1".to_string()));
        item.set_file("a.txt").set_file("b.txt");
        // not saved yet, so the record keeps its id
        assert_eq!(item.id(), Some("i1"));
        assert_eq!(item.state(), ItemState::MetadataCreated);
        assert_eq!(item.record().filename.as_deref(), Some("b.txt"));
    }

    #[test]
    fn test_invalid_link() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), None);
        let err = item.set_link("not a url").unwrap_err();
        assert!(matches!(err, UploadError::InvalidUrl(_)));
        assert!(item.source().is_none());
    }

    #[test]
    fn test_new_item_identity() {
        let item = Item::new(offline_client(), ItemOptions::new().title("x"), None);
        assert!(item.is_new());
        assert_eq!(item.state(), ItemState::New);

        let existing = Item::new(offline_client(), ItemOptions::new().id("i1"), None);
        assert!(!existing.is_new());
        assert_eq!(existing.state(), ItemState::MetadataCreated);
        assert_ne!(item.local_id(), existing.local_id());
    }

    #[tokio::test]
    async fn test_save_without_payload() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), Some("s1".to_string()));
        let err = item.save().await.unwrap_err();
        assert!(matches!(err, UploadError::MissingPayload));
        assert_eq!(item.state(), ItemState::Failed);
    }

    #[tokio::test]
    async fn test_save_without_stream() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), None);
        item.set_file("Cargo.toml");
        let err = item.save().await.unwrap_err();
        assert!(matches!(err, UploadError::MissingStream));
    }

    #[tokio::test]
    async fn test_thumb_requires_raster_image() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), None);
        let err = item.thumb("notes.txt", None).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidThumbnail { .. }));

        let status = item.thumb("thumb.png", None).await.unwrap();
        assert_eq!(status, ThumbStatus::Queued);
    }

    #[tokio::test]
    async fn test_requests_need_an_id() {
        let mut item = Item::new(offline_client(), ItemOptions::new(), None);
        assert!(matches!(item.load().await.unwrap_err(), UploadError::MissingIdentity("item")));
        assert!(matches!(item.remove().await.unwrap_err(), UploadError::MissingIdentity("item")));

        // patches still land locally
        let err = item.set(ItemPatch::new().title("renamed")).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingIdentity("item")));
        assert_eq!(item.title(), Some("renamed"));
    }
}
