use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;
use crate::client::{Client, paths};
use crate::core::{
    BatchExecutor,
    BatchOutcome,
    Emitter,
    Result,
    StreamEvent,
    StreamPatch,
    StreamRecord,
    UploadError,
};
use super::item::{Item, ItemOptions};

/// Outcome of saving a stream's items, one entry per item in insertion order
pub type ItemsOutcome = BatchOutcome<(), Arc<UploadError>>;

/// A titled collection of upload items.
///
/// Items are saved together by [`Stream::save`], at most `concurrency` at a
/// time. One failing item is reported through [`StreamEvent::ItemFailed`] and
/// does not stop the others.
pub struct Stream {
    client: Client,
    record: StreamRecord,
    items: Vec<Item>,
    concurrency: usize,
    events: Emitter<StreamEvent>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("record", &self.record)
            .field("items", &self.items.len())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl Stream {
    pub(crate) fn new(client: Client, record: StreamRecord) -> Self {
        let concurrency = client.config().concurrency;
        Self {
            client,
            record,
            items: Vec::new(),
            concurrency,
            events: Emitter::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.record.id.as_deref()
    }

    pub fn is_new(&self) -> bool {
        self.record.id.is_none()
    }

    pub fn title(&self) -> Option<&str> {
        self.record.title.as_deref()
    }

    pub fn record(&self) -> &StreamRecord {
        &self.record
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut [Item] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Limit on items saved at once. Zero is treated as one.
    pub fn concurrency(&mut self, concurrency: usize) -> &mut Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    pub fn on<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.events.on(listener);
        self
    }

    pub fn events(&self) -> &Emitter<StreamEvent> {
        &self.events
    }

    /// Queue a new item and hand it back for configuration.
    pub fn item(&mut self, options: ItemOptions) -> &mut Item {
        let item = Item::new(self.client.clone(), options, self.record.id.clone());
        let local_id = item.local_id();
        let index = self.items.len();
        self.items.push(item);

        debug!(stream = ?self.record.id, %local_id, index, "item added");
        self.events.emit(&StreamEvent::ItemAdded { item: local_id, index });
        &mut self.items[index]
    }

    /// Handle to an item that already exists remotely.
    pub fn item_by_id(&mut self, id: impl Into<String>) -> &mut Item {
        self.item(ItemOptions::new().id(id))
    }

    /// Queue a file upload.
    pub fn file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.item(ItemOptions::new()).set_file(path);
        self
    }

    /// Queue a link. Nothing is queued when `url` does not parse.
    pub fn link(&mut self, url: &str) -> Result<&mut Self> {
        let url = Url::parse(url)?;
        self.item(ItemOptions::new()).link_to(url);
        Ok(self)
    }

    /// Create the stream remotely when needed, then save every item.
    ///
    /// Failing to create the stream is returned as an error and no item is
    /// attempted. Item failures are only reported through events and the
    /// outcome of [`Stream::save_items`].
    pub async fn save(&mut self) -> Result<()> {
        if self.is_new() {
            self.create().await?;
        }

        self.save_items().await?;
        Ok(())
    }

    async fn create(&mut self) -> Result<()> {
        let body = StreamPatch {
            title: self.record.title.clone(),
        };

        let response = self.client.post(paths::STREAMS).json(&body).send().await?;
        let status = response.status;
        let record: StreamRecord = response.json()?;
        self.record.merge(record);

        let id = self
            .record
            .id
            .clone()
            .ok_or_else(|| UploadError::api_error(status, "stream record without id"))?;

        info!(%id, title = ?self.record.title, "stream created");
        self.events.emit(&StreamEvent::Saved { id });
        Ok(())
    }

    /// Save every item of an existing stream and wait for all of them.
    pub async fn save_items(&mut self) -> Result<ItemsOutcome> {
        let stream_id = self
            .record
            .id
            .clone()
            .ok_or(UploadError::MissingIdentity("stream"))?;

        let executor = BatchExecutor::new(self.concurrency);
        let events = &self.events;
        let stream_ref = stream_id.as_str();

        let operations = self.items.iter_mut().enumerate().map(move |(index, item)| async move {
            item.attach(stream_ref);
            let local_id = item.local_id();

            item.save().await.map_err(|err| {
                let error = Arc::new(err);
                events.emit(&StreamEvent::ItemFailed {
                    item: local_id,
                    index,
                    error: error.clone(),
                });
                error
            })
        });

        let outcome = executor.run(operations).await;
        let (saved, failed) = (outcome.succeeded(), outcome.failed());

        info!(stream = %stream_id, saved, failed, peak = outcome.peak_in_flight(), "stream items settled");
        self.events.emit(&StreamEvent::End { saved, failed });
        Ok(outcome)
    }

    /// Merge `patch` locally, then send it.
    pub async fn set(&mut self, patch: StreamPatch) -> Result<()> {
        self.record.apply(&patch);
        let id = self.require_id()?;
        self.client.patch(paths::stream(id)).json(&patch).send().await?;
        Ok(())
    }

    /// Refresh the local record from the remote one.
    pub async fn load(&mut self) -> Result<&StreamRecord> {
        let id = self.require_id()?;
        let record: StreamRecord = self.client.get(paths::stream(id)).send().await?.json()?;
        self.record.merge(record);
        Ok(&self.record)
    }

    /// Delete the stream remotely. The handle becomes new again.
    pub async fn remove(&mut self) -> Result<()> {
        let id = self.require_id()?;
        self.client.delete(paths::stream(id)).send().await?;
        info!(%id, "stream removed");
        self.record.id = None;
        Ok(())
    }

    /// Take the item at `index` out of the stream, deleting its remote record
    /// if it has one. On error the item stays in place.
    pub async fn remove_item(&mut self, index: usize) -> Result<Item> {
        let item = self
            .items
            .get_mut(index)
            .ok_or_else(|| UploadError::config_error(format!("no item at index {}", index)))?;

        if !item.is_new() {
            item.remove().await?;
        }
        Ok(self.items.remove(index))
    }

    fn require_id(&self) -> Result<&str> {
        self.record
            .id
            .as_deref()
            .ok_or(UploadError::MissingIdentity("stream"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use parking_lot::Mutex;

    fn offline_client(concurrency: usize) -> Client {
        let config = ClientConfig::default()
            .with_url("http://127.0.0.1:9")
            .with_token("t")
            .with_concurrency(concurrency);
        Client::from_config(config).unwrap()
    }

    #[test]
    fn test_item_added_events() {
        let mut stream = offline_client(4).stream("Files");
        let added = Arc::new(Mutex::new(Vec::new()));
        let seen = added.clone();
        stream.on(move |event| {
            if let StreamEvent::ItemAdded { index, .. } = event {
                seen.lock().push(*index);
            }
        });

        stream.file("a.txt").file("b.txt");
        stream.link("http://example.com").unwrap();

        assert_eq!(*added.lock(), vec![0, 1, 2]);
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.items()[1].title(), Some("b"));
    }

    #[test]
    fn test_bad_link_queues_nothing() {
        let mut stream = offline_client(4).stream("Files");
        assert!(stream.link("::").is_err());
        assert!(stream.is_empty());
    }

    #[test]
    fn test_concurrency_defaults_to_config() {
        let mut stream = offline_client(3).stream("Files");
        assert_eq!(stream.concurrency_limit(), 3);
        stream.concurrency(0);
        assert_eq!(stream.concurrency_limit(), 1);
    }

    #[test]
    fn test_items_inherit_stream_id() {
        let mut stream = offline_client(1).stream_by_id("s1");
        let item = stream.item(ItemOptions::new().title("x"));
        assert_eq!(item.stream_id(), Some("s1"));

        let mut unsaved = offline_client(1).stream("new");
        assert_eq!(unsaved.item(ItemOptions::new()).stream_id(), None);
    }

    #[tokio::test]
    async fn test_remove_unknown_index() {
        let mut stream = offline_client(1).stream("Files");
        let err = stream.remove_item(2).await.unwrap_err();
        assert!(matches!(err, UploadError::Config(_)));
    }

    #[tokio::test]
    async fn test_remove_unsaved_item_is_local() {
        let mut stream = offline_client(1).stream("Files");
        stream.file("a.txt").file("b.txt");

        let removed = stream.remove_item(0).await.unwrap();
        assert_eq!(removed.title(), Some("a"));
        assert_eq!(stream.len(), 1);
        assert_eq!(stream.items()[0].title(), Some("b"));
    }
}
