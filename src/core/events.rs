use std::sync::Arc;
use parking_lot::RwLock;
use super::errors::UploadError;
use super::types::{LocalId, ProgressInfo};

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Listener registry for one object's events.
///
/// Clones share the same registry, so a transfer can hold a handle and
/// notify the listeners registered on the item that started it.
pub struct Emitter<E> {
    listeners: Arc<RwLock<Vec<Listener<E>>>>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Call every listener synchronously, in registration order.
    pub fn emit(&self, event: &E) {
        // Snapshot so a listener may register another one without deadlocking
        let listeners = self.listeners.read().clone();
        for listener in listeners.iter() {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<E> std::fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Events emitted by an upload item
#[derive(Debug, Clone)]
pub enum ItemEvent {
    /// Remote record created, the item now has an id
    Saved { id: String },

    /// A chunk of the payload was handed to the storage backend
    Progress(ProgressInfo),

    /// Item fully persisted
    End,
}

/// Events emitted by a stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An item was queued on the stream
    ItemAdded { item: LocalId, index: usize },

    /// Remote stream record created
    Saved { id: String },

    /// One item failed to save; the rest of the batch carries on
    ItemFailed {
        item: LocalId,
        index: usize,
        error: Arc<UploadError>,
    },

    /// Every queued item has settled
    End { saved: usize, failed: usize },
}
