mod batch;
mod errors;
mod events;
mod traits;
mod types;

pub use batch::{BatchExecutor, BatchOutcome};
pub use errors::{ErrorKind, Result, UploadError};
pub use events::{Emitter, ItemEvent, Listener, StreamEvent};
pub use traits::{BlobSink, ByteStream, Transport};
pub use types::{
    Dimensions,
    ItemPatch,
    ItemRecord,
    ItemState,
    LocalId,
    PayloadSource,
    ProgressInfo,
    StreamPatch,
    StreamQuery,
    StreamRecord,
    ThumbRecord,
    UploadDescriptor,
};
pub(crate) use types::{CreateFileBody, CreateLinkBody, CreatedItem, deserialize_timestamp, keyed_record};
