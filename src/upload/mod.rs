mod item;
mod probe;
mod progress;
mod stream;

pub use item::{Item, ItemOptions, ThumbCallback, ThumbStatus};
pub use probe::{FileProbe, media_type, raster_format};
pub use progress::{ProgressStream, ProgressTracker, SnapshotReceiver, SnapshotThrottle, report_snapshots, snapshot_channel};
pub use stream::{ItemsOutcome, Stream};
