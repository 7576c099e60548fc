use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use crate::core::{Emitter, ItemEvent, ProgressInfo, Result};

/// Gate for progress snapshots sent upstream.
///
/// A snapshot passes only when `interval` has elapsed since the last one and
/// the previous snapshot request has completed. Anything else is dropped.
pub struct SnapshotThrottle {
    interval: Duration,
    last_sent: Mutex<Instant>,
    in_flight: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<f64>,
}

/// Receiving end of a [`SnapshotThrottle`]
pub struct SnapshotReceiver {
    rx: mpsc::UnboundedReceiver<f64>,
    in_flight: Arc<AtomicBool>,
}

pub fn snapshot_channel(interval: Duration) -> (SnapshotThrottle, SnapshotReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let in_flight = Arc::new(AtomicBool::new(false));

    let throttle = SnapshotThrottle {
        interval,
        last_sent: Mutex::new(Instant::now()),
        in_flight: in_flight.clone(),
        tx,
    };

    (throttle, SnapshotReceiver { rx, in_flight })
}

impl SnapshotThrottle {
    /// Returns whether the snapshot was forwarded.
    pub fn offer(&self, percent: f64) -> bool {
        let now = Instant::now();
        let mut last_sent = self.last_sent.lock();
        if now.duration_since(*last_sent) < self.interval {
            return false;
        }

        // Previous snapshot still outstanding
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        if self.tx.send(percent).is_err() {
            self.in_flight.store(false, Ordering::SeqCst);
            return false;
        }

        *last_sent = now;
        true
    }
}

impl SnapshotReceiver {
    pub async fn recv(&mut self) -> Option<f64> {
        self.rx.recv().await
    }

    /// Mark the current snapshot as finished so the next one may pass.
    pub fn settle(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Publish snapshots until the throttle is dropped or `done` is cancelled.
/// A snapshot already being published is finished first. Failures are logged
/// and otherwise ignored; a snapshot is a best-effort overwrite.
pub async fn report_snapshots<F, Fut>(mut snapshots: SnapshotReceiver, done: CancellationToken, mut publish: F)
where
    F: FnMut(f64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        let percent = tokio::select! {
            biased;
            _ = done.cancelled() => break,
            percent = snapshots.recv() => match percent {
                Some(percent) => percent,
                None => break,
            },
        };

        debug!(percent, "progress snapshot");
        if let Err(err) = publish(percent).await {
            warn!(%err, "progress snapshot failed");
        }
        snapshots.settle();
    }
}

/// Byte accounting for one transfer
pub struct ProgressTracker {
    total: u64,
    sent: AtomicU64,
    events: Emitter<ItemEvent>,
    throttle: Option<SnapshotThrottle>,
}

impl ProgressTracker {
    pub fn new(total: u64, events: Emitter<ItemEvent>) -> Self {
        Self {
            total,
            sent: AtomicU64::new(0),
            events,
            throttle: None,
        }
    }

    pub fn with_snapshots(mut self, throttle: SnapshotThrottle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Count a chunk, notify listeners and maybe queue a snapshot.
    pub fn record_bytes(&self, bytes: u64) -> ProgressInfo {
        let sent = self.sent.fetch_add(bytes, Ordering::SeqCst) + bytes;
        let info = ProgressInfo::new(sent, self.total);

        self.events.emit(&ItemEvent::Progress(info));

        if let Some(throttle) = &self.throttle {
            throttle.offer(info.percent);
        }

        info
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

pin_project! {
    /// Byte stream that reports every chunk it yields
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        tracker: Arc<ProgressTracker>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, tracker: Arc<ProgressTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    this.tracker.record_bytes(chunk.len() as u64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;

    fn collect_progress(events: &Emitter<ItemEvent>) -> Arc<Mutex<Vec<ProgressInfo>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        events.on(move |event| {
            if let ItemEvent::Progress(info) = event {
                sink.lock().push(*info);
            }
        });
        seen
    }

    #[tokio::test]
    async fn test_single_chunk_transfer() {
        let events = Emitter::new();
        let seen = collect_progress(&events);
        let payload = Bytes::from(vec![7u8; 4096]);

        let tracker = Arc::new(ProgressTracker::new(4096, events));
        let body = ProgressStream::new(stream::iter(vec![Ok(payload)]), tracker.clone());
        let chunks: Vec<_> = body.collect().await;

        assert_eq!(chunks.len(), 1);
        let seen = seen.lock();
        let last = seen.last().unwrap();
        assert_eq!(last.sent, last.total);
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.remaining, 0);
        assert_eq!(tracker.sent(), 4096);
    }

    #[tokio::test]
    async fn test_every_chunk_reported_in_order() {
        let events = Emitter::new();
        let seen = collect_progress(&events);
        let chunks = (0..5).map(|_| Ok(Bytes::from(vec![0u8; 10])));

        let tracker = Arc::new(ProgressTracker::new(50, events));
        let _: Vec<_> = ProgressStream::new(stream::iter(chunks), tracker).collect().await;

        let sent: Vec<u64> = seen.lock().iter().map(|info| info.sent).collect();
        assert_eq!(sent, vec![10, 20, 30, 40, 50]);
        assert!(sent.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn test_errors_pass_through_uncounted() {
        let events = Emitter::new();
        let seen = collect_progress(&events);
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk")),
        ];

        let tracker = Arc::new(ProgressTracker::new(6, events));
        let out: Vec<_> = ProgressStream::new(stream::iter(chunks), tracker.clone()).collect().await;

        assert!(out[1].is_err());
        assert_eq!(tracker.sent(), 3);
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_interval_and_in_flight() {
        let (throttle, mut receiver) = snapshot_channel(Duration::from_millis(200));

        // too soon after start
        assert!(!throttle.offer(1.0));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(throttle.offer(10.0));
        assert_eq!(receiver.recv().await, Some(10.0));

        // interval elapsed, but the first snapshot never settled
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(!throttle.offer(20.0));

        receiver.settle();
        assert!(throttle.offer(30.0));
        assert_eq!(receiver.recv().await, Some(30.0));

        // interval again
        receiver.settle();
        assert!(!throttle.offer(40.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_snapshots_until_closed() {
        let (throttle, receiver) = snapshot_channel(Duration::from_millis(100));
        let published = Arc::new(AtomicUsize::new(0));

        let counter = published.clone();
        let reporter = tokio::spawn(report_snapshots(receiver, CancellationToken::new(), move |_percent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(crate::core::UploadError::api_error(500, "ignored"))
            }
        }));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(throttle.offer(50.0));
        drop(throttle);

        reporter.await.unwrap();
        assert_eq!(published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_snapshots_stops_when_done() {
        let (throttle, receiver) = snapshot_channel(Duration::from_millis(100));
        let done = CancellationToken::new();
        done.cancel();

        // throttle still alive, cancellation alone ends the reporter
        report_snapshots(receiver, done, |_| async { Ok(()) }).await;
        drop(throttle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_forwards_snapshots() {
        let (throttle, mut receiver) = snapshot_channel(Duration::from_millis(100));
        let tracker = ProgressTracker::new(100, Emitter::new()).with_snapshots(throttle);

        tracker.record_bytes(10);
        tokio::time::advance(Duration::from_millis(100)).await;
        tracker.record_bytes(40);
        tracker.record_bytes(50);
        drop(tracker);

        assert_eq!(receiver.recv().await, Some(50.0));
        assert_eq!(receiver.recv().await, None);
    }
}
