use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use futures::stream::{self, StreamExt};
use tracing::debug;

/// Runs independent operations with a ceiling on how many are in flight.
///
/// Operations start in submission order as slots free up. A failure never
/// cancels the rest: every operation is attempted and the outcome is only
/// returned once all of them have settled.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn run<I, Fut, T, E>(&self, operations: I) -> BatchOutcome<T, E>
    where
        I: IntoIterator<Item = Fut>,
        Fut: Future<Output = Result<T, E>>,
    {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let (in_flight, peak_ref) = (&in_flight, &peak);

        let tracked = operations
            .into_iter()
            .enumerate()
            .map(move |(index, operation)| async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak_ref.fetch_max(now, Ordering::SeqCst);
                let result = operation.await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                (index, result)
            });

        // Collected in completion order
        let mut settled: Vec<(usize, Result<T, E>)> = stream::iter(tracked)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let last_error = settled
            .iter()
            .rev()
            .find(|(_, result)| result.is_err())
            .map(|(index, _)| *index);

        settled.sort_by_key(|(index, _)| *index);
        let results: Vec<Result<T, E>> = settled.into_iter().map(|(_, result)| result).collect();

        let outcome = BatchOutcome {
            results,
            last_error,
            peak_in_flight: peak.load(Ordering::SeqCst),
        };

        debug!(
            total = outcome.len(),
            failed = outcome.failed(),
            peak = outcome.peak_in_flight,
            "batch settled"
        );

        outcome
    }
}

/// Settled results of one batch, in submission order
#[derive(Debug)]
pub struct BatchOutcome<T, E> {
    results: Vec<Result<T, E>>,
    last_error: Option<usize>,
    peak_in_flight: usize,
}

impl<T, E> BatchOutcome<T, E> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.last_error.is_none()
    }

    /// Failures with their submission index
    pub fn errors(&self) -> impl Iterator<Item = (usize, &E)> {
        self.results
            .iter()
            .enumerate()
            .filter_map(|(index, result)| result.as_ref().err().map(|err| (index, err)))
    }

    /// The failure that settled last
    pub fn last_error(&self) -> Option<&E> {
        self.last_error
            .and_then(|index| self.results.get(index))
            .and_then(|result| result.as_ref().err())
    }

    /// Highest number of operations observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight
    }

    pub fn results(&self) -> &[Result<T, E>] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Result<T, E>> {
        self.results
    }
}
