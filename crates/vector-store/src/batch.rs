//! Uploading many vectors with a bounded number of requests in flight.

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use futures_util::{StreamExt, stream};

use crate::{Error, Vector, VectorStore};

/// How a failed batch is retried.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRetry {
    /// Maximum number of attempts per batch, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
}

impl Default for BatchRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(4),
            max_interval: Duration::from_secs(10),
        }
    }
}

/// Options of [`upsert_batched`].
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOptions {
    /// Maximum number of vectors per upsert call.
    pub batch_size: usize,
    /// Maximum number of upsert calls in flight.
    pub workers: usize,
    /// Retry policy applied to each batch separately.
    pub retry: BatchRetry,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers: 5,
            retry: BatchRetry::default(),
        }
    }
}

/// Outcome of a fully successful [`upsert_batched`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of batches sent.
    pub batches: usize,
    /// Number of vectors the store reported as written.
    pub upserted: usize,
}

/// Returned by [`upsert_batched`] when some batches could not be written.
///
/// Batches not listed here were written.
#[derive(Debug)]
pub struct BatchUpsertError {
    total_batches: usize,
    failed: Vec<(usize, Error)>,
}

impl BatchUpsertError {
    /// Returns the indices of the failed batches, in ascending order.
    pub fn failed_batches(&self) -> impl Iterator<Item = usize> + '_ {
        self.failed.iter().map(|(index, _)| *index)
    }

    /// Returns the failed batches with the last error of each.
    #[inline]
    pub fn failures(&self) -> &[(usize, Error)] {
        &self.failed
    }

    /// Returns the number of batches the input was split into.
    #[inline]
    pub fn total_batches(&self) -> usize {
        self.total_batches
    }
}

impl Display for BatchUpsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} batches failed",
            self.failed.len(),
            self.total_batches
        )?;
        if let Some((index, err)) = self.failed.first() {
            write!(f, ", first was batch {index}: {err}")?;
        }
        Ok(())
    }
}

impl StdError for BatchUpsertError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failed
            .first()
            .map(|(_, err)| err as &(dyn StdError + 'static))
    }
}

/// Upserts `vectors` into `namespace` in batches.
///
/// The input is split into consecutive batches of at most `batch_size`
/// vectors, and at most `workers` of them are in flight at a time. Each
/// batch is retried on its own when the store reports a retryable error.
/// The call returns once every batch has either been written or run out
/// of attempts.
///
/// A `batch_size` or `workers` of zero is treated as one.
pub async fn upsert_batched<S>(
    store: &S,
    namespace: &str,
    vectors: Vec<Vector>,
    options: &BatchOptions,
) -> Result<BatchReport, BatchUpsertError>
where
    S: VectorStore + ?Sized,
{
    let batch_size = options.batch_size.max(1);
    let workers = options.workers.max(1);

    let mut batches = Vec::with_capacity(vectors.len().div_ceil(batch_size));
    let mut rest = vectors.into_iter().peekable();
    while rest.peek().is_some() {
        batches.push(rest.by_ref().take(batch_size).collect::<Vec<_>>());
    }
    let total_batches = batches.len();
    debug!(namespace, total_batches, batch_size, workers, "upserting in batches");

    let mut results = stream::iter(batches.iter().enumerate())
        .map(|(index, batch)| async move {
            let result =
                upsert_with_retry(store, namespace, batch, &options.retry).await;
            (index, result)
        })
        .buffer_unordered(workers)
        .collect::<Vec<_>>()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let mut upserted = 0;
    let mut failed = vec![];
    for (index, result) in results {
        match result {
            Ok(count) => upserted += count,
            Err(err) => {
                warn!(namespace, batch = index, "batch upsert failed: {err}");
                failed.push((index, err));
            }
        }
    }

    if failed.is_empty() {
        Ok(BatchReport {
            batches: total_batches,
            upserted,
        })
    } else {
        Err(BatchUpsertError {
            total_batches,
            failed,
        })
    }
}

async fn upsert_with_retry<S>(
    store: &S,
    namespace: &str,
    batch: &[Vector],
    retry: &BatchRetry,
) -> Result<usize, Error>
where
    S: VectorStore + ?Sized,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(retry.initial_interval)
        .with_max_interval(retry.max_interval)
        .with_max_elapsed_time(None)
        .build();
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    let operation = || {
        attempt += 1;
        let is_last = attempt >= max_attempts;
        async move {
            store.upsert(namespace, batch).await.map_err(|err| {
                if is_last || !err.kind().is_retryable() {
                    return backoff::Error::permanent(err);
                }
                match err.retry_after() {
                    Some(delay) => backoff::Error::retry_after(err, delay),
                    None => backoff::Error::transient(err),
                }
            })
        }
    };
    let notify = |err: Error, delay: Duration| {
        debug!("batch upsert failed ({err}), retrying in {delay:?}");
    };
    backoff::future::retry_notify(backoff, operation, notify).await
}
