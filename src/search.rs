use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

pub type BatchFuture<T> = Pin<Box<dyn Future<Output = Result<Vec<T>>> + Send>>;

/// Fetches one batch of results for `(offset, limit)` against a fixed
/// predicate. The closure captures the store handle and search key so the
/// page can be re-read from scratch at any time.
pub type BatchLoader<T> = Box<dyn Fn(i64, i64) -> BatchFuture<T> + Send + Sync>;

/// Internal page size ceiling; actual batches never exceed the requested
/// limit either.
pub const MAX_BATCH_SIZE: i64 = 100;

/// Stable external pagination cursor over a lazy, finite, restartable result
/// stream. `total_count` is computed once via a distinct count over the same
/// predicate the loader pages through, so draining the stream yields exactly
/// `min(limit, total_count - offset)` rows.
pub struct Pagination<T> {
    loader: BatchLoader<T>,
    pub current_offset: i64,
    pub total_count: i64,
    pub next_offset: Option<i64>,
    batch_size: i64,
    cursor: i64,
    end: i64,
}

impl<T> Pagination<T> {
    pub fn new(total_count: i64, offset: i64, limit: i64, loader: BatchLoader<T>) -> Self {
        let next_offset = if offset + limit >= total_count {
            None
        } else {
            Some(offset + limit)
        };
        Self {
            loader,
            current_offset: offset,
            total_count,
            next_offset,
            batch_size: limit.clamp(1, MAX_BATCH_SIZE),
            cursor: offset,
            end: (offset + limit).min(total_count).max(offset),
        }
    }

    /// Pulls the next bounded batch, or `None` once the page is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<T>>> {
        if self.cursor >= self.end {
            return Ok(None);
        }
        let limit = self.batch_size.min(self.end - self.cursor);
        let batch = (self.loader)(self.cursor, limit).await?;
        if batch.is_empty() {
            // Backing rows shrank under us; stop rather than spin.
            self.cursor = self.end;
            return Ok(None);
        }
        self.cursor += batch.len() as i64;
        Ok(Some(batch))
    }

    /// Resets the stream to the page start; the next `next_batch` call
    /// re-reads from the backing store.
    pub fn rewind(&mut self) {
        self.cursor = self.current_offset;
    }

    /// Drains the remaining batches into one vector. Memory stays bounded at
    /// the page size, which callers chose via `limit`.
    pub async fn drain(&mut self) -> Result<Vec<T>> {
        let mut all = Vec::new();
        while let Some(mut batch) = self.next_batch().await? {
            all.append(&mut batch);
        }
        Ok(all)
    }
}
