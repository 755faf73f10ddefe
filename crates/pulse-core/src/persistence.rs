//! Batching helpers shared by activity store implementations.
//!
//! Writes are issued as one multi-row statement per chunk of at most
//! [`UPSERT_CHUNK_SIZE`] rows. PostgreSQL refuses an `ON CONFLICT DO UPDATE`
//! that touches the same row twice, so each chunk is deduplicated on its
//! natural key first, keeping the last occurrence.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use crate::AppError;

/// Maximum rows per upsert statement.
pub const UPSERT_CHUNK_SIZE: usize = 500;

/// Result of a chunked upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows inserted or updated, as reported by the database.
    pub affected: u64,
    /// Statements issued.
    pub chunks: usize,
}

/// Runs `write_chunk` once per chunk of `records`, in order.
///
/// Stops at the first failing chunk. Chunks already written stay written.
pub async fn upsert_in_chunks<'a, T, F, Fut>(
    records: &'a [T],
    chunk_size: usize,
    mut write_chunk: F,
) -> Result<UpsertSummary, AppError>
where
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<u64, AppError>>,
{
    let mut summary = UpsertSummary::default();
    for chunk in records.chunks(chunk_size.max(1)) {
        summary.affected += write_chunk(chunk).await?;
        summary.chunks += 1;
    }
    Ok(summary)
}

/// Collapses records sharing a natural key, keeping the last occurrence at
/// the position of the first.
pub fn dedup_last_wins<'a, T, K, F>(records: &'a [T], key: F) -> Vec<&'a T>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<&'a T> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(&key(record)) {
            Some(&idx) => out[idx] = record,
            None => {
                positions.insert(key(record), out.len());
                out.push(record);
            }
        }
    }
    out
}
