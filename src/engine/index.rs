// ── Dialogue Index ─────────────────────────────────────────────────────────
// Flat squared-L2 nearest-neighbor index over dialogue embeddings, plus the
// parallel metadata list that maps an index position back to its record.
//
// The vector arena and the metadata list live behind ONE lock and are only
// ever mutated together, so a reader can never observe a vector without its
// record (or vice versa) — index position is the join key and stays valid
// for the life of the index. Entries are append-only; there is no
// delete-by-position, a changed corpus means a rebuild.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::DialogueRecord;
use log::info;
use parking_lot::RwLock;

struct IndexInner {
    /// Embedding dimension, fixed by the first vector to arrive.
    dim: Option<usize>,
    /// Row-major arena: entry i occupies `vectors[i*dim .. (i+1)*dim]`.
    vectors: Vec<f32>,
    /// Parallel metadata — `records[i]` belongs to arena row i.
    records: Vec<DialogueRecord>,
}

/// Nearest-neighbor index over the dialogue corpus. Cheap to share
/// (`Arc<DialogueIndex>`); `build`/`add` are single-writer, `search` and
/// `record_at` take the read lock.
pub struct DialogueIndex {
    inner: RwLock<IndexInner>,
}

impl Default for DialogueIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueIndex {
    pub fn new() -> Self {
        DialogueIndex {
            inner: RwLock::new(IndexInner { dim: None, vectors: Vec::new(), records: Vec::new() }),
        }
    }

    /// Replace the index wholesale with a freshly embedded corpus.
    /// An empty iterator yields an empty (but valid) index.
    pub fn build(
        &self,
        entries: impl IntoIterator<Item = (Vec<f32>, DialogueRecord)>,
    ) -> EngineResult<()> {
        let mut fresh = IndexInner { dim: None, vectors: Vec::new(), records: Vec::new() };
        for (vector, record) in entries {
            Self::push(&mut fresh, vector, record)?;
        }
        let count = fresh.records.len();
        *self.inner.write() = fresh;
        info!("[index] Built dialogue index with {} entries", count);
        Ok(())
    }

    /// Append one entry. The vector and its record become visible atomically.
    pub fn add(&self, vector: Vec<f32>, record: DialogueRecord) -> EngineResult<()> {
        let mut inner = self.inner.write();
        Self::push(&mut inner, vector, record)
    }

    fn push(inner: &mut IndexInner, vector: Vec<f32>, record: DialogueRecord) -> EngineResult<()> {
        if vector.is_empty() {
            return Err(EngineError::consistency("refusing to index an empty vector"));
        }
        match inner.dim {
            None => inner.dim = Some(vector.len()),
            Some(dim) if dim != vector.len() => {
                return Err(EngineError::consistency(format!(
                    "vector dimension {} does not match index dimension {}",
                    vector.len(),
                    dim
                )));
            }
            Some(_) => {}
        }
        inner.vectors.extend_from_slice(&vector);
        inner.records.push(record);
        Ok(())
    }

    /// The k nearest entries to `query` by squared L2 distance, ascending.
    /// An empty index returns an empty vec — "no index available" is the
    /// policy's call, not an error here. A query of the wrong dimension is
    /// an internal-consistency error.
    pub fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(usize, f32)>> {
        let inner = self.inner.read();
        let Some(dim) = inner.dim else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(EngineError::consistency(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dim
            )));
        }
        if k == 0 || inner.records.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = inner
            .vectors
            .chunks_exact(dim)
            .enumerate()
            .map(|(pos, row)| (pos, squared_l2(query, row)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Resolve an index position back to its dialogue record.
    /// `None` means the position is out of range — the caller treats that
    /// defensively as a miss, never a panic.
    pub fn record_at(&self, position: usize) -> Option<DialogueRecord> {
        self.inner.read().records.get(position).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

/// Squared Euclidean distance. No sqrt — ordering is what matters and the
/// cutoff config is expressed in squared units.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}
