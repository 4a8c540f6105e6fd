//! Flat L2 similarity index with explicit ids.
//!
//! Vectors are stored row-major; removal compacts the rows so the id list and
//! the vector table always stay parallel. Search is exact (exhaustive scan),
//! which is comfortably sub-second at the corpus sizes a local markdown
//! collection reaches.

use std::collections::HashSet;

use mdqa_core::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    /// 0 until the first vector is added.
    dim: usize,
    ids: Vec<u64>,
    /// Row-major, `ids.len() * dim` floats.
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from parallel id/vector tables (used by the on-disk loader).
    pub fn from_parts(dim: usize, ids: Vec<u64>, vectors: Vec<f32>) -> Result<Self> {
        if ids.len() * dim != vectors.len() {
            return Err(Error::Inconsistency(format!(
                "vector table holds {} floats for {} ids of dimension {dim}",
                vectors.len(),
                ids.len()
            )));
        }
        let unique: HashSet<&u64> = ids.iter().collect();
        if unique.len() != ids.len() {
            return Err(Error::Inconsistency("duplicate ids in vector table".into()));
        }
        Ok(Self { dim, ids, vectors })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Append vectors under the given ids.
    ///
    /// Preconditions: equal lengths, consistent dimension, and no id may
    /// already be present (or repeat within the call).
    pub fn add_with_ids(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Store(format!(
                "add_with_ids: {} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let dim = vectors[0].len();
        if dim == 0 {
            return Err(Error::Store("add_with_ids: zero-dimensional vector".into()));
        }
        if self.dim != 0 && dim != self.dim {
            return Err(Error::Store(format!(
                "add_with_ids: vector dimension {dim} does not match index dimension {}",
                self.dim
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::Store(format!(
                "add_with_ids: ragged vector of dimension {}",
                bad.len()
            )));
        }

        let existing: HashSet<u64> = self.ids.iter().copied().collect();
        let mut incoming = HashSet::with_capacity(ids.len());
        for id in ids {
            if existing.contains(id) || !incoming.insert(*id) {
                return Err(Error::Store(format!("add_with_ids: id {id} already present")));
            }
        }

        self.dim = dim;
        self.ids.extend_from_slice(ids);
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Remove the given ids, compacting the tables. Unknown ids are ignored,
    /// so repeated removal is a no-op. Returns how many rows were removed.
    pub fn remove_ids(&mut self, ids: &[u64]) -> usize {
        if ids.is_empty() || self.ids.is_empty() {
            return 0;
        }
        let doomed: HashSet<u64> = ids.iter().copied().collect();

        let mut kept_ids = Vec::with_capacity(self.ids.len());
        let mut kept_vectors = Vec::with_capacity(self.vectors.len());
        for (row, id) in self.ids.iter().enumerate() {
            if !doomed.contains(id) {
                kept_ids.push(*id);
                kept_vectors.extend_from_slice(&self.vectors[row * self.dim..(row + 1) * self.dim]);
            }
        }

        let removed = self.ids.len() - kept_ids.len();
        self.ids = kept_ids;
        self.vectors = kept_vectors;
        removed
    }

    /// Exhaustive k-nearest search by squared L2 distance, ascending; ties
    /// broken by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dim {
            return Err(Error::Store(format!(
                "search: query dimension {} does not match index dimension {}",
                query.len(),
                self.dim
            )));
        }

        let mut scored: Vec<(u64, f32)> = self
            .ids
            .iter()
            .enumerate()
            .map(|(row, &id)| {
                let base = row * self.dim;
                let dist = self.vectors[base..base + self.dim]
                    .iter()
                    .zip(query)
                    .map(|(a, b)| {
                        let d = a - b;
                        d * d
                    })
                    .sum::<f32>();
                (id, dist)
            })
            .collect();

        scored.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(rows: &[(u64, [f32; 2])]) -> VectorIndex {
        let mut index = VectorIndex::new();
        let ids: Vec<u64> = rows.iter().map(|(id, _)| *id).collect();
        let vectors: Vec<Vec<f32>> = rows.iter().map(|(_, v)| v.to_vec()).collect();
        index.add_with_ids(&ids, &vectors).unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index_with(&[(1, [0.0, 0.0]), (2, [1.0, 0.0]), (3, [3.0, 0.0])]);
        let hits = index.search(&[0.9, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 2);
        assert_eq!(hits[1].0, 1);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_search_ties_break_by_id() {
        let index = index_with(&[(9, [1.0, 0.0]), (3, [0.0, 1.0]), (5, [-1.0, 0.0])]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        // All three are equidistant; expect ascending id order.
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![3, 5, 9]);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut index = index_with(&[(1, [0.0, 0.0])]);
        let err = index.add_with_ids(&[1], &[vec![1.0, 1.0]]).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = index_with(&[(1, [0.0, 0.0])]);
        assert!(index.add_with_ids(&[2], &[vec![1.0, 1.0, 1.0]]).is_err());
        assert!(index.search(&[0.0], 1).is_err());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut index = index_with(&[(1, [0.0, 0.0]), (2, [1.0, 0.0]), (3, [2.0, 0.0])]);
        assert_eq!(index.remove_ids(&[2, 42]), 1);
        assert_eq!(index.remove_ids(&[2, 42]), 0);
        assert_eq!(index.len(), 2);

        // Remaining rows still searchable with correct data.
        let hits = index.search(&[2.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].0, 3);
        assert_eq!(hits[0].1, 0.0);
    }

    #[test]
    fn test_removed_then_readded_id_is_accepted() {
        let mut index = index_with(&[(1, [0.0, 0.0])]);
        index.remove_ids(&[1]);
        index.add_with_ids(&[1], &[vec![5.0, 5.0]]).unwrap();
        let hits = index.search(&[5.0, 5.0], 1).unwrap();
        assert_eq!(hits[0], (1, 0.0));
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new();
        assert!(index.search(&[1.0], 5).unwrap().is_empty());
    }
}
