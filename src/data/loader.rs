use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};

use super::dataset::Dataset;

/// Yields `ceil(len / batch_size)` batches; the last one may be short.
pub struct DataLoader<'a, D: Dataset> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    seed: Option<u64>,
    indices: Vec<usize>,
}

impl<'a, D: Dataset> DataLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize, shuffle: bool) -> Self {
        let indices: Vec<usize> = (0..dataset.len()).collect();
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            seed: None,
            indices,
        }
    }

    /// Makes shuffling reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn num_batches(&self) -> usize {
        self.indices.len().div_ceil(self.batch_size)
    }

    pub fn iter(&self) -> DataLoaderIterator<'a, D> {
        let mut indices = self.indices.clone();
        if self.shuffle {
            match self.seed {
                Some(seed) => indices.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => indices.shuffle(&mut thread_rng()),
            }
        }

        DataLoaderIterator {
            dataset: self.dataset,
            indices,
            batch_size: self.batch_size,
            current_idx: 0,
        }
    }
}

pub struct DataLoaderIterator<'a, D: Dataset> {
    dataset: &'a D,
    indices: Vec<usize>,
    batch_size: usize,
    current_idx: usize,
}

impl<'a, D: Dataset> Iterator for DataLoaderIterator<'a, D> {
    type Item = Vec<D::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.indices.len() {
            return None;
        }

        let end_idx = (self.current_idx + self.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.current_idx..end_idx];
        let batch: Vec<D::Item> = batch_indices.iter().map(|&i| self.dataset.get(i)).collect();

        self.current_idx += self.batch_size;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::ArrayDataset;

    fn dataset(n: usize) -> ArrayDataset {
        let features = (0..n).map(|i| vec![i as f32]).collect();
        let labels = (0..n).map(|_| vec![0.0]).collect();
        ArrayDataset::new(features, labels).unwrap()
    }

    #[test]
    fn last_batch_is_partial() {
        let ds = dataset(10);
        let loader = DataLoader::new(&ds, 4, false);
        let sizes: Vec<usize> = loader.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn seeded_shuffle_repeats() {
        let ds = dataset(16);
        let a: Vec<_> = DataLoader::new(&ds, 16, true).seed(3).iter().collect();
        let b: Vec<_> = DataLoader::new(&ds, 16, true).seed(3).iter().collect();
        assert_eq!(a, b);
    }
}
