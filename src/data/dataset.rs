use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::backend::Elm;
use crate::error::{Error, Result};

/// One `(features, labels)` pair, both flattened.
pub type Sample = (Vec<Elm>, Vec<Elm>);

pub trait Dataset {
    type Item;
    fn len(&self) -> usize;
    fn get(&self, index: usize) -> Self::Item;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory dataset of equally sized feature and label vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDataset {
    features: Vec<Vec<Elm>>,
    labels: Vec<Vec<Elm>>,
}

impl ArrayDataset {
    pub fn new(features: Vec<Vec<Elm>>, labels: Vec<Vec<Elm>>) -> Result<Self> {
        if features.len() != labels.len() {
            return Err(Error::Dataset(format!(
                "{} feature rows but {} label rows",
                features.len(),
                labels.len()
            )));
        }
        check_uniform(&features, "features")?;
        check_uniform(&labels, "labels")?;
        Ok(Self { features, labels })
    }

    /// One-hot encodes `classes` into `num_classes` columns.
    pub fn from_class_indices(
        features: Vec<Vec<Elm>>,
        classes: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        let labels = classes
            .iter()
            .map(|&class| {
                if class >= num_classes {
                    return Err(Error::Dataset(format!(
                        "class index {class} out of range for {num_classes} classes"
                    )));
                }
                let mut one_hot = vec![0.0; num_classes];
                one_hot[class] = 1.0;
                Ok(one_hot)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(features, labels)
    }

    pub fn feature_len(&self) -> usize {
        self.features.first().map_or(0, Vec::len)
    }

    pub fn label_len(&self) -> usize {
        self.labels.first().map_or(0, Vec::len)
    }

    /// Splits off the first `fraction` of the samples as the first half.
    pub fn split(&self, fraction: f64) -> Result<(Self, Self)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::Dataset(format!(
                "split fraction must be in [0, 1], got {fraction}"
            )));
        }
        let at = (self.len() as f64 * fraction).round() as usize;
        let (f_head, f_tail) = self.features.split_at(at);
        let (l_head, l_tail) = self.labels.split_at(at);
        Ok((
            Self {
                features: f_head.to_vec(),
                labels: l_head.to_vec(),
            },
            Self {
                features: f_tail.to_vec(),
                labels: l_tail.to_vec(),
            },
        ))
    }

    /// Copy with samples permuted deterministically by `seed`.
    pub fn shuffled(&self, seed: u64) -> Self {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));
        Self {
            features: indices.iter().map(|&i| self.features[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i].clone()).collect(),
        }
    }
}

impl Dataset for ArrayDataset {
    type Item = Sample;

    fn len(&self) -> usize {
        self.features.len()
    }

    fn get(&self, index: usize) -> Sample {
        (self.features[index].clone(), self.labels[index].clone())
    }
}

fn check_uniform(rows: &[Vec<Elm>], what: &str) -> Result<()> {
    if let Some(first) = rows.first() {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != first.len()) {
            return Err(Error::Dataset(format!(
                "{what} row {i} has {} values, expected {}",
                row.len(),
                first.len()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> ArrayDataset {
        let features = (0..10).map(|i| vec![i as Elm]).collect();
        let classes: Vec<usize> = (0..10).map(|i| i % 2).collect();
        ArrayDataset::from_class_indices(features, &classes, 2).unwrap()
    }

    #[test]
    fn one_hot_labels() {
        let ds = toy();
        assert_eq!(ds.get(3), (vec![3.0], vec![0.0, 1.0]));
        assert_eq!(ds.label_len(), 2);
    }

    #[test]
    fn split_keeps_order() {
        let (train, test) = toy().split(0.8).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        assert_eq!(test.get(0).0, vec![8.0]);
        assert!(toy().split(1.5).is_err());
    }

    #[test]
    fn shuffle_is_seeded() {
        let a = toy().shuffled(7);
        let b = toy().shuffled(7);
        assert_eq!(a, b);
        let mut seen: Vec<Elm> = (0..a.len()).map(|i| a.get(i).0[0]).collect();
        seen.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(seen, (0..10).map(|i| i as Elm).collect::<Vec<_>>());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = ArrayDataset::new(vec![vec![1.0], vec![1.0, 2.0]], vec![vec![0.0], vec![1.0]]);
        assert!(matches!(err, Err(Error::Dataset(_))));
        assert!(ArrayDataset::from_class_indices(vec![vec![1.0]], &[3], 2).is_err());
    }
}
