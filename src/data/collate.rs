use crate::backend::{Backend, Elm};
use crate::data::dataset::Sample;
use crate::error::{Error, Result};

/// Stacks a batch into `[n, feature_dims..]` features and `[n, label_len]` labels.
pub fn collate<B: Backend>(
    batch: Vec<Sample>,
    feature_dims: &[usize],
    label_len: usize,
) -> Result<(B::Tensor, B::Tensor)> {
    let batch_size = batch.len();
    let feature_len: usize = feature_dims.iter().product();
    let mut features: Vec<Elm> = Vec::with_capacity(batch_size * feature_len);
    let mut labels: Vec<Elm> = Vec::with_capacity(batch_size * label_len);

    for (i, (x, y)) in batch.into_iter().enumerate() {
        if x.len() != feature_len {
            return Err(Error::Dataset(format!(
                "sample {i} has {} features, model input expects {feature_len} ({feature_dims:?})",
                x.len()
            )));
        }
        if y.len() != label_len {
            return Err(Error::Dataset(format!(
                "sample {i} has {} label values, model output has {label_len}",
                y.len()
            )));
        }
        features.extend(x);
        labels.extend(y);
    }

    let mut x_shape = vec![batch_size];
    x_shape.extend_from_slice(feature_dims);
    Ok((
        B::from_vec(features, &x_shape)?,
        B::from_vec(labels, &[batch_size, label_len])?,
    ))
}

/// Features only, for prediction.
pub fn collate_features<B: Backend>(rows: &[Vec<Elm>], feature_dims: &[usize]) -> Result<B::Tensor> {
    let feature_len: usize = feature_dims.iter().product();
    let mut features = Vec::with_capacity(rows.len() * feature_len);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != feature_len {
            return Err(Error::Dataset(format!(
                "row {i} has {} features, model input expects {feature_len}",
                row.len()
            )));
        }
        features.extend_from_slice(row);
    }
    let mut shape = vec![rows.len()];
    shape.extend_from_slice(feature_dims);
    B::from_vec(features, &shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn stacks_into_batch_tensors() {
        let batch = vec![
            (vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 0.0]),
            (vec![5.0, 6.0, 7.0, 8.0], vec![0.0, 1.0]),
        ];
        let (x, y) = collate::<NdArray>(batch, &[2, 2, 1], 2).unwrap();
        assert_eq!(NdArray::shape(&x), vec![2, 2, 2, 1]);
        assert_eq!(NdArray::shape(&y), vec![2, 2]);
        assert_eq!(NdArray::to_vec(&y), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn wrong_feature_count_is_an_error() {
        let batch = vec![(vec![1.0], vec![1.0])];
        assert!(matches!(
            collate::<NdArray>(batch, &[2], 1),
            Err(Error::Dataset(_))
        ));
    }
}
