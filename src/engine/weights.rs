use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Elm};
use crate::error::Result;

/// Values of one variable, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableWeights {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<Elm>,
}

impl VariableWeights {
    pub fn from_tensor<B: Backend>(name: &str, tensor: &B::Tensor) -> Self {
        Self {
            name: name.to_string(),
            shape: B::shape(tensor),
            data: B::to_vec(tensor),
        }
    }

    /// Fails when `data` does not fill `shape`.
    pub fn to_tensor<B: Backend>(&self) -> Result<B::Tensor> {
        B::from_vec(self.data.clone(), &self.shape)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub name: String,
    pub variables: Vec<VariableWeights>,
}

/// Every variable of a model, grouped by layer in model order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsDocument {
    pub layers: Vec<LayerWeights>,
}

impl WeightsDocument {
    pub fn layer(&self, name: &str) -> Option<&LayerWeights> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;
    use crate::error::Error;
    use tempfile::TempDir;

    fn document() -> WeightsDocument {
        WeightsDocument {
            layers: vec![LayerWeights {
                name: "dense_1".to_string(),
                variables: vec![VariableWeights {
                    name: "dense_1_dense_bias".to_string(),
                    shape: vec![2],
                    data: vec![0.5, -0.5],
                }],
            }],
        }
    }

    #[test]
    fn file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("weights.json");
        document().save_to_file(&path).unwrap();
        assert_eq!(WeightsDocument::load_from_file(&path).unwrap(), document());
    }

    #[test]
    fn short_data_is_rejected() {
        let v = VariableWeights {
            name: "w".to_string(),
            shape: vec![2, 2],
            data: vec![1.0; 3],
        };
        assert!(v.to_tensor::<NdArray>().is_err());
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        assert!(matches!(
            WeightsDocument::from_json("{\"layers\": 3}"),
            Err(Error::Json(_))
        ));
    }
}
