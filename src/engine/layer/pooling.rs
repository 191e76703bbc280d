use crate::backend::Backend;
use crate::engine::layer::{
    require_array_size, require_built_shape, require_positive, require_rank, window_geometry,
    window_output_size, Layer,
};
use crate::engine::shape::{Conv2dGeometry, Padding};
use crate::engine::tensor::Tensor;
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Window configuration shared by the pooling layers.
#[derive(Debug, Clone)]
struct Pool {
    name: String,
    pool_size: Vec<usize>,
    strides: Vec<usize>,
    padding: Padding,
    input_shape: Option<Vec<usize>>,
    geometry: Option<Conv2dGeometry>,
}

impl Pool {
    fn new() -> Self {
        Self {
            name: String::new(),
            pool_size: vec![1, 2, 2, 1],
            strides: vec![1, 2, 2, 1],
            padding: Padding::Valid,
            input_shape: None,
            geometry: None,
        }
    }

    fn validate(&self) -> Result<()> {
        require_array_size(&self.pool_size, 4, "poolSize")?;
        require_array_size(&self.strides, 4, "strides")?;
        require_positive(&self.pool_size, "poolSize")?;
        require_positive(&self.strides, "strides")?;
        if self.pool_size[0] != 1 || self.pool_size[3] != 1 {
            return Err(Error::InvalidConfig(format!(
                "pooling layer {} only pools over height and width, got poolSize {:?}",
                self.name, self.pool_size
            )));
        }
        Ok(())
    }

    fn build(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.input_shape.is_some() {
            return Err(Error::LayerAlreadyBuilt(self.name.clone()));
        }
        self.output_shape(input_shape)?;
        self.geometry = Some(window_geometry(
            input_shape,
            &self.pool_size[1..3],
            &self.strides,
            &[1, 1, 1, 1],
            self.padding,
        ));
        self.input_shape = Some(input_shape.to_vec());
        Ok(())
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        self.validate()?;
        require_rank(&self.name, input_shape, 4)?;
        let (rows, cols) = window_output_size(
            &self.name,
            input_shape,
            &self.pool_size[1..3],
            &self.strides,
            &[1, 1, 1, 1],
            self.padding,
        )?;
        Ok(vec![input_shape[0], rows, cols, input_shape[3]])
    }

    fn geometry_for(&self, input_shape: &[usize]) -> Result<Conv2dGeometry> {
        let (Some(built_shape), Some(geo)) = (&self.input_shape, self.geometry) else {
            return Err(Error::LayerNotBuilt(self.name.clone()));
        };
        require_built_shape(&self.name, built_shape, input_shape)?;
        Ok(geo)
    }
}

macro_rules! pooling_layer {
    ($layer:ident, $kind:literal, $op:ident) => {
        #[derive(Debug, Clone)]
        pub struct $layer {
            pool: Pool,
        }

        impl Default for $layer {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $layer {
            pub fn new() -> Self {
                Self { pool: Pool::new() }
            }

            pub fn with_name(mut self, name: &str) -> Self {
                self.pool.name = name.to_string();
                self
            }

            /// Window per NHWC axis; batch and channel entries must be 1.
            pub fn pool_size(mut self, pool_size: &[usize]) -> Self {
                self.pool.pool_size = pool_size.to_vec();
                self
            }

            pub fn strides(mut self, strides: &[usize]) -> Self {
                self.pool.strides = strides.to_vec();
                self
            }

            pub fn padding(mut self, padding: Padding) -> Self {
                self.pool.padding = padding;
                self
            }
        }

        impl<B: Backend> Layer<B> for $layer {
            fn name(&self) -> &str {
                &self.pool.name
            }

            fn set_name(&mut self, name: String) {
                self.pool.name = name;
            }

            fn kind(&self) -> &'static str {
                $kind
            }

            fn validate(&self) -> Result<()> {
                self.pool.validate()
            }

            fn build(&mut self, _graph: &Graph<B>, input_shape: &[usize]) -> Result<()> {
                self.pool.build(input_shape)
            }

            fn is_built(&self) -> bool {
                self.pool.input_shape.is_some()
            }

            fn compute_output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
                self.pool.output_shape(input_shape)
            }

            fn forward(&self, input: &Tensor<B>) -> Result<Tensor<B>> {
                let geo = self.pool.geometry_for(&input.shape())?;
                Ok(input.clone().$op(geo))
            }

            fn is_trainable(&self) -> bool {
                false
            }
        }
    };
}

pooling_layer!(MaxPool2D, "MaxPool2D", max_pool2d);
pooling_layer!(AvgPool2D, "AvgPool2D", avg_pool2d);
