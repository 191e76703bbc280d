//! Keras-style neural networks on an explicit computation graph.
//!
//! Layers, losses and optimizers only append nodes to a [`engine::Graph`];
//! numbers are produced by compiling the graph into an
//! [`engine::executor::Executor`] and running it on a [`backend::Backend`].

pub mod backend;
pub mod data;
pub mod engine;
pub mod error;

pub use error::{Error, Result};
