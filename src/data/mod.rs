pub mod collate;
pub mod dataset;
pub mod loader;

pub use collate::collate;
pub use dataset::{ArrayDataset, Dataset, Sample};
pub use loader::DataLoader;
