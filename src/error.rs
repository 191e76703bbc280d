use thiserror::Error;

/// Errors raised while assembling, compiling or running a model.
#[derive(Debug, Error)]
pub enum Error {
    #[error("The layer name {0} is used in previous layers. The layer name should be unique.")]
    RepeatableLayerName(String),

    #[error("{name} should have {expected} elements, but has {actual}")]
    InvalidArraySize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("layer {0} is not built; call build() before forward()")]
    LayerNotBuilt(String),

    #[error("layer {0} is already built")]
    LayerAlreadyBuilt(String),

    #[error("layer {layer} expects an input of rank {expected}, got shape {actual:?}")]
    IncompatibleRank {
        layer: String,
        expected: usize,
        actual: Vec<usize>,
    },

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("variable {0} is already defined in this graph")]
    DuplicateVariable(String),

    #[error("slots of optimizer {0} are not created; call create_slots() first")]
    SlotsNotCreated(&'static str),

    #[error("slots of optimizer {0} are already created")]
    SlotsAlreadyCreated(&'static str),

    #[error("no slot {slot} for variable {variable}")]
    MissingSlot { variable: String, slot: String },

    #[error("got {gradients} gradients for {variables} variables")]
    GradientCountMismatch { variables: usize, gradients: usize },

    #[error("model is not compiled")]
    NotCompiled,

    #[error("model is already compiled")]
    AlreadyCompiled,

    #[error("the first layer of a Sequential model must be an Input layer")]
    MissingInputLayer,

    #[error("no layer named {0}")]
    UnknownLayer(String),

    #[error("weights for variable {variable} of layer {layer} are missing")]
    MissingWeight { layer: String, variable: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
