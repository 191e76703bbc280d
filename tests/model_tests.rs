use kgraph::backend::ndarray::NdArray;
use kgraph::backend::Backend;
use kgraph::data::ArrayDataset;
use kgraph::engine::activation::Activation;
use kgraph::engine::initializer::Initializer;
use kgraph::engine::layer::{
    Conv2D, Dense, Flatten, Input, Layer, MaxPool2D, SeparableConv2D,
};
use kgraph::engine::loss::Loss;
use kgraph::engine::metric::Metric;
use kgraph::engine::model::Sequential;
use kgraph::engine::optimizer::{Adam, Adamax, Optimizer, SGD};
use kgraph::engine::regularizer::Regularizer;
use kgraph::engine::shape::UNKNOWN_DIM;
use kgraph::Error;
use tempfile::TempDir;

/// Two well separated blobs in 2-D.
fn blobs() -> ArrayDataset {
    let mut features = Vec::new();
    let mut classes = Vec::new();
    for i in 0..40 {
        let t = i as f32 / 40.0;
        features.push(vec![1.0 + t, 1.0 - t]);
        classes.push(0);
        features.push(vec![-1.0 - t, -1.0 + t]);
        classes.push(1);
    }
    ArrayDataset::from_class_indices(features, &classes, 2).unwrap()
}

fn classifier(seed: u64) -> Sequential<NdArray> {
    Sequential::of(vec![
        Box::new(Input::new(&[2])),
        Box::new(
            Dense::<NdArray>::new(8)
                .activation(Activation::Tanh)
                .kernel_initializer(Initializer::glorot_uniform(Some(seed)))
                .bias_initializer(Initializer::Zeros),
        ),
        Box::new(
            Dense::<NdArray>::new(2)
                .activation(Activation::Linear)
                .kernel_initializer(Initializer::glorot_uniform(Some(seed + 1)))
                .bias_initializer(Initializer::Zeros),
        ),
    ])
    .unwrap()
}

#[test]
fn test_fit_then_evaluate() {
    let ds = blobs();
    let mut model = classifier(1);
    model
        .compile(
            Adam::new(0.05, 0.9, 0.999, 1e-7),
            Loss::SoftmaxCrossEntropyWithLogits,
            Metric::Accuracy,
        )
        .unwrap();

    let history = model.fit(&ds, 20, 16).unwrap();
    assert_eq!(history.epochs.len(), 20);
    let first = history.epochs[0].loss;
    let last = history.last().unwrap().loss;
    assert!(last < first, "loss went from {first} to {last}");

    let evaluation = model.evaluate(&ds, 32).unwrap();
    assert!(evaluation.metric > 0.95, "accuracy {}", evaluation.metric);

    let classes = model
        .predict_classes(&[vec![1.5, 0.5], vec![-1.5, -0.5]])
        .unwrap();
    assert_eq!(classes, vec![0, 1]);
}

#[test]
fn test_adamax_beta_power_carries_over_between_fits() {
    let ds = blobs();
    let mut model = classifier(7);
    model
        .compile(Adamax::default(), Loss::default(), Metric::default())
        .unwrap();

    // 80 samples: 2 epochs of ceil(80 / 32) = 3 steps, then 1 epoch of 5 steps.
    model.fit(&ds, 2, 32).unwrap();
    model.fit(&ds, 1, 16).unwrap();
    let steps = 2 * 3 + 5;

    let power = model
        .optimizer()
        .unwrap()
        .slots()
        .global("beta1_power")
        .unwrap()
        .value()
        .unwrap();
    let expected = 0.9f32.powi(1 + steps);
    assert!(
        (NdArray::to_vec(&power)[0] - expected).abs() < 1e-5,
        "beta1_power {:?}, expected {expected}",
        NdArray::to_vec(&power)
    );
}

#[test]
fn test_evaluate_does_not_change_weights() {
    let ds = blobs();
    let mut model = classifier(2);
    model
        .compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    let before = model.export_weights().unwrap();
    model.evaluate(&ds, 10).unwrap();
    model.predict(&[vec![0.0, 0.0]]).unwrap();
    assert_eq!(model.export_weights().unwrap(), before);
}

#[test]
fn test_export_import_round_trip() {
    let ds = blobs();
    let mut trained = classifier(3);
    trained
        .compile(Adamax::default(), Loss::default(), Metric::default())
        .unwrap();
    trained.fit(&ds, 2, 20).unwrap();
    let document = trained.export_weights().unwrap();
    assert_eq!(document.layers.len(), 2);
    assert_eq!(document.layers[0].name, "dense_1");
    assert_eq!(document.layers[0].variables[0].name, "dense_1_dense_kernel");

    let mut fresh = classifier(99);
    fresh
        .compile(Adamax::default(), Loss::default(), Metric::default())
        .unwrap();
    fresh.import_weights(&document).unwrap();
    assert_eq!(fresh.export_weights().unwrap(), document);

    let samples = vec![vec![0.3, -0.7], vec![-2.0, 1.0]];
    assert_eq!(trained.predict(&samples).unwrap(), fresh.predict(&samples).unwrap());
}

#[test]
fn test_failed_import_leaves_model_untouched() {
    let mut model = classifier(4);
    model
        .compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    let before = model.export_weights().unwrap();

    // Valid first layer, bad second layer: nothing may be written.
    let mut document = before.clone();
    for v in document.layers[0].variables.iter_mut() {
        v.data.iter_mut().for_each(|x| *x = 0.0);
    }
    document.layers[1].variables[0].shape = vec![2, 8];
    assert!(matches!(
        model.import_weights(&document),
        Err(Error::ShapeMismatch { .. })
    ));
    assert_eq!(model.export_weights().unwrap(), before);

    let mut missing = before.clone();
    missing.layers.pop();
    assert!(matches!(
        model.import_weights(&missing),
        Err(Error::MissingWeight { .. })
    ));
}

#[test]
fn test_save_and_load_weights() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("model.json");

    let mut a = classifier(5);
    a.compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    a.save_weights(&path).unwrap();

    let mut b = classifier(6);
    b.compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    b.load_weights(&path).unwrap();
    assert_eq!(a.export_weights().unwrap(), b.export_weights().unwrap());
}

#[test]
fn test_frozen_layer_is_not_trained() {
    let ds = blobs();
    let mut model = Sequential::<NdArray>::of(vec![
        Box::new(Input::new(&[2])),
        Box::new(Dense::<NdArray>::new(4).with_name("frozen").trainable(false)),
        Box::new(Dense::<NdArray>::new(2).activation(Activation::Linear)),
    ])
    .unwrap();
    model
        .compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    let before = model.layer("frozen").unwrap().weights().unwrap();
    model.fit(&ds, 2, 8).unwrap();
    assert_eq!(model.layer("frozen").unwrap().weights().unwrap(), before);
    assert_eq!(model.trainable_variables().len(), 2);
}

#[test]
fn test_conv_model_shapes_and_training_step() {
    // 4x4 single-channel images: bright top half vs bright bottom half.
    let mut features = Vec::new();
    let mut classes = Vec::new();
    for i in 0..8 {
        let level = 0.5 + i as f32 / 16.0;
        let mut top = vec![0.0; 16];
        top[..8].iter_mut().for_each(|v| *v = level);
        let mut bottom = vec![0.0; 16];
        bottom[8..].iter_mut().for_each(|v| *v = level);
        features.push(top);
        classes.push(0);
        features.push(bottom);
        classes.push(1);
    }
    let ds = ArrayDataset::from_class_indices(features, &classes, 2).unwrap();

    let mut model = Sequential::<NdArray>::of(vec![
        Box::new(Input::new(&[4, 4, 1])),
        Box::new(
            Conv2D::<NdArray>::new(2)
                .kernel_initializer(Initializer::he_normal(Some(7)))
                .kernel_regularizer(Regularizer::L2(1e-4)),
        ),
        Box::new(
            SeparableConv2D::<NdArray>::new(3)
                .depthwise_initializer(Initializer::he_normal(Some(8)))
                .pointwise_initializer(Initializer::he_normal(Some(9))),
        ),
        Box::new(MaxPool2D::new()),
        Box::new(Flatten::new()),
        Box::new(Dense::<NdArray>::new(2).activation(Activation::Linear)),
    ])
    .unwrap();
    assert_eq!(
        model.output_shapes().unwrap(),
        vec![
            vec![UNKNOWN_DIM, 4, 4, 1],
            vec![UNKNOWN_DIM, 4, 4, 2],
            vec![UNKNOWN_DIM, 4, 4, 3],
            vec![UNKNOWN_DIM, 2, 2, 3],
            vec![UNKNOWN_DIM, 12],
            vec![UNKNOWN_DIM, 2],
        ]
    );

    model
        .compile(Adam::new(0.01, 0.9, 0.999, 1e-7), Loss::default(), Metric::Accuracy)
        .unwrap();
    // conv 2*9+2, separable 2*9+2*3+3, dense 12*2+2
    assert_eq!(model.param_count(), 20 + 27 + 26);
    let history = model.fit(&ds, 3, 5).unwrap();
    assert!(history.epochs.iter().all(|e| e.loss.is_finite()));

    let summary = model.summary().unwrap();
    assert!(summary.contains("separableconv2d_2"));
    assert!(summary.contains("Total params: 73"));
}

#[test]
fn test_empty_dataset_fit_is_a_no_op() {
    let mut model = classifier(8);
    model
        .compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    let empty = ArrayDataset::new(Vec::new(), Vec::new()).unwrap();
    let history = model.fit(&empty, 3, 4).unwrap();
    assert!(history.epochs.is_empty());
    assert!(matches!(model.fit(&blobs(), 1, 0), Err(Error::InvalidConfig(_))));
}

#[test]
fn test_wrong_feature_width_is_a_dataset_error() {
    let mut model = classifier(9);
    model
        .compile(SGD::new(0.1), Loss::default(), Metric::default())
        .unwrap();
    assert!(matches!(
        model.predict(&[vec![1.0, 2.0, 3.0]]),
        Err(Error::Dataset(_))
    ));
    let layer: &dyn Layer<NdArray> = model.layer("dense_2").unwrap();
    assert_eq!(layer.kind(), "Dense");
    assert!(matches!(model.layer("nope"), Err(Error::UnknownLayer(_))));
}
