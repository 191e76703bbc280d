use std::collections::BTreeMap;

use kgraph::backend::ndarray::NdArray;
use kgraph::backend::Backend;
use kgraph::engine::activation::Activation;
use kgraph::engine::initializer::Initializer;
use kgraph::engine::layer::{
    AvgPool2D, Conv2D, Dense, DepthwiseConv2D, Input, Layer, MaxPool2D, SeparableConv2D,
};
use kgraph::engine::model::Sequential;
use kgraph::engine::regularizer::Regularizer;
use kgraph::engine::shape::{Conv2dGeometry, Padding, UNKNOWN_DIM};
use kgraph::engine::Graph;
use kgraph::Error;

#[test]
fn test_dense_forward_shape() {
    let graph = Graph::<NdArray>::new();
    let mut layer = Dense::<NdArray>::new(2).with_name("fc");
    layer.build(&graph, &[UNKNOWN_DIM, 3]).unwrap();

    // Batch size 4, input features 3 -> [4, 2]
    let x = graph.placeholder(&[UNKNOWN_DIM, 3]);
    let y = layer.forward(&x).unwrap();
    let mut executor = graph.build(&[&y], &[]);
    let out = executor
        .run(&[(&x, NdArray::from_vec((1..=12).map(|v| v as f32).collect(), &[4, 3]).unwrap())])
        .unwrap();
    assert_eq!(NdArray::shape(&out[0]), vec![4, 2]);
}

#[test]
fn test_dense_initialization_stats() {
    // HeNormal draws from a normal truncated at 2 sigma; the variance stays near 2 / fan_in.
    let graph = Graph::<NdArray>::new();
    let mut layer = Dense::<NdArray>::new(100)
        .with_name("wide")
        .kernel_initializer(Initializer::he_normal(Some(42)));
    layer.build(&graph, &[UNKNOWN_DIM, 100]).unwrap();

    let weights = layer.weights().unwrap();
    let kernel = NdArray::to_vec(&weights["wide_dense_kernel"]);
    let n = kernel.len() as f32;
    let mean = kernel.iter().sum::<f32>() / n;
    let var = kernel.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    assert!(mean.abs() < 0.01, "mean {mean}");
    assert!((var - 0.02).abs() < 0.003, "variance {var}");
    let limit = 2.0 * (2.0f32 / 100.0).sqrt() / 0.879_625_7;
    assert!(kernel.iter().all(|v| v.abs() <= limit + 1e-6));
}

#[test]
fn test_separable_conv2d_shapes_and_params() {
    let graph = Graph::<NdArray>::new();
    let mut layer = SeparableConv2D::<NdArray>::new(4).with_name("sepconv");
    layer.build(&graph, &[UNKNOWN_DIM, 8, 8, 3]).unwrap();

    assert_eq!(layer.depthwise_shape(), Some(&[3, 3, 3, 1][..]));
    assert_eq!(layer.pointwise_shape(), Some(&[1, 1, 3, 4][..]));
    assert_eq!(layer.bias_shape(), Some(&[4][..]));
    assert_eq!(layer.param_count(), 27 + 12 + 4);
    assert_eq!(
        layer.compute_output_shape(&[UNKNOWN_DIM, 8, 8, 3]).unwrap(),
        vec![UNKNOWN_DIM, 8, 8, 4]
    );

    let names: Vec<String> = layer.variables().iter().map(|v| v.name.clone()).collect();
    assert_eq!(
        names,
        vec![
            "sepconv_depthwise_kernel",
            "sepconv_pointwise_kernel",
            "sepconv_separable_conv2d_bias"
        ]
    );
}

#[test]
fn test_separable_conv2d_with_depth_multiplier_and_strides() {
    let graph = Graph::<NdArray>::new();
    let mut layer = SeparableConv2D::<NdArray>::new(5)
        .with_name("sep")
        .depth_multiplier(2)
        .strides(&[1, 2, 2, 1])
        .padding(Padding::Valid)
        .use_bias(false);
    layer.build(&graph, &[UNKNOWN_DIM, 9, 9, 2]).unwrap();

    assert_eq!(layer.pointwise_shape(), Some(&[1, 1, 4, 5][..]));
    assert_eq!(layer.bias_shape(), None);

    let x = graph.placeholder(&[UNKNOWN_DIM, 9, 9, 2]);
    let y = layer.forward(&x).unwrap();
    assert_eq!(y.shape(), vec![UNKNOWN_DIM, 4, 4, 5]);
    let mut executor = graph.build(&[&y], &[]);
    let out = executor.run(&[(&x, NdArray::ones(&[3, 9, 9, 2]))]).unwrap();
    assert_eq!(NdArray::shape(&out[0]), vec![3, 4, 4, 5]);
}

#[test]
fn test_separable_conv2d_rejects_short_strides() {
    let layer = SeparableConv2D::<NdArray>::new(4).strides(&[2, 2]);
    assert!(matches!(
        Layer::<NdArray>::validate(&layer),
        Err(Error::InvalidArraySize { expected: 4, actual: 2, .. })
    ));
}

#[test]
fn test_duplicate_layer_names() {
    let result = Sequential::<NdArray>::of(vec![
        Box::new(Input::new(&[4])),
        Box::new(Dense::<NdArray>::new(3).with_name("hidden")),
        Box::new(Dense::<NdArray>::new(2).with_name("hidden")),
    ]);
    match result {
        Err(Error::RepeatableLayerName(name)) => assert_eq!(name, "hidden"),
        other => panic!("expected a naming conflict, got {other:?}"),
    }
}

#[test]
fn test_conv2d_gradients() {
    // 3x3 ones image, 2x2 ones kernel, VALID: each pixel's gradient counts the
    // windows covering it.
    let graph = Graph::<NdArray>::new();
    let x = graph.placeholder(&[UNKNOWN_DIM, 3, 3, 1]);
    let k = graph.variable("k", NdArray::ones(&[2, 2, 1, 1]), true).unwrap();
    let geo = Conv2dGeometry::new((3, 3), (2, 2), (1, 1), (1, 1), Padding::Valid);
    let y = x.clone().conv2d(k.clone(), geo);
    let grads = graph.gradients(&y.sum(None), &[x.clone(), k]);

    let mut executor = graph.build(&[&grads[0], &grads[1]], &[]);
    let out = executor.run(&[(&x, NdArray::ones(&[1, 3, 3, 1]))]).unwrap();
    assert_eq!(
        NdArray::to_vec(&out[0]),
        vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]
    );
    assert_eq!(NdArray::to_vec(&out[1]), vec![4.0; 4]);
}

#[test]
fn test_depthwise_conv2d_keeps_channels_separate() {
    let graph = Graph::<NdArray>::new();
    let mut layer = DepthwiseConv2D::<NdArray>::new()
        .with_name("dw")
        .kernel_size(&[1, 1])
        .activation(Activation::Linear)
        .use_bias(false);
    layer.build(&graph, &[UNKNOWN_DIM, 1, 1, 2]).unwrap();
    let mut weights = BTreeMap::new();
    weights.insert(
        "dw_depthwise_conv2d_kernel".to_string(),
        NdArray::from_vec(vec![2.0, 3.0], &[1, 1, 2, 1]).unwrap(),
    );
    layer.set_weights(&weights).unwrap();

    let x = graph.placeholder(&[UNKNOWN_DIM, 1, 1, 2]);
    let y = layer.forward(&x).unwrap();
    let mut executor = graph.build(&[&y], &[]);
    let out = executor
        .run(&[(&x, NdArray::from_vec(vec![1.0, 1.0], &[1, 1, 1, 2]).unwrap())])
        .unwrap();
    assert_eq!(NdArray::to_vec(&out[0]), vec![2.0, 3.0]);
}

#[test]
fn test_pooling_gradients() {
    let graph = Graph::<NdArray>::new();
    let mut max_pool = MaxPool2D::new().with_name("max");
    let mut avg_pool = AvgPool2D::new().with_name("avg");
    Layer::<NdArray>::build(&mut max_pool, &graph, &[UNKNOWN_DIM, 2, 2, 1]).unwrap();
    Layer::<NdArray>::build(&mut avg_pool, &graph, &[UNKNOWN_DIM, 2, 2, 1]).unwrap();

    let x = graph.placeholder(&[UNKNOWN_DIM, 2, 2, 1]);
    let m = max_pool.forward(&x).unwrap();
    let a = avg_pool.forward(&x).unwrap();
    let gm = graph.gradients(&m.clone().sum(None), &[x.clone()]).remove(0);
    let ga = graph.gradients(&a.clone().sum(None), &[x.clone()]).remove(0);

    let mut executor = graph.build(&[&m, &a, &gm, &ga], &[]);
    let out = executor
        .run(&[(&x, NdArray::from_vec(vec![1.0, 3.0, 2.0, 0.0], &[1, 2, 2, 1]).unwrap())])
        .unwrap();
    assert_eq!(NdArray::to_vec(&out[0]), vec![3.0]);
    assert!((NdArray::to_vec(&out[1])[0] - 1.5).abs() < 1e-6);
    assert_eq!(NdArray::to_vec(&out[2]), vec![0.0, 1.0, 0.0, 0.0]);
    assert_eq!(NdArray::to_vec(&out[3]), vec![0.25; 4]);
}

#[test]
fn test_conv2d_regularizer_penalty() {
    let graph = Graph::<NdArray>::new();
    let mut layer = Conv2D::<NdArray>::new(1)
        .with_name("conv")
        .kernel_size(&[1, 1])
        .kernel_initializer(Initializer::Constant(2.0))
        .kernel_regularizer(Regularizer::L2(0.5))
        .use_bias(false);
    layer.build(&graph, &[UNKNOWN_DIM, 4, 4, 1]).unwrap();

    let penalty = layer.variables()[0].penalty().unwrap();
    let mut executor = graph.build(&[&penalty], &[]);
    let out = executor.run(&[]).unwrap();
    // 0.5 * 2^2
    assert!((NdArray::to_vec(&out[0])[0] - 2.0).abs() < 1e-6);
}

#[test]
fn test_set_weights_checks_shapes_before_writing() {
    let graph = Graph::<NdArray>::new();
    let mut layer = Dense::<NdArray>::new(2).with_name("fc");
    layer.build(&graph, &[UNKNOWN_DIM, 2]).unwrap();
    let before = layer.weights().unwrap();

    let mut weights = BTreeMap::new();
    weights.insert("fc_dense_kernel".to_string(), NdArray::zeros(&[2, 2]));
    weights.insert("fc_dense_bias".to_string(), NdArray::zeros(&[3]));
    assert!(matches!(
        layer.set_weights(&weights),
        Err(Error::ShapeMismatch { .. })
    ));
    assert_eq!(layer.weights().unwrap(), before);
}
