use kgraph::backend::ndarray::NdArray;
use kgraph::backend::Backend;
use kgraph::engine::loss::Loss;
use kgraph::engine::shape::UNKNOWN_DIM;
use kgraph::engine::Graph;

#[test]
fn test_mse_loss() {
    let graph = Graph::<NdArray>::new();
    let pred = graph.placeholder(&[UNKNOWN_DIM, 2]);
    let target = graph.placeholder(&[UNKNOWN_DIM, 2]);
    let loss = Loss::MeanSquaredError.build(&pred, &target);
    let grad = graph.gradients(&loss, &[pred.clone()]).remove(0);

    let mut executor = graph.build(&[&loss, &grad], &[]);
    let out = executor
        .run(&[
            (&pred, NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap()),
            (&target, NdArray::from_vec(vec![1.0, 1.0, 1.0, 1.0], &[2, 2]).unwrap()),
        ])
        .unwrap();
    // (0 + 1 + 4 + 9) / 4
    assert!((NdArray::to_vec(&out[0])[0] - 3.5).abs() < 1e-6);
    // 2 * diff / 4
    let g = NdArray::to_vec(&out[1]);
    let expected = [0.0, 0.5, 1.0, 1.5];
    for (a, b) in g.iter().zip(expected) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn test_cross_entropy_gradient_is_softmax_minus_labels() {
    let graph = Graph::<NdArray>::new();
    let logits = graph.placeholder(&[UNKNOWN_DIM, 3]);
    let labels = graph.placeholder(&[UNKNOWN_DIM, 3]);
    let loss = Loss::SoftmaxCrossEntropyWithLogits.build(&logits, &labels);
    let grad = graph.gradients(&loss, &[logits.clone()]).remove(0);

    let mut executor = graph.build(&[&loss, &grad], &[]);
    let out = executor
        .run(&[
            (&logits, NdArray::from_vec(vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0], &[2, 3]).unwrap()),
            (&labels, NdArray::from_vec(vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0], &[2, 3]).unwrap()),
        ])
        .unwrap();

    let z: f32 = [1.0f32, 2.0, 3.0].iter().map(|v| v.exp()).sum();
    let p = [1.0f32.exp() / z, 2.0f32.exp() / z, 3.0f32.exp() / z];
    let expected_loss = (-(p[2].ln()) + 3f32.ln()) / 2.0;
    assert!((NdArray::to_vec(&out[0])[0] - expected_loss).abs() < 1e-5);

    let g = NdArray::to_vec(&out[1]);
    let expected = [
        p[0] / 2.0,
        p[1] / 2.0,
        (p[2] - 1.0) / 2.0,
        (1.0 / 3.0 - 1.0) / 2.0,
        (1.0 / 3.0) / 2.0,
        (1.0 / 3.0) / 2.0,
    ];
    for (a, b) in g.iter().zip(expected) {
        assert!((a - b).abs() < 1e-5, "{a} vs {b}");
    }
}

#[test]
fn test_mae_loss() {
    let graph = Graph::<NdArray>::new();
    let pred = graph.constant(NdArray::from_vec(vec![2.0, -2.0], &[2, 1]).unwrap());
    let target = graph.constant(NdArray::zeros(&[2, 1]));
    let loss = Loss::MeanAbsoluteError.build(&pred, &target);
    let mut executor = graph.build(&[&loss], &[]);
    assert!((NdArray::to_vec(&executor.run(&[]).unwrap()[0])[0] - 2.0).abs() < 1e-6);
}
