use kgraph::backend::ndarray::NdArray;
use kgraph::backend::Backend;
use kgraph::engine::activation::Activation;
use kgraph::engine::Graph;

/// Runs `activation` on `input` and returns `(y, dy/dx)` for `sum(y)`.
fn forward_and_grad(activation: Activation, input: Vec<f32>) -> (Vec<f32>, Vec<f32>) {
    let graph = Graph::<NdArray>::new();
    let n = input.len();
    let x = graph.placeholder(&[1, n]);
    let y = activation.apply(x.clone());
    let grad = graph.gradients(&y.clone().sum(None), &[x.clone()]).remove(0);

    let mut executor = graph.build(&[&y, &grad], &[]);
    let out = executor
        .run(&[(&x, NdArray::from_vec(input, &[1, n]).unwrap())])
        .unwrap();
    (NdArray::to_vec(&out[0]), NdArray::to_vec(&out[1]))
}

#[test]
fn test_sigmoid() {
    let (y, g) = forward_and_grad(Activation::Sigmoid, vec![0.0]);
    assert!((y[0] - 0.5).abs() < 1e-6);
    assert!((g[0] - 0.25).abs() < 1e-6);
}

#[test]
fn test_tanh() {
    let (y, g) = forward_and_grad(Activation::Tanh, vec![0.0]);
    assert!(y[0].abs() < 1e-6);
    assert!((g[0] - 1.0).abs() < 1e-6);
}

#[test]
fn test_relu() {
    let (y, g) = forward_and_grad(Activation::Relu, vec![-1.0, 1.0]);
    assert_eq!(y, vec![0.0, 1.0]);
    assert_eq!(g, vec![0.0, 1.0]);
}

#[test]
fn test_relu6_saturates() {
    let (y, g) = forward_and_grad(Activation::Relu6, vec![-1.0, 3.0, 8.0]);
    assert_eq!(y, vec![0.0, 3.0, 6.0]);
    assert_eq!(g, vec![0.0, 1.0, 0.0]);
}

#[test]
fn test_elu_negative_branch() {
    // elu(-1) = e^-1 - 1, derivative e^-1
    let (y, g) = forward_and_grad(Activation::Elu, vec![-1.0, 2.0]);
    let e = (-1.0f32).exp();
    assert!((y[0] - (e - 1.0)).abs() < 1e-5);
    assert!((y[1] - 2.0).abs() < 1e-6);
    assert!((g[0] - e).abs() < 1e-5);
    assert!((g[1] - 1.0).abs() < 1e-6);
}

#[test]
fn test_softplus_and_softsign() {
    let (y, g) = forward_and_grad(Activation::Softplus, vec![0.0]);
    assert!((y[0] - 2f32.ln()).abs() < 1e-6);
    assert!((g[0] - 0.5).abs() < 1e-6);

    let (y, g) = forward_and_grad(Activation::Softsign, vec![1.0]);
    assert!((y[0] - 0.5).abs() < 1e-6);
    // d/dx x/(1+|x|) = 1/(1+|x|)^2
    assert!((g[0] - 0.25).abs() < 1e-5);
}

#[test]
fn test_swish() {
    let (y, g) = forward_and_grad(Activation::Swish, vec![0.0]);
    assert!(y[0].abs() < 1e-6);
    assert!((g[0] - 0.5).abs() < 1e-6);
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let (y, g) = forward_and_grad(Activation::Softmax, vec![1.0, 2.0, 3.0]);
    assert!((y.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    assert!(y[2] > y[1] && y[1] > y[0]);
    // sum(softmax) is constant, so its gradient vanishes.
    assert!(g.iter().all(|v| v.abs() < 1e-5));
}

#[test]
fn test_hard_sigmoid_clips() {
    let (y, _) = forward_and_grad(Activation::HardSigmoid, vec![-5.0, 0.0, 5.0]);
    assert_eq!(y, vec![0.0, 0.5, 1.0]);
}

#[test]
fn test_activation_deserializes_from_name() {
    let a: Activation = serde_json::from_str("\"Selu\"").unwrap();
    assert_eq!(a, Activation::Selu);
}
