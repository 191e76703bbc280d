use kgraph::backend::ndarray::NdArray;
use kgraph::backend::Backend;
use kgraph::engine::shape::UNKNOWN_DIM;
use kgraph::engine::Graph;
use kgraph::Error;

#[test]
fn test_add() {
    let graph = Graph::<NdArray>::new();
    let a = graph.placeholder(&[3]);
    let b = graph.placeholder(&[3]);
    let c = a.clone() + b.clone();

    let mut executor = graph.build(&[&c], &[]);
    let out = executor
        .run(&[
            (&a, NdArray::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap()),
            (&b, NdArray::from_vec(vec![4.0, 5.0, 6.0], &[3]).unwrap()),
        ])
        .unwrap();
    assert_eq!(NdArray::to_vec(&out[0]), vec![5.0, 7.0, 9.0]);
}

#[test]
fn test_matmul() {
    let graph = Graph::<NdArray>::new();
    let a = graph.constant(NdArray::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap());
    let b = graph.constant(NdArray::from_vec(vec![5.0, 6.0, 7.0, 8.0], &[2, 2]).unwrap());
    let c = a.matmul(b);

    let mut executor = graph.build(&[&c], &[]);
    let out = executor.run(&[]).unwrap();
    assert_eq!(
        NdArray::to_vec(&out[0]),
        vec![
            1.0 * 5.0 + 2.0 * 7.0,
            1.0 * 6.0 + 2.0 * 8.0,
            3.0 * 5.0 + 4.0 * 7.0,
            3.0 * 6.0 + 4.0 * 8.0
        ]
    );
}

#[test]
#[should_panic(expected = "Shape mismatch in operation")]
fn test_shape_mismatch() {
    let graph = Graph::<NdArray>::new();
    let a = graph.placeholder(&[2, 3]);
    let b = graph.placeholder(&[2, 4]);
    // [2, 3] + [2, 4] cannot broadcast
    let _c = a + b;
}

#[test]
fn test_assign_loop() {
    // W = W + 1.0, applied once per run
    let graph = Graph::<NdArray>::new();
    let w = graph
        .variable("w", NdArray::from_vec(vec![1.0], &[1]).unwrap(), true)
        .unwrap();
    let w_new = w.clone().add_scalar(1.0);
    let update = graph.assign(&w, &w_new);

    let mut executor = graph.build(&[], &[&update]);
    executor.run(&[]).unwrap();
    assert_eq!(NdArray::to_vec(&graph.value(&w).unwrap()), vec![2.0]);
    executor.run(&[]).unwrap();
    assert_eq!(NdArray::to_vec(&graph.value(&w).unwrap()), vec![3.0]);
}

#[test]
fn test_fetches_see_values_before_updates() {
    let graph = Graph::<NdArray>::new();
    let w = graph.variable("w", NdArray::ones(&[1]), true).unwrap();
    let doubled = w.clone().mul_scalar(2.0);
    let update = graph.assign(&w, &doubled);

    let mut executor = graph.build(&[&doubled], &[&update]);
    let first = executor.run(&[]).unwrap();
    let second = executor.run(&[]).unwrap();
    assert_eq!(NdArray::to_vec(&first[0]), vec![2.0]);
    assert_eq!(NdArray::to_vec(&second[0]), vec![4.0]);
}

#[test]
fn test_grad_simple() {
    // y = 3 * x^2, dy/dx = 6x, x = 2 -> 12
    let graph = Graph::<NdArray>::new();
    let x = graph.placeholder(&[]);
    let y = x.clone().square().mul_scalar(3.0);
    let grad_x = graph.gradients(&y, &[x.clone()]).remove(0);

    let mut executor = graph.build(&[&grad_x], &[]);
    let out = executor
        .run(&[(&x, NdArray::from_vec(vec![2.0], &[]).unwrap())])
        .unwrap();
    assert_eq!(NdArray::to_vec(&out[0]), vec![12.0]);
}

#[test]
fn test_batch_axis_is_resolved_per_run() {
    let graph = Graph::<NdArray>::new();
    let x = graph.placeholder(&[UNKNOWN_DIM, 2]);
    let s = x.clone().sum(Some(1));
    let mut executor = graph.build(&[&s], &[]);

    for batch in [1, 5] {
        let out = executor.run(&[(&x, NdArray::ones(&[batch, 2]))]).unwrap();
        assert_eq!(NdArray::to_vec(&out[0]), vec![2.0; batch]);
    }
}

#[test]
fn test_missing_feed_is_an_error() {
    let graph = Graph::<NdArray>::new();
    let x = graph.placeholder(&[2]);
    let y = x.clone().relu();
    let mut executor = graph.build(&[&y], &[]);
    assert!(matches!(executor.run(&[]), Err(Error::Engine(_))));
}

#[test]
fn test_duplicate_variable_name() {
    let graph = Graph::<NdArray>::new();
    graph.variable("w", NdArray::ones(&[1]), true).unwrap();
    assert!(matches!(
        graph.variable("w", NdArray::ones(&[1]), true),
        Err(Error::DuplicateVariable(_))
    ));
}
