// 自動微分(Automatic Differentiation)を行うためのモジュール

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::backend::Backend;
use crate::engine::{
    node::{NodeId, NodeType},
    shape::UNKNOWN_DIM,
    tensor::Tensor,
};

/// Appends the nodes computing d`y`/d`x` for every `x` in `xs`.
///
/// 1. `y` から辿れるノードをトポロジカルソートします。
/// 2. `xs` のいずれかに依存するノードだけを勾配の伝播対象にします。
/// 3. 逆順に辿り、各オペレーションの `backward` で入力への勾配ノードを追加します。
///
/// Gradients reaching a node along several paths are summed. An `x` that
/// `y` does not depend on gets a zero gradient of its own shape, so the
/// result always has one entry per `x`, in order.
pub fn gradients<B: Backend>(y: &Tensor<B>, xs: &[Tensor<B>]) -> Vec<Tensor<B>> {
    let graph = y.graph().clone();
    let order = graph.with(|g| g.topological_sort(&[y.id]));

    // xに依存するノードの集合
    let targets: HashSet<NodeId> = xs.iter().map(|x| x.id).collect();
    let mut requires_grad: HashSet<NodeId> = HashSet::new();
    graph.with(|g| {
        for &id in &order {
            let node = g.node(id);
            if targets.contains(&id) || node.inputs.iter().any(|i| requires_grad.contains(i)) {
                requires_grad.insert(id);
            }
        }
    });

    let mut pending: HashMap<NodeId, Vec<Tensor<B>>> = HashMap::new();
    let mut finished: HashMap<NodeId, Tensor<B>> = HashMap::new();
    if requires_grad.contains(&y.id) {
        // dy/dy = 1
        pending.entry(y.id).or_default().push(Tensor::ones_like(y));
    }

    for &node_id in order.iter().rev() {
        let Some(mut grads) = pending.remove(&node_id) else {
            continue;
        };
        // 分岐がある場合は勾配を加算します（連鎖律）
        let gy = if grads.len() == 1 {
            grads.remove(0)
        } else {
            Tensor::add_n(grads)
        };

        let (node_type, inputs) = graph.with(|g| {
            let node = g.node(node_id);
            (node.node_type.clone(), node.inputs.clone())
        });

        if let NodeType::Operation(op) = node_type {
            let input_tensors: Vec<Tensor<B>> =
                inputs.iter().map(|&id| Tensor::from_id(&graph, id)).collect();
            let output = Tensor::from_id(&graph, node_id);
            let input_grads = op.backward(&gy, &input_tensors, &output);
            for (input, grad) in input_tensors.iter().zip(input_grads) {
                if let Some(grad) = grad {
                    if requires_grad.contains(&input.id) {
                        pending.entry(input.id).or_default().push(grad);
                    }
                }
            }
        }

        if targets.contains(&node_id) {
            finished.insert(node_id, gy);
        }
    }

    xs.iter()
        .map(|x| match finished.get(&x.id) {
            Some(grad) => grad.clone(),
            None => {
                // 到達しなかったターゲットにはゼロ勾配を設定
                debug!("no gradient path from node {} to node {}", y.id, x.id);
                let shape = x.shape();
                if shape.contains(&UNKNOWN_DIM) {
                    Tensor::ones_like(x).mul_scalar(0.0)
                } else {
                    graph.constant(B::zeros(&shape))
                }
            }
        })
        .collect()
}
