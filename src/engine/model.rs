use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;

use log::{debug, info, trace, warn};

use crate::backend::{Backend, Elm};
use crate::data::collate::{collate, collate_features};
use crate::data::dataset::{Dataset, Sample};
use crate::data::loader::DataLoader;
use crate::engine::executor::Executor;
use crate::engine::layer::Layer;
use crate::engine::loss::Loss;
use crate::engine::metric::Metric;
use crate::engine::optimizer::Optimizer;
use crate::engine::shape::{format_shape, UNKNOWN_DIM};
use crate::engine::tensor::Tensor;
use crate::engine::variable::Variable;
use crate::engine::weights::{LayerWeights, VariableWeights, WeightsDocument};
use crate::engine::Graph;
use crate::error::{Error, Result};

/// Loss and metric averaged over one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: Elm,
    pub metric: Elm,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: Elm,
    pub metric: Elm,
}

/// Graph handles and plans created by `compile`.
#[derive(Debug)]
struct Compiled<B: Backend> {
    optimizer: Box<dyn Optimizer<B>>,
    loss: Loss,
    metric: Metric,
    input: Tensor<B>,
    labels: Tensor<B>,
    feature_dims: Vec<usize>,
    label_len: usize,
    train: Executor<B>,
    eval: Executor<B>,
    predict: Executor<B>,
}

/// A linear stack of layers, starting with an [`Input`](crate::engine::layer::Input).
///
/// Building, training and inference all happen on one [`Graph`] owned by the
/// model; `compile` adds the forward pass, loss, gradients and optimizer
/// updates to it once, and `fit`/`evaluate`/`predict` only run plans.
#[derive(Debug)]
pub struct Sequential<B: Backend> {
    layers: Vec<Box<dyn Layer<B>>>,
    graph: Graph<B>,
    compiled: Option<Compiled<B>>,
}

impl<B: Backend> Sequential<B> {
    /// Checks that explicit layer names are unique, then names the rest
    /// `<kind>_<index>`, bumping the suffix past any name already taken.
    pub fn of(mut layers: Vec<Box<dyn Layer<B>>>) -> Result<Self> {
        match layers.first() {
            Some(first) if first.input_shape().is_some() => {}
            _ => return Err(Error::MissingInputLayer),
        }

        let mut names = HashSet::new();
        for layer in layers.iter().filter(|l| !l.name().is_empty()) {
            if !names.insert(layer.name().to_string()) {
                return Err(Error::RepeatableLayerName(layer.name().to_string()));
            }
        }
        for (i, layer) in layers.iter_mut().enumerate() {
            if layer.name().is_empty() {
                let kind = layer.kind().to_lowercase();
                let mut suffix = i;
                let mut name = format!("{kind}_{suffix}");
                while names.contains(&name) {
                    suffix += 1;
                    name = format!("{kind}_{suffix}");
                }
                names.insert(name.clone());
                layer.set_name(name);
            }
            layer.validate()?;
        }

        Ok(Self {
            layers,
            graph: Graph::new(),
            compiled: None,
        })
    }

    pub fn graph(&self) -> &Graph<B> {
        &self.graph
    }

    pub fn layers(&self) -> &[Box<dyn Layer<B>>] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Result<&dyn Layer<B>> {
        self.layers
            .iter()
            .find(|l| l.name() == name)
            .map(|l| l.as_ref())
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn optimizer(&self) -> Option<&dyn Optimizer<B>> {
        self.compiled.as_ref().map(|c| c.optimizer.as_ref())
    }

    pub fn input_shape(&self) -> Vec<usize> {
        self.layers
            .first()
            .and_then(|l| l.input_shape())
            .unwrap_or_default()
    }

    /// Output shape of every layer, in order.
    pub fn output_shapes(&self) -> Result<Vec<Vec<usize>>> {
        let mut shape = self.input_shape();
        let mut shapes = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            shape = layer.compute_output_shape(&shape)?;
            shapes.push(shape.clone());
        }
        Ok(shapes)
    }

    pub fn variables(&self) -> Vec<Variable<B>> {
        self.layers.iter().flat_map(|l| l.variables()).collect()
    }

    pub fn trainable_variables(&self) -> Vec<Variable<B>> {
        self.variables().into_iter().filter(|v| v.trainable).collect()
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.param_count()).sum()
    }

    /// Builds every layer and wires loss, gradients and optimizer updates.
    ///
    /// Every layer shape is checked before anything is added to the graph,
    /// so a rejected architecture leaves the model unbuilt.
    pub fn compile<O>(&mut self, optimizer: O, loss: Loss, metric: Metric) -> Result<()>
    where
        O: Optimizer<B> + 'static,
    {
        if self.compiled.is_some() {
            return Err(Error::AlreadyCompiled);
        }
        let mut optimizer: Box<dyn Optimizer<B>> = Box::new(optimizer);

        let input_shape = self.input_shape();
        let shapes = self.output_shapes()?;
        let label_len = match shapes.last().map(Vec::as_slice) {
            Some([_, n]) if *n != UNKNOWN_DIM => *n,
            last => {
                return Err(Error::InvalidConfig(format!(
                    "the last layer must produce [batch, classes], got {}",
                    format_shape(last.unwrap_or_default())
                )))
            }
        };

        let input = self.graph.placeholder(&input_shape);
        let mut shape = input_shape.clone();
        let mut output = input.clone();
        for (layer, next) in self.layers.iter_mut().zip(shapes) {
            layer.build(&self.graph, &shape)?;
            output = layer.forward(&output)?;
            shape = next;
            debug!(
                "{} ({}): output {}",
                layer.name(),
                layer.kind(),
                format_shape(&shape)
            );
        }

        let labels = self.graph.placeholder(&[UNKNOWN_DIM, label_len]);

        let mut terms = vec![loss.build(&output, &labels)];
        terms.extend(self.variables().iter().filter_map(|v| v.penalty()));
        let total_loss = if terms.len() == 1 {
            terms.remove(0)
        } else {
            Tensor::add_n(terms)
        };
        let metric_value = metric.build(&output, &labels);

        let trainable = self.trainable_variables();
        if trainable.is_empty() {
            warn!("model has no trainable variables; fit will not change any weights");
        }
        let targets: Vec<Tensor<B>> = trainable.iter().map(|v| v.tensor.clone()).collect();
        let gradients = self.graph.gradients(&total_loss, &targets);
        optimizer.create_slots(&self.graph, &trainable)?;
        let updates = optimizer.apply_gradients(&self.graph, &trainable, &gradients)?;
        let update_refs: Vec<&Tensor<B>> = updates.iter().collect();

        let train = self
            .graph
            .build(&[&total_loss, &metric_value], &update_refs);
        let eval = self.graph.build(&[&total_loss, &metric_value], &[]);
        let predict = self.graph.build(&[&output], &[]);
        info!(
            "compiled {} layers, {} params, optimizer {}, loss {:?}",
            self.layers.len(),
            self.param_count(),
            optimizer.name(),
            loss
        );

        self.compiled = Some(Compiled {
            optimizer,
            loss,
            metric,
            input,
            labels,
            feature_dims: input_shape[1..].to_vec(),
            label_len,
            train,
            eval,
            predict,
        });
        Ok(())
    }

    /// Runs `epochs` passes over `dataset`, one optimizer step per batch.
    pub fn fit<D>(&mut self, dataset: &D, epochs: usize, batch_size: usize) -> Result<TrainingHistory>
    where
        D: Dataset<Item = Sample>,
    {
        let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }
        let mut history = TrainingHistory::default();
        if dataset.is_empty() {
            warn!("fit called with an empty dataset; nothing to train on");
            return Ok(history);
        }

        let loader = DataLoader::new(dataset, batch_size, false);
        for epoch in 1..=epochs {
            let mut totals = Totals::default();
            for (step, batch) in loader.iter().enumerate() {
                let n = batch.len();
                let (x, y) = collate::<B>(batch, &compiled.feature_dims, compiled.label_len)?;
                let out = compiled
                    .train
                    .run(&[(&compiled.input, x), (&compiled.labels, y)])?;
                let (loss, metric) = (scalar::<B>(&out[0])?, scalar::<B>(&out[1])?);
                trace!("epoch {epoch} step {step}: loss={loss:.6}");
                totals.add(n, loss, metric);
            }
            let record = EpochRecord {
                epoch,
                loss: totals.loss(),
                metric: totals.metric(),
            };
            info!(
                "Epoch {}/{}: loss={:.4} {:?}={:.4}",
                epoch, epochs, record.loss, compiled.metric, record.metric
            );
            history.epochs.push(record);
        }
        Ok(history)
    }

    /// Loss and metric over `dataset`; no variable is modified.
    pub fn evaluate<D>(&mut self, dataset: &D, batch_size: usize) -> Result<Evaluation>
    where
        D: Dataset<Item = Sample>,
    {
        let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }
        if dataset.is_empty() {
            warn!("evaluate called with an empty dataset");
        }

        let mut totals = Totals::default();
        for batch in DataLoader::new(dataset, batch_size, false).iter() {
            let n = batch.len();
            let (x, y) = collate::<B>(batch, &compiled.feature_dims, compiled.label_len)?;
            let out = compiled
                .eval
                .run(&[(&compiled.input, x), (&compiled.labels, y)])?;
            totals.add(n, scalar::<B>(&out[0])?, scalar::<B>(&out[1])?);
        }
        let evaluation = Evaluation {
            loss: totals.loss(),
            metric: totals.metric(),
        };
        info!(
            "evaluation: loss={:.4} {:?}={:.4} ({:?})",
            evaluation.loss, compiled.metric, evaluation.metric, compiled.loss
        );
        Ok(evaluation)
    }

    /// Raw outputs of the last layer, one row per feature row.
    pub fn predict(&mut self, features: &[Vec<Elm>]) -> Result<Vec<Vec<Elm>>> {
        let compiled = self.compiled.as_mut().ok_or(Error::NotCompiled)?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let x = collate_features::<B>(features, &compiled.feature_dims)?;
        let out = compiled.predict.run(&[(&compiled.input, x)])?;
        Ok(B::to_vec(&out[0])
            .chunks(compiled.label_len)
            .map(<[Elm]>::to_vec)
            .collect())
    }

    /// Index of the largest output per row.
    pub fn predict_classes(&mut self, features: &[Vec<Elm>]) -> Result<Vec<usize>> {
        Ok(self
            .predict(features)?
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, Elm::NEG_INFINITY), |best, (i, &v)| {
                        if v > best.1 {
                            (i, v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect())
    }

    pub fn export_weights(&self) -> Result<WeightsDocument> {
        if self.compiled.is_none() {
            return Err(Error::NotCompiled);
        }
        let mut document = WeightsDocument::default();
        for layer in &self.layers {
            let variables = layer.variables();
            if variables.is_empty() {
                continue;
            }
            let variables = variables
                .iter()
                .map(|v| Ok(VariableWeights::from_tensor::<B>(&v.name, &v.value()?)))
                .collect::<Result<Vec<_>>>()?;
            document.layers.push(LayerWeights {
                name: layer.name().to_string(),
                variables,
            });
        }
        Ok(document)
    }

    /// Loads every layer's variables from `document`. All layers are checked
    /// first, so a failed import leaves the model untouched.
    pub fn import_weights(&self, document: &WeightsDocument) -> Result<()> {
        if self.compiled.is_none() {
            return Err(Error::NotCompiled);
        }
        for entry in &document.layers {
            self.layer(&entry.name)?;
        }

        let mut staged: Vec<(&dyn Layer<B>, BTreeMap<String, B::Tensor>)> = Vec::new();
        for layer in &self.layers {
            let variables = layer.variables();
            if variables.is_empty() {
                continue;
            }
            let entry = document
                .layer(layer.name())
                .ok_or_else(|| Error::MissingWeight {
                    layer: layer.name().to_string(),
                    variable: variables[0].name.clone(),
                })?;
            let weights = entry
                .variables
                .iter()
                .map(|v| Ok((v.name.clone(), v.to_tensor::<B>()?)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            layer.check_weights(&weights)?;
            staged.push((layer.as_ref(), weights));
        }

        for (layer, weights) in staged {
            layer.set_weights(&weights)?;
        }
        debug!("imported weights for {} layers", document.layers.len());
        Ok(())
    }

    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.export_weights()?.save_to_file(path)
    }

    pub fn load_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let document = WeightsDocument::load_from_file(path)?;
        self.import_weights(&document)
    }

    /// Table of layer names, kinds, output shapes and parameter counts.
    pub fn summary(&self) -> Result<String> {
        let shapes = self.output_shapes()?;
        let mut out = String::new();
        let rule = "=".repeat(72);
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "{:<24}{:<20}{:<20}{:>8}",
            "Layer", "Type", "Output Shape", "Params"
        );
        let _ = writeln!(out, "{rule}");
        for (layer, shape) in self.layers.iter().zip(&shapes) {
            let _ = writeln!(
                out,
                "{:<24}{:<20}{:<20}{:>8}",
                layer.name(),
                layer.kind(),
                format_shape(shape),
                layer.param_count()
            );
        }
        let _ = writeln!(out, "{rule}");
        let trainable: usize = self
            .trainable_variables()
            .iter()
            .map(|v| v.num_elements())
            .sum();
        let _ = writeln!(out, "Total params: {}", self.param_count());
        let _ = writeln!(out, "Trainable params: {trainable}");
        let _ = writeln!(out, "Non-trainable params: {}", self.param_count() - trainable);
        Ok(out)
    }
}

/// Sample-weighted running sums of per-batch means.
#[derive(Debug, Default)]
struct Totals {
    samples: usize,
    loss: f64,
    metric: f64,
}

impl Totals {
    fn add(&mut self, n: usize, loss: Elm, metric: Elm) {
        self.samples += n;
        self.loss += f64::from(loss) * n as f64;
        self.metric += f64::from(metric) * n as f64;
    }

    fn loss(&self) -> Elm {
        self.mean(self.loss)
    }

    fn metric(&self) -> Elm {
        self.mean(self.metric)
    }

    fn mean(&self, sum: f64) -> Elm {
        if self.samples == 0 {
            0.0
        } else {
            (sum / self.samples as f64) as Elm
        }
    }
}

fn scalar<B: Backend>(tensor: &B::Tensor) -> Result<Elm> {
    B::scalar_value(tensor).ok_or_else(|| {
        Error::Engine(format!(
            "expected a scalar, got shape {:?}",
            B::shape(tensor)
        ))
    })
}
