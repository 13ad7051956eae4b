use crate::builder::registry::{Activation, Initialiser};
use crate::builder::spec::{parse_layers, LayerSpec, SpecValue};
use crate::error::{GalvaniError, Result};
use crate::nn::layers::{
    AdaptiveAvgPool2d, AdaptiveMaxPool2d, AvgPool2d, BatchNorm1d, BatchNorm2d, Conv2d, Dropout,
    Flatten, Linear, MaxPool2d,
};
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor, TensorOps};
use std::cell::Cell;

/// A hidden layer instantiated from a [`LayerSpec`].
pub enum HiddenLayer {
    Conv(Conv2d),
    MaxPool(MaxPool2d),
    AvgPool(AvgPool2d),
    AdaptiveMaxPool(AdaptiveMaxPool2d),
    AdaptiveAvgPool(AdaptiveAvgPool2d),
    Linear(Linear),
}

impl HiddenLayer {
    fn forward(&self, x: &Tensor) -> Tensor {
        match self {
            HiddenLayer::Conv(l) => l.forward(x),
            HiddenLayer::MaxPool(l) => l.forward(x),
            HiddenLayer::AvgPool(l) => l.forward(x),
            HiddenLayer::AdaptiveMaxPool(l) => l.forward(x),
            HiddenLayer::AdaptiveAvgPool(l) => l.forward(x),
            HiddenLayer::Linear(l) => l.forward(x),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        match self {
            HiddenLayer::Conv(l) => l.parameters(),
            HiddenLayer::Linear(l) => l.parameters(),
            _ => vec![],
        }
    }

    /// Pooling layers pass through without an activation; conv and linear
    /// layers get the hidden activation applied after them.
    fn is_activated(&self) -> bool {
        matches!(self, HiddenLayer::Conv(_) | HiddenLayer::Linear(_))
    }

    fn expects_flat_input(&self) -> bool {
        matches!(self, HiddenLayer::Linear(_))
    }
}

/// A batch-norm layer matched to its source hidden layer's dimensionality.
pub enum BnLayer {
    OneD(BatchNorm1d),
    TwoD(BatchNorm2d),
}

impl BnLayer {
    fn forward(&self, x: &Tensor) -> Tensor {
        match self {
            BnLayer::OneD(l) => l.forward(x),
            BnLayer::TwoD(l) => l.forward(x),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        match self {
            BnLayer::OneD(l) => l.parameters(),
            BnLayer::TwoD(l) => l.parameters(),
        }
    }

    fn set_training(&mut self, training: bool) {
        match (self, training) {
            (BnLayer::OneD(l), true) => l.train(),
            (BnLayer::OneD(l), false) => l.eval(),
            (BnLayer::TwoD(l), true) => l.train(),
            (BnLayer::TwoD(l), false) => l.eval(),
        }
    }

    pub fn num_features(&self) -> usize {
        match self {
            BnLayer::OneD(l) => l.num_features(),
            BnLayer::TwoD(l) => l.num_features(),
        }
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, BnLayer::TwoD(_))
    }
}

enum OutputChoice {
    Default,
    Single(String),
    PerHead(Vec<String>),
}

/// Configures and validates a [`Cnn`]. Obtained from [`Cnn::builder`]; every
/// option is checked in [`CnnBuilder::build`] and a failure aborts
/// construction outright.
pub struct CnnBuilder {
    layers_info: SpecValue,
    hidden_activation: String,
    output: OutputChoice,
    initialiser: String,
    dropout: f32,
    batch_norm: bool,
    y_range: Option<(f32, f32)>,
    input_dim: Option<Vec<usize>>,
}

impl CnnBuilder {
    /// Hidden activation name, applied after every conv and linear hidden
    /// layer. Defaults to relu.
    pub fn hidden_activation(mut self, name: &str) -> Self {
        self.hidden_activation = name.to_string();
        self
    }

    /// One activation name applied to every output head.
    pub fn output_activation(mut self, name: &str) -> Self {
        self.output = OutputChoice::Single(name.to_string());
        self
    }

    /// Per-head activation names; the list length must match the head count.
    pub fn output_activations(mut self, names: &[&str]) -> Self {
        self.output = OutputChoice::PerHead(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Weight initialisation scheme for all conv and linear layers.
    pub fn initialiser(mut self, name: &str) -> Self {
        self.initialiser = name.to_string();
        self
    }

    /// Dropout probability, applied once after the last hidden layer. Any
    /// value is accepted; out-of-range values degrade to pass-through or
    /// all-zero behaviour.
    pub fn dropout(mut self, p: f32) -> Self {
        self.dropout = p;
        self
    }

    /// Add a batch-norm layer after every conv and linear hidden layer.
    pub fn batch_norm(mut self, enabled: bool) -> Self {
        self.batch_norm = enabled;
        self
    }

    /// Squash every output into the open interval (low, high).
    pub fn y_range(mut self, low: f32, high: f32) -> Self {
        self.y_range = Some((low, high));
        self
    }

    /// Expected per-sample input shape (without the batch dimension),
    /// verified once on the first forward call.
    pub fn input_dim(mut self, dims: &[usize]) -> Self {
        self.input_dim = Some(dims.to_vec());
        self
    }

    pub fn build(self) -> Result<Cnn> {
        let net = parse_layers(&self.layers_info)?;
        let hidden_activation = Activation::parse(&self.hidden_activation)?;
        let initialiser = Initialiser::parse(&self.initialiser)?;

        let output_activations = match self.output {
            OutputChoice::Default => vec![Activation::Identity; net.heads.len()],
            OutputChoice::Single(name) => vec![Activation::parse(&name)?; net.heads.len()],
            OutputChoice::PerHead(names) => {
                if names.len() != net.heads.len() {
                    return Err(GalvaniError::HeadMismatch {
                        heads: net.heads.len(),
                        activations: names.len(),
                    });
                }
                names
                    .iter()
                    .map(|n| Activation::parse(n))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        if let Some((low, high)) = self.y_range {
            if !low.is_finite() || !high.is_finite() || low >= high {
                return Err(GalvaniError::InvalidRange { low, high });
            }
        }

        if let Some(dims) = &self.input_dim {
            if dims.is_empty() {
                return Err(GalvaniError::InvalidInputDim(
                    "expected shape must not be empty".to_string(),
                ));
            }
            if let Some(&zero) = dims.iter().find(|&&d| d == 0) {
                return Err(GalvaniError::InvalidInputDim(format!(
                    "dimensions must be positive, got {zero}"
                )));
            }
        }

        let conv_init = initialiser.init_fn().unwrap_or(RawTensor::kaiming_normal);
        let linear_init = initialiser.init_fn().unwrap_or(RawTensor::xavier_uniform);

        let mut hidden = Vec::with_capacity(net.hidden.len());
        let mut hidden_bns = Vec::with_capacity(net.hidden.len());
        for spec in &net.hidden {
            let (layer, bn) = match *spec {
                LayerSpec::Conv {
                    filters,
                    kernel,
                    stride,
                    padding,
                } => (
                    HiddenLayer::Conv(Conv2d::with_init(filters, kernel, stride, padding, conv_init)),
                    self.batch_norm
                        .then(|| BnLayer::TwoD(BatchNorm2d::new(filters))),
                ),
                LayerSpec::MaxPool {
                    kernel,
                    stride,
                    padding,
                } => (
                    HiddenLayer::MaxPool(MaxPool2d::new(kernel, stride, padding)),
                    None,
                ),
                LayerSpec::AvgPool {
                    kernel,
                    stride,
                    padding,
                } => (
                    HiddenLayer::AvgPool(AvgPool2d::new(kernel, stride, padding)),
                    None,
                ),
                LayerSpec::AdaptiveMaxPool { out_h, out_w } => (
                    HiddenLayer::AdaptiveMaxPool(AdaptiveMaxPool2d::new(out_h, out_w)),
                    None,
                ),
                LayerSpec::AdaptiveAvgPool { out_h, out_w } => (
                    HiddenLayer::AdaptiveAvgPool(AdaptiveAvgPool2d::new(out_h, out_w)),
                    None,
                ),
                LayerSpec::Linear { out_features } => (
                    HiddenLayer::Linear(Linear::with_init(out_features, linear_init)),
                    self.batch_norm
                        .then(|| BnLayer::OneD(BatchNorm1d::new(out_features))),
                ),
            };
            hidden.push(layer);
            hidden_bns.push(bn);
        }

        let heads = net
            .heads
            .iter()
            .map(|&out| Linear::with_init(out, linear_init))
            .collect();

        Ok(Cnn {
            hidden,
            hidden_bns,
            dropout: Dropout::new(self.dropout),
            heads,
            hidden_activation,
            output_activations,
            y_range: self.y_range,
            input_dim: self.input_dim,
            input_checked: Cell::new(false),
        })
    }
}

/// A convolutional network assembled from a declarative layer description.
///
/// Built via [`Cnn::builder`]. The forward pass runs the hidden layers (with
/// optional batch norm and the hidden activation after each conv/linear),
/// flattens before the first linear consumer, applies dropout once, then each
/// output head with its activation and the optional y-range squash.
pub struct Cnn {
    hidden: Vec<HiddenLayer>,
    hidden_bns: Vec<Option<BnLayer>>,
    dropout: Dropout,
    heads: Vec<Linear>,
    hidden_activation: Activation,
    output_activations: Vec<Activation>,
    y_range: Option<(f32, f32)>,
    input_dim: Option<Vec<usize>>,
    // The declared input shape is verified exactly once, on the first call;
    // afterwards mismatches surface as layer-level panics. Not thread-safe,
    // but neither is the tensor type.
    input_checked: Cell<bool>,
}

impl Cnn {
    pub fn builder(layers_info: SpecValue) -> CnnBuilder {
        CnnBuilder {
            layers_info,
            hidden_activation: "relu".to_string(),
            output: OutputChoice::Default,
            initialiser: "default".to_string(),
            dropout: 0.0,
            batch_norm: false,
            y_range: None,
            input_dim: None,
        }
    }

    /// Run the network and return one tensor per output head.
    pub fn forward_heads(&self, input: &Tensor) -> Result<Vec<Tensor>> {
        self.check_input(input)?;

        let mut x = input.clone();
        for (layer, bn) in self.hidden.iter().zip(&self.hidden_bns) {
            if layer.expects_flat_input() && x.borrow().shape.len() > 2 {
                x = Flatten.forward(&x);
            }
            x = layer.forward(&x);
            if let Some(bn) = bn {
                x = bn.forward(&x);
            }
            if layer.is_activated() {
                x = self.hidden_activation.apply(&x);
            }
        }
        if x.borrow().shape.len() > 2 {
            x = Flatten.forward(&x);
        }
        x = self.dropout.forward(&x);

        let outputs = self
            .heads
            .iter()
            .zip(&self.output_activations)
            .map(|(head, act)| {
                let mut h = act.apply(&head.forward(&x));
                if let Some((low, high)) = self.y_range {
                    let offset = RawTensor::constant(low, &[1]);
                    let span = RawTensor::constant(high - low, &[1]);
                    h = h.sigmoid().elem_mul(&span).add(&offset);
                }
                h
            })
            .collect();
        Ok(outputs)
    }

    /// Run the network; multiple heads are concatenated along the feature
    /// dimension.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let heads = self.forward_heads(input)?;
        Ok(if heads.len() == 1 {
            heads.into_iter().next().unwrap()
        } else {
            RawTensor::cat(&heads, 1)
        })
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let Some(expected) = &self.input_dim else {
            return Ok(());
        };
        if self.input_checked.replace(true) {
            return Ok(());
        }
        let shape = input.borrow().shape.clone();
        if shape.len() < 2 || shape[1..] != expected[..] {
            return Err(GalvaniError::ShapeMismatch {
                expected: expected.clone(),
                got: shape[1.min(shape.len())..].to_vec(),
            });
        }
        Ok(())
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params = Vec::new();
        for layer in &self.hidden {
            params.extend(layer.parameters());
        }
        for bn in self.hidden_bns.iter().flatten() {
            params.extend(bn.parameters());
        }
        for head in &self.heads {
            params.extend(head.parameters());
        }
        params
    }

    pub fn train(&mut self) {
        self.dropout.train();
        for bn in self.hidden_bns.iter_mut().flatten() {
            bn.set_training(true);
        }
    }

    pub fn eval(&mut self) {
        self.dropout.eval();
        for bn in self.hidden_bns.iter_mut().flatten() {
            bn.set_training(false);
        }
    }

    pub fn zero_grad(&self) {
        for p in self.parameters() {
            p.borrow_mut().grad = None;
        }
    }

    pub fn hidden_layers(&self) -> &[HiddenLayer] {
        &self.hidden
    }

    pub fn heads(&self) -> &[Linear] {
        &self.heads
    }

    /// Batch-norm layers in hidden-layer order.
    pub fn batch_norms(&self) -> Vec<&BnLayer> {
        self.hidden_bns.iter().flatten().collect()
    }

    pub fn dropout_p(&self) -> f32 {
        self.dropout.p()
    }

    pub fn y_range(&self) -> Option<(f32, f32)> {
        self.y_range
    }

    pub fn input_dim(&self) -> Option<&[usize]> {
        self.input_dim.as_deref()
    }
}
