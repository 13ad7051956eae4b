use crate::nn::{InitFn, Module};
use crate::tensor::{RawTensor, Tensor, TensorOps};
use std::cell::OnceCell;

/// Fully-connected layer: y = x @ W + b over (B, in) input.
///
/// `in_features` is inferred from the first input, so layers can be declared
/// before the upstream shape is known.
pub struct Linear {
    out_features: usize,
    init: InitFn,
    weight: OnceCell<Tensor>,
    bias: Tensor,
}

impl Linear {
    pub fn new(out_features: usize) -> Self {
        Self::with_init(out_features, RawTensor::xavier_uniform)
    }

    pub fn with_init(out_features: usize, init: InitFn) -> Self {
        assert!(out_features > 0, "out_features must be positive");
        let bias = RawTensor::zeros(&[1, out_features]);
        bias.borrow_mut().requires_grad = true;
        Linear {
            out_features,
            init,
            weight: OnceCell::new(),
            bias,
        }
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Weight matrix (in, out), present after the first forward.
    pub fn weight(&self) -> Option<&Tensor> {
        self.weight.get()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        let in_features = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                2,
                "linear expects (B, in_features), got {:?}",
                s.shape
            );
            s.shape[1]
        };

        let weight = self.weight.get_or_init(|| {
            let w = (self.init)(&[in_features, self.out_features]);
            w.borrow_mut().requires_grad = true;
            w
        });

        input.matmul(weight).add(&self.bias)
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![];
        if let Some(w) = self.weight.get() {
            params.push(w.clone());
        }
        params.push(self.bias.clone());
        params
    }
}
