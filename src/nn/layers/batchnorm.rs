use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor, TensorOps};
use std::cell::RefCell;

const BN_EPS: f32 = 1e-5;
const BN_MOMENTUM: f32 = 0.1;

fn update_running(running: &mut [f32], batch: &[f32]) {
    for (r, &b) in running.iter_mut().zip(batch) {
        *r = (1.0 - BN_MOMENTUM) * *r + BN_MOMENTUM * b;
    }
}

/// Batch normalisation over (B, F) input, per feature column.
pub struct BatchNorm1d {
    num_features: usize,
    gamma: Tensor,
    beta: Tensor,
    running_mean: RefCell<Vec<f32>>,
    running_var: RefCell<Vec<f32>>,
    training: bool,
}

impl BatchNorm1d {
    pub fn new(num_features: usize) -> Self {
        assert!(num_features > 0, "num_features must be positive");
        let gamma = RawTensor::ones(&[1, num_features]);
        gamma.borrow_mut().requires_grad = true;
        let beta = RawTensor::zeros(&[1, num_features]);
        beta.borrow_mut().requires_grad = true;
        BatchNorm1d {
            num_features,
            gamma,
            beta,
            running_mean: RefCell::new(vec![0.0; num_features]),
            running_var: RefCell::new(vec![1.0; num_features]),
            training: true,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

impl Module for BatchNorm1d {
    fn forward(&self, input: &Tensor) -> Tensor {
        {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                2,
                "batchnorm1d expects (B, F), got {:?}",
                s.shape
            );
            assert_eq!(
                s.shape[1], self.num_features,
                "batchnorm1d built for {} features, got {:?}",
                self.num_features, s.shape
            );
        }

        let (mean, var) = if self.training {
            let mean = input.mean_dim(0, true);
            let centered = input.sub(&mean);
            let var = centered.elem_mul(&centered).mean_dim(0, true);
            update_running(&mut self.running_mean.borrow_mut(), &mean.borrow().data);
            update_running(&mut self.running_var.borrow_mut(), &var.borrow().data);
            (mean, var)
        } else {
            (
                RawTensor::from_vec(self.running_mean.borrow().clone(), &[1, self.num_features]),
                RawTensor::from_vec(self.running_var.borrow().clone(), &[1, self.num_features]),
            )
        };

        let eps = RawTensor::constant(BN_EPS, &[1]);
        let norm = input.sub(&mean).div(&var.add(&eps).sqrt());
        norm.elem_mul(&self.gamma).add(&self.beta)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }
}

/// Batch normalisation over (B, C, H, W) input, per channel.
///
/// The input is permuted to channel-major (C, B*H*W) so the per-channel
/// statistics reduce along a single axis, then permuted back.
pub struct BatchNorm2d {
    num_features: usize,
    gamma: Tensor,
    beta: Tensor,
    running_mean: RefCell<Vec<f32>>,
    running_var: RefCell<Vec<f32>>,
    training: bool,
}

impl BatchNorm2d {
    pub fn new(num_features: usize) -> Self {
        assert!(num_features > 0, "num_features must be positive");
        let gamma = RawTensor::ones(&[num_features, 1]);
        gamma.borrow_mut().requires_grad = true;
        let beta = RawTensor::zeros(&[num_features, 1]);
        beta.borrow_mut().requires_grad = true;
        BatchNorm2d {
            num_features,
            gamma,
            beta,
            running_mean: RefCell::new(vec![0.0; num_features]),
            running_var: RefCell::new(vec![1.0; num_features]),
            training: true,
        }
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

impl Module for BatchNorm2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (b, c, h, w) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "batchnorm2d expects (B, C, H, W), got {:?}",
                s.shape
            );
            assert_eq!(
                s.shape[1], self.num_features,
                "batchnorm2d built for {} channels, got {:?}",
                self.num_features, s.shape
            );
            (s.shape[0], s.shape[1], s.shape[2], s.shape[3])
        };

        let by_channel = input.permute(&[1, 0, 2, 3]).reshape(&[c, b * h * w]);

        let (mean, var) = if self.training {
            let mean = by_channel.mean_dim(1, true);
            let centered = by_channel.sub(&mean);
            let var = centered.elem_mul(&centered).mean_dim(1, true);
            update_running(&mut self.running_mean.borrow_mut(), &mean.borrow().data);
            update_running(&mut self.running_var.borrow_mut(), &var.borrow().data);
            (mean, var)
        } else {
            (
                RawTensor::from_vec(self.running_mean.borrow().clone(), &[c, 1]),
                RawTensor::from_vec(self.running_var.borrow().clone(), &[c, 1]),
            )
        };

        let eps = RawTensor::constant(BN_EPS, &[1]);
        let norm = by_channel.sub(&mean).div(&var.add(&eps).sqrt());
        let scaled = norm.elem_mul(&self.gamma).add(&self.beta);
        scaled.reshape(&[c, b, h, w]).permute(&[1, 0, 2, 3])
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }
}
