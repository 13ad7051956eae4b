use crate::tensor::Tensor;

/// Stochastic gradient descent with optional momentum and weight decay.
pub struct SGD {
    params: Vec<Tensor>,
    lr: f32,
    momentum: f32,
    weight_decay: f32,
    velocities: Vec<Vec<f32>>,
}

impl SGD {
    pub fn new(params: Vec<Tensor>, lr: f32) -> Self {
        Self::with_options(params, lr, 0.0, 0.0)
    }

    pub fn with_options(params: Vec<Tensor>, lr: f32, momentum: f32, weight_decay: f32) -> Self {
        let velocities = params
            .iter()
            .map(|p| vec![0.0; p.borrow().data.len()])
            .collect();
        SGD {
            params,
            lr,
            momentum,
            weight_decay,
            velocities,
        }
    }

    pub fn step(&mut self) {
        for (param, velocity) in self.params.iter().zip(self.velocities.iter_mut()) {
            let mut p = param.borrow_mut();
            let Some(grad) = p.grad.clone() else { continue };

            for i in 0..p.data.len() {
                let mut g = grad[i];
                if self.weight_decay != 0.0 {
                    g += self.weight_decay * p.data[i];
                }
                if self.momentum != 0.0 {
                    velocity[i] = self.momentum * velocity[i] + g;
                    g = velocity[i];
                }
                p.data[i] -= self.lr * g;
            }
        }
    }

    pub fn zero_grad(&self) {
        for param in &self.params {
            param.borrow_mut().grad = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn single_step_moves_against_gradient() {
        let p = RawTensor::new(vec![1.0, 2.0], &[2], true);
        p.borrow_mut().grad = Some(vec![0.5, -1.0]);
        let mut opt = SGD::new(vec![p.clone()], 0.1);
        opt.step();
        let data = &p.borrow().data;
        assert!((data[0] - 0.95).abs() < 1e-6);
        assert!((data[1] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn converges_on_quadratic() {
        let x = RawTensor::new(vec![5.0], &[1], true);
        let mut opt = SGD::new(vec![x.clone()], 0.1);
        for _ in 0..100 {
            opt.zero_grad();
            x.elem_mul(&x).backward();
            opt.step();
        }
        assert!(x.borrow().data[0].abs() < 1e-3);
    }

    #[test]
    fn momentum_accelerates() {
        let slow = RawTensor::new(vec![5.0], &[1], true);
        let fast = RawTensor::new(vec![5.0], &[1], true);
        let mut plain = SGD::new(vec![slow.clone()], 0.01);
        let mut with_momentum = SGD::with_options(vec![fast.clone()], 0.01, 0.9, 0.0);
        for _ in 0..20 {
            plain.zero_grad();
            slow.elem_mul(&slow).backward();
            plain.step();
            with_momentum.zero_grad();
            fast.elem_mul(&fast).backward();
            with_momentum.step();
        }
        assert!(fast.borrow().data[0].abs() < slow.borrow().data[0].abs());
    }
}
