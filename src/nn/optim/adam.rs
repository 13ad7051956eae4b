use crate::tensor::Tensor;

/// Adam optimizer with bias-corrected first and second moment estimates.
pub struct Adam {
    params: Vec<Tensor>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: u32,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(params: Vec<Tensor>, lr: f32) -> Self {
        Self::with_betas(params, lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(params: Vec<Tensor>, lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        let m = params
            .iter()
            .map(|p| vec![0.0; p.borrow().data.len()])
            .collect();
        let v = params
            .iter()
            .map(|p| vec![0.0; p.borrow().data.len()])
            .collect();
        Adam {
            params,
            lr,
            beta1,
            beta2,
            eps,
            t: 0,
            m,
            v,
        }
    }

    pub fn step(&mut self) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t as i32);
        let bc2 = 1.0 - self.beta2.powi(self.t as i32);

        for ((param, m), v) in self.params.iter().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            let mut p = param.borrow_mut();
            let Some(grad) = p.grad.clone() else { continue };

            for i in 0..p.data.len() {
                let g = grad[i];
                m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
                v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
                let m_hat = m[i] / bc1;
                let v_hat = v[i] / bc2;
                p.data[i] -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
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
    fn converges_on_quadratic() {
        let x = RawTensor::new(vec![5.0], &[1], true);
        let mut opt = Adam::new(vec![x.clone()], 0.5);
        for _ in 0..200 {
            opt.zero_grad();
            x.elem_mul(&x).backward();
            opt.step();
        }
        assert!(x.borrow().data[0].abs() < 1e-2);
    }

    #[test]
    fn first_step_size_is_roughly_lr() {
        // with a constant gradient the bias-corrected first step is ~lr
        let x = RawTensor::new(vec![10.0], &[1], true);
        x.borrow_mut().grad = Some(vec![3.0]);
        let mut opt = Adam::new(vec![x.clone()], 0.1);
        opt.step();
        assert!((x.borrow().data[0] - 9.9).abs() < 1e-3);
    }

    #[test]
    fn skips_params_without_grad() {
        let x = RawTensor::new(vec![1.0], &[1], true);
        let mut opt = Adam::new(vec![x.clone()], 0.1);
        opt.step();
        assert_eq!(x.borrow().data, vec![1.0]);
    }
}
