use crate::nn::Module;
use crate::tensor::{with_rng, RawTensor, Tensor, TensorOps};
use rand::Rng;

/// Inverted dropout: surviving activations are scaled by 1/(1-p) during
/// training so evaluation needs no rescaling.
///
/// The probability is deliberately unclamped. p <= 0 is a pass-through,
/// p >= 1 zeroes the output, values in between behave as usual. Callers that
/// want strict validation do it at a higher level.
pub struct Dropout {
    p: f32,
    training: bool,
}

impl Dropout {
    pub fn new(p: f32) -> Self {
        Dropout { p, training: true }
    }

    pub fn p(&self) -> f32 {
        self.p
    }
}

impl Module for Dropout {
    fn forward(&self, input: &Tensor) -> Tensor {
        if !self.training || self.p <= 0.0 {
            return input.clone();
        }
        let keep = 1.0 - self.p;
        let shape = input.borrow().shape.clone();
        if keep <= 0.0 {
            return input.elem_mul(&RawTensor::zeros(&shape));
        }

        let size: usize = shape.iter().product();
        let mask: Vec<f32> = with_rng(|rng| {
            (0..size)
                .map(|_| if rng.random::<f32>() < keep { 1.0 / keep } else { 0.0 })
                .collect()
        });
        input.elem_mul(&RawTensor::from_vec(mask, &shape))
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::seed_rng;

    #[test]
    fn eval_mode_is_identity() {
        let mut d = Dropout::new(0.5);
        d.eval();
        let x = RawTensor::rand(&[10]);
        let y = d.forward(&x);
        assert_eq!(y.borrow().data, x.borrow().data);
    }

    #[test]
    fn zero_probability_is_identity() {
        let d = Dropout::new(0.0);
        let x = RawTensor::rand(&[10]);
        assert_eq!(d.forward(&x).borrow().data, x.borrow().data);
    }

    #[test]
    fn probability_one_zeroes_everything() {
        let d = Dropout::new(1.0);
        let x = RawTensor::ones(&[20]);
        assert!(d.forward(&x).borrow().data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn surviving_values_are_rescaled() {
        seed_rng(11);
        let d = Dropout::new(0.5);
        let x = RawTensor::ones(&[1000]);
        let y = d.forward(&x);
        let data = &y.borrow().data;
        assert!(data.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        let kept = data.iter().filter(|&&v| v != 0.0).count();
        assert!(kept > 400 && kept < 600, "kept {kept} of 1000 at p=0.5");
    }

    #[test]
    fn out_of_range_probability_is_tolerated() {
        let d = Dropout::new(-0.3);
        let x = RawTensor::rand(&[5]);
        assert_eq!(d.forward(&x).borrow().data, x.borrow().data);

        let d = Dropout::new(1.7);
        assert!(d.forward(&x).borrow().data.iter().all(|&v| v == 0.0));
    }
}
