use crate::nn::Module;
use crate::tensor::{Tensor, TensorOps};

/// Collapse everything after the batch dimension: (B, ...) -> (B, prod).
pub struct Flatten;

impl Module for Flatten {
    fn forward(&self, input: &Tensor) -> Tensor {
        let shape = input.borrow().shape.clone();
        assert!(!shape.is_empty(), "flatten expects a batched tensor");
        let rest: usize = shape[1..].iter().product();
        input.reshape(&[shape[0], rest])
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::RawTensor;

    #[test]
    fn flattens_conv_output() {
        let x = RawTensor::rand(&[2, 3, 4, 5]);
        let y = Flatten.forward(&x);
        assert_eq!(y.borrow().shape, vec![2, 60]);
    }

    #[test]
    fn two_dim_input_unchanged() {
        let x = RawTensor::rand(&[4, 7]);
        let y = Flatten.forward(&x);
        assert_eq!(y.borrow().shape, vec![4, 7]);
    }
}
