use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Full reductions to a scalar (shape [1]).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReduceOp {
    Sum,
    Mean,
    Max,
}

struct ReduceGradFn {
    op: ReduceOp,
    // winner index for Max
    argmax: usize,
}

impl GradFn for ReduceGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let p = parents[0].borrow();
        if !p.requires_grad {
            return vec![None];
        }
        let g = out_grad.data[0];
        let n = p.data.len();
        let grad = match self.op {
            ReduceOp::Sum => vec![g; n],
            ReduceOp::Mean => vec![g / n as f32; n],
            ReduceOp::Max => {
                let mut grad = vec![0.0; n];
                grad[self.argmax] = g;
                grad
            }
        };
        vec![Some(RawTensor::new(grad, &p.shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(ReduceGradFn {
            op: self.op,
            argmax: self.argmax,
        })
    }
}

fn apply_reduce(t: &Tensor, op: ReduceOp) -> Tensor {
    let (value, argmax, req_grad) = {
        let s = t.borrow();
        assert!(!s.data.is_empty(), "cannot reduce an empty tensor");
        match op {
            ReduceOp::Sum => (s.data.iter().sum(), 0, s.requires_grad),
            ReduceOp::Mean => (
                s.data.iter().sum::<f32>() / s.data.len() as f32,
                0,
                s.requires_grad,
            ),
            ReduceOp::Max => {
                let mut best = 0;
                for (i, &v) in s.data.iter().enumerate() {
                    if v > s.data[best] {
                        best = i;
                    }
                }
                (s.data[best], best, s.requires_grad)
            }
        }
    };

    let out = RawTensor::new(vec![value], &[1], req_grad);
    if req_grad {
        let mut o = out.borrow_mut();
        o.parents = vec![t.clone()];
        o.grad_fn = Some(Box::new(ReduceGradFn { op, argmax }));
    }
    out
}

impl RawTensor {
    pub fn sum(t: &Tensor) -> Tensor {
        apply_reduce(t, ReduceOp::Sum)
    }

    pub fn mean(t: &Tensor) -> Tensor {
        apply_reduce(t, ReduceOp::Mean)
    }

    pub fn max_reduce(t: &Tensor) -> Tensor {
        apply_reduce(t, ReduceOp::Max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn sum_and_mean_values() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        assert_eq!(x.sum().borrow().data, vec![10.0]);
        assert_eq!(x.mean().borrow().data, vec![2.5]);
    }

    #[test]
    fn mean_gradient_is_uniform() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[4], true);
        x.mean().backward();
        assert_eq!(x.grad().unwrap(), vec![0.25; 4]);
    }

    #[test]
    fn max_gradient_hits_argmax_only() {
        let x = RawTensor::new(vec![1.0, 7.0, 3.0], &[3], true);
        let m = x.max_reduce();
        assert_eq!(m.borrow().data, vec![7.0]);
        m.backward();
        assert_eq!(x.grad().unwrap(), vec![0.0, 1.0, 0.0]);
    }
}
