use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Elementwise binary operations with NumPy-style broadcasting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
}

impl BinaryOp {
    fn forward(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Max => a.max(b),
        }
    }

    /// Local derivatives (d/da, d/db) at the broadcast operand values.
    fn derivatives(self, a: f32, b: f32) -> (f32, f32) {
        match self {
            BinaryOp::Add => (1.0, 1.0),
            BinaryOp::Sub => (1.0, -1.0),
            BinaryOp::Mul => (b, a),
            BinaryOp::Div => (1.0 / b, -a / (b * b)),
            // Ties route to the first operand.
            BinaryOp::Max => {
                if a >= b {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                }
            }
        }
    }
}

/// Broadcast result shape of two shapes, right-aligned.
///
/// # Panics
/// Panics when a dimension pair is incompatible (neither equal nor 1).
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Vec<usize> {
    let ndim = a.len().max(b.len());
    let mut out = vec![0; ndim];
    for i in 0..ndim {
        let da = if i < ndim - a.len() { 1 } else { a[i - (ndim - a.len())] };
        let db = if i < ndim - b.len() { 1 } else { b[i - (ndim - b.len())] };
        assert!(
            da == db || da == 1 || db == 1,
            "shapes {a:?} and {b:?} are not broadcastable"
        );
        out[i] = da.max(db);
    }
    out
}

/// Materialise `data` (of `from` shape) expanded to `to` shape.
pub fn broadcast_to(data: &[f32], from: &[usize], to: &[usize]) -> Vec<f32> {
    if from == to {
        return data.to_vec();
    }
    let from_strides = RawTensor::compute_strides(from);
    let offset = to.len() - from.len();
    let out_size: usize = to.iter().product();
    let mut out = vec![0.0; out_size];

    for (i, slot) in out.iter_mut().enumerate() {
        let mut rem = i;
        let mut src = 0;
        for d in (0..to.len()).rev() {
            let c = rem % to[d];
            rem /= to[d];
            if d >= offset {
                let fd = d - offset;
                if from[fd] != 1 {
                    src += c * from_strides[fd];
                }
            }
        }
        *slot = data[src];
    }
    out
}

/// Reduce a gradient in the broadcast shape back down to the operand shape by
/// summing over the dimensions that were expanded.
pub fn sum_over_broadcast_dims(grad: &[f32], grad_shape: &[usize], target: &[usize]) -> Vec<f32> {
    if grad_shape == target {
        return grad.to_vec();
    }
    let target_strides = RawTensor::compute_strides(target);
    let offset = grad_shape.len() - target.len();
    let out_size: usize = target.iter().product();
    let mut out = vec![0.0; out_size];

    for (i, &g) in grad.iter().enumerate() {
        let mut rem = i;
        let mut dst = 0;
        for d in (0..grad_shape.len()).rev() {
            let c = rem % grad_shape[d];
            rem /= grad_shape[d];
            if d >= offset {
                let td = d - offset;
                if target[td] != 1 {
                    dst += c * target_strides[td];
                }
            }
        }
        out[dst] += g;
    }
    out
}

struct BinaryGradFn {
    op: BinaryOp,
}

impl GradFn for BinaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let a = parents[0].borrow();
        let b = parents[1].borrow();
        let out_shape = &out_grad.shape;

        let a_bc = broadcast_to(&a.data, &a.shape, out_shape);
        let b_bc = broadcast_to(&b.data, &b.shape, out_shape);

        let mut grad_a_bc = vec![0.0; out_grad.data.len()];
        let mut grad_b_bc = vec![0.0; out_grad.data.len()];
        for i in 0..out_grad.data.len() {
            let (da, db) = self.op.derivatives(a_bc[i], b_bc[i]);
            grad_a_bc[i] = da * out_grad.data[i];
            grad_b_bc[i] = db * out_grad.data[i];
        }

        let grad_a = if a.requires_grad {
            let g = sum_over_broadcast_dims(&grad_a_bc, out_shape, &a.shape);
            Some(RawTensor::new(g, &a.shape, false))
        } else {
            None
        };
        let grad_b = if b.requires_grad {
            let g = sum_over_broadcast_dims(&grad_b_bc, out_shape, &b.shape);
            Some(RawTensor::new(g, &b.shape, false))
        } else {
            None
        };
        vec![grad_a, grad_b]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(BinaryGradFn { op: self.op })
    }
}

fn apply_binary(a: &Tensor, b: &Tensor, op: BinaryOp) -> Tensor {
    let (out_data, out_shape, req_grad) = {
        let ra = a.borrow();
        let rb = b.borrow();
        let out_shape = broadcast_shape(&ra.shape, &rb.shape);
        let a_bc = broadcast_to(&ra.data, &ra.shape, &out_shape);
        let b_bc = broadcast_to(&rb.data, &rb.shape, &out_shape);
        let data: Vec<f32> = a_bc
            .iter()
            .zip(&b_bc)
            .map(|(&x, &y)| op.forward(x, y))
            .collect();
        (data, out_shape, ra.requires_grad || rb.requires_grad)
    };

    let out = RawTensor::new(out_data, &out_shape, req_grad);
    if req_grad {
        let mut o = out.borrow_mut();
        o.parents = vec![a.clone(), b.clone()];
        o.grad_fn = Some(Box::new(BinaryGradFn { op }));
    }
    out
}

impl RawTensor {
    pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
        apply_binary(a, b, BinaryOp::Add)
    }

    pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
        apply_binary(a, b, BinaryOp::Sub)
    }

    pub fn elem_mul(a: &Tensor, b: &Tensor) -> Tensor {
        apply_binary(a, b, BinaryOp::Mul)
    }

    pub fn div(a: &Tensor, b: &Tensor) -> Tensor {
        apply_binary(a, b, BinaryOp::Div)
    }

    /// Elementwise maximum; ties send the gradient to the first operand.
    pub fn max_elem(a: &Tensor, b: &Tensor) -> Tensor {
        apply_binary(a, b, BinaryOp::Max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn add_matching_shapes() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0], &[3], false);
        let b = RawTensor::new(vec![10.0, 20.0, 30.0], &[3], false);
        assert_eq!(a.add(&b).borrow().data, vec![11.0, 22.0, 33.0]);
    }

    #[test]
    fn broadcast_row_over_matrix() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let b = RawTensor::new(vec![10.0, 20.0, 30.0], &[1, 3], false);
        let c = a.add(&b);
        assert_eq!(c.borrow().shape, vec![2, 3]);
        assert_eq!(c.borrow().data, vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn broadcast_gradient_sums_over_expanded_dim() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let b = RawTensor::new(vec![5.0, 7.0], &[1, 2], true);
        let c = a.elem_mul(&b);
        c.sum().backward();
        assert_eq!(a.grad().unwrap(), vec![5.0, 7.0, 5.0, 7.0]);
        // db gets the column sums of a
        assert_eq!(b.grad().unwrap(), vec![4.0, 6.0]);
    }

    #[test]
    fn div_gradcheck() {
        let a = RawTensor::new(vec![1.0, 2.0, -0.5, 3.0], &[2, 2], true);
        let b = RawTensor::new(vec![2.0, 4.0, 1.5, -2.0], &[2, 2], false);
        assert!(RawTensor::check_gradients_simple(&a, |t| t.div(&b).sum()));
    }

    #[test]
    fn max_elem_routes_grad_to_larger() {
        let a = RawTensor::new(vec![1.0, 5.0], &[2], true);
        let b = RawTensor::new(vec![3.0, 2.0], &[2], true);
        let c = a.max_elem(&b);
        c.sum().backward();
        assert_eq!(a.grad().unwrap(), vec![0.0, 1.0]);
        assert_eq!(b.grad().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "not broadcastable")]
    fn incompatible_shapes_panic() {
        let a = RawTensor::zeros(&[2, 3]);
        let b = RawTensor::zeros(&[2, 4]);
        a.add(&b);
    }
}
