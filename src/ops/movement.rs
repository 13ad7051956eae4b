use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Shape/layout operations. Each backward pass undoes the forward movement.
#[derive(Clone, Debug, PartialEq)]
pub enum MovementOp {
    Reshape(Vec<usize>),
    Permute(Vec<usize>),
    Pad(Vec<(usize, usize)>),
    Shrink(Vec<(usize, usize)>),
}

impl RawTensor {
    /// Row-major strides for a shape.
    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * shape[d + 1];
        }
        strides
    }
}

fn permute_data(data: &[f32], shape: &[usize], axes: &[usize]) -> (Vec<f32>, Vec<usize>) {
    let out_shape: Vec<usize> = axes.iter().map(|&a| shape[a]).collect();
    let in_strides = RawTensor::compute_strides(shape);
    let mut out = vec![0.0; data.len()];

    for (i, slot) in out.iter_mut().enumerate() {
        let mut rem = i;
        let mut src = 0;
        for d in (0..out_shape.len()).rev() {
            let c = rem % out_shape[d];
            rem /= out_shape[d];
            src += c * in_strides[axes[d]];
        }
        *slot = data[src];
    }
    (out, out_shape)
}

fn pad_data(data: &[f32], shape: &[usize], padding: &[(usize, usize)]) -> (Vec<f32>, Vec<usize>) {
    let out_shape: Vec<usize> = shape
        .iter()
        .zip(padding)
        .map(|(&s, &(b, a))| s + b + a)
        .collect();
    let out_strides = RawTensor::compute_strides(&out_shape);
    let mut out = vec![0.0; out_shape.iter().product()];

    for (i, &v) in data.iter().enumerate() {
        let mut rem = i;
        let mut dst = 0;
        for d in (0..shape.len()).rev() {
            let c = rem % shape[d];
            rem /= shape[d];
            dst += (c + padding[d].0) * out_strides[d];
        }
        out[dst] = v;
    }
    (out, out_shape)
}

fn shrink_data(data: &[f32], shape: &[usize], ranges: &[(usize, usize)]) -> (Vec<f32>, Vec<usize>) {
    let out_shape: Vec<usize> = ranges.iter().map(|&(s, e)| e - s).collect();
    let in_strides = RawTensor::compute_strides(shape);
    let mut out = vec![0.0; out_shape.iter().product()];

    for (i, slot) in out.iter_mut().enumerate() {
        let mut rem = i;
        let mut src = 0;
        for d in (0..out_shape.len()).rev() {
            let c = rem % out_shape[d];
            rem /= out_shape[d];
            src += (c + ranges[d].0) * in_strides[d];
        }
        *slot = data[src];
    }
    (out, out_shape)
}

struct MovementGradFn {
    op: MovementOp,
    input_shape: Vec<usize>,
}

impl GradFn for MovementGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        if !parents[0].borrow().requires_grad {
            return vec![None];
        }
        let (data, shape) = match &self.op {
            MovementOp::Reshape(_) => (out_grad.data.clone(), self.input_shape.clone()),
            MovementOp::Permute(axes) => {
                let mut inverse = vec![0; axes.len()];
                for (d, &a) in axes.iter().enumerate() {
                    inverse[a] = d;
                }
                permute_data(&out_grad.data, &out_grad.shape, &inverse)
            }
            MovementOp::Pad(padding) => {
                let ranges: Vec<(usize, usize)> = self
                    .input_shape
                    .iter()
                    .zip(padding)
                    .map(|(&s, &(b, _))| (b, b + s))
                    .collect();
                shrink_data(&out_grad.data, &out_grad.shape, &ranges)
            }
            MovementOp::Shrink(ranges) => {
                let padding: Vec<(usize, usize)> = self
                    .input_shape
                    .iter()
                    .zip(ranges)
                    .map(|(&s, &(start, end))| (start, s - end))
                    .collect();
                pad_data(&out_grad.data, &out_grad.shape, &padding)
            }
        };
        vec![Some(RawTensor::new(data, &shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MovementGradFn {
            op: self.op.clone(),
            input_shape: self.input_shape.clone(),
        })
    }
}

fn apply_movement(t: &Tensor, op: MovementOp) -> Tensor {
    let (data, out_shape, input_shape, req_grad) = {
        let s = t.borrow();
        let (data, out_shape) = match &op {
            MovementOp::Reshape(new_shape) => {
                assert_eq!(
                    s.data.len(),
                    new_shape.iter().product::<usize>(),
                    "cannot reshape {:?} to {:?}",
                    s.shape,
                    new_shape
                );
                (s.data.clone(), new_shape.clone())
            }
            MovementOp::Permute(axes) => {
                assert_eq!(axes.len(), s.shape.len(), "permute rank mismatch");
                permute_data(&s.data, &s.shape, axes)
            }
            MovementOp::Pad(padding) => {
                assert_eq!(padding.len(), s.shape.len(), "pad rank mismatch");
                pad_data(&s.data, &s.shape, padding)
            }
            MovementOp::Shrink(ranges) => {
                assert_eq!(ranges.len(), s.shape.len(), "shrink rank mismatch");
                for (d, &(start, end)) in ranges.iter().enumerate() {
                    assert!(
                        start < end && end <= s.shape[d],
                        "invalid shrink range ({start}, {end}) for dim {d} of {:?}",
                        s.shape
                    );
                }
                shrink_data(&s.data, &s.shape, ranges)
            }
        };
        (data, out_shape, s.shape.clone(), s.requires_grad)
    };

    let out = RawTensor::new(data, &out_shape, req_grad);
    if req_grad {
        let mut o = out.borrow_mut();
        o.parents = vec![t.clone()];
        o.grad_fn = Some(Box::new(MovementGradFn { op, input_shape }));
    }
    out
}

impl RawTensor {
    pub fn reshape(t: &Tensor, new_shape: &[usize]) -> Tensor {
        apply_movement(t, MovementOp::Reshape(new_shape.to_vec()))
    }

    pub fn permute(t: &Tensor, axes: &[usize]) -> Tensor {
        apply_movement(t, MovementOp::Permute(axes.to_vec()))
    }

    /// Zero-pad each dimension by (before, after).
    pub fn pad(t: &Tensor, padding: &[(usize, usize)]) -> Tensor {
        apply_movement(t, MovementOp::Pad(padding.to_vec()))
    }

    /// Slice each dimension to the half-open range (start, end).
    pub fn shrink(t: &Tensor, ranges: &[(usize, usize)]) -> Tensor {
        apply_movement(t, MovementOp::Shrink(ranges.to_vec()))
    }
}

/// Gradient for concatenation: slice the output grad back per input.
struct CatGradFn {
    dim: usize,
    sizes: Vec<usize>,
}

impl GradFn for CatGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let mut grads = Vec::with_capacity(parents.len());
        let mut offset = 0;
        for (p, &size) in parents.iter().zip(&self.sizes) {
            let ranges: Vec<(usize, usize)> = out_grad
                .shape
                .iter()
                .enumerate()
                .map(|(d, &s)| if d == self.dim { (offset, offset + size) } else { (0, s) })
                .collect();
            offset += size;
            if p.borrow().requires_grad {
                let (data, shape) = shrink_data(&out_grad.data, &out_grad.shape, &ranges);
                grads.push(Some(RawTensor::new(data, &shape, false)));
            } else {
                grads.push(None);
            }
        }
        grads
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(CatGradFn {
            dim: self.dim,
            sizes: self.sizes.clone(),
        })
    }
}

impl RawTensor {
    /// Concatenate tensors along `dim`. All inputs must agree on every other
    /// dimension.
    pub fn cat(tensors: &[Tensor], dim: usize) -> Tensor {
        assert!(!tensors.is_empty(), "cat requires at least one tensor");
        let base_shape = tensors[0].borrow().shape.clone();
        assert!(dim < base_shape.len(), "cat dim out of bounds");

        let mut sizes = Vec::with_capacity(tensors.len());
        let mut out_dim = 0;
        let mut req_grad = false;
        for t in tensors {
            let s = t.borrow();
            assert_eq!(s.shape.len(), base_shape.len(), "cat rank mismatch");
            for d in 0..base_shape.len() {
                if d != dim {
                    assert_eq!(s.shape[d], base_shape[d], "cat shape mismatch on dim {d}");
                }
            }
            sizes.push(s.shape[dim]);
            out_dim += s.shape[dim];
            req_grad |= s.requires_grad;
        }

        let mut out_shape = base_shape.clone();
        out_shape[dim] = out_dim;
        let out_strides = Self::compute_strides(&out_shape);
        let mut out_data = vec![0.0; out_shape.iter().product()];

        let mut offset = 0;
        for (t, &size) in tensors.iter().zip(&sizes) {
            let s = t.borrow();
            let mut shape = base_shape.clone();
            shape[dim] = size;
            for (i, &v) in s.data.iter().enumerate() {
                let mut rem = i;
                let mut dst = 0;
                for d in (0..shape.len()).rev() {
                    let mut c = rem % shape[d];
                    rem /= shape[d];
                    if d == dim {
                        c += offset;
                    }
                    dst += c * out_strides[d];
                }
                out_data[dst] = v;
            }
            offset += size;
        }

        let out = Self::new(out_data, &out_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = tensors.to_vec();
            o.grad_fn = Some(Box::new(CatGradFn { dim, sizes }));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn reshape_roundtrip_gradient() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true);
        let y = x.reshape(&[3, 2]);
        assert_eq!(y.borrow().shape, vec![3, 2]);
        y.sum().backward();
        assert_eq!(x.grad().unwrap(), vec![1.0; 6]);
    }

    #[test]
    fn permute_transposes_2d() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let y = x.permute(&[1, 0]);
        assert_eq!(y.borrow().shape, vec![3, 2]);
        assert_eq!(y.borrow().data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn permute_gradient_inverts() {
        let x = RawTensor::new(vec![0.5, -1.0, 2.0, 3.0, -0.5, 1.0], &[2, 3], true);
        let w = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2], false);
        let y = x.permute(&[1, 0]).elem_mul(&w);
        y.sum().backward();
        // grad in original layout is the permuted weight
        assert_eq!(x.grad().unwrap(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn pad_then_shrink_recovers() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], false);
        let padded = x.pad(&[(1, 1), (0, 2)]);
        assert_eq!(padded.borrow().shape, vec![4, 4]);
        let back = padded.shrink(&[(1, 3), (0, 2)]);
        assert_eq!(back.borrow().data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn pad_gradient_drops_border() {
        let x = RawTensor::new(vec![1.0, 2.0], &[2], true);
        let y = x.pad(&[(1, 1)]);
        assert_eq!(y.borrow().data, vec![0.0, 1.0, 2.0, 0.0]);
        y.sum().backward();
        assert_eq!(x.grad().unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn cat_dim1_values_and_grads() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let b = RawTensor::new(vec![5.0, 6.0], &[2, 1], true);
        let c = RawTensor::cat(&[a.clone(), b.clone()], 1);
        assert_eq!(c.borrow().shape, vec![2, 3]);
        assert_eq!(c.borrow().data, vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let w = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        c.elem_mul(&w).sum().backward();
        assert_eq!(a.grad().unwrap(), vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(b.grad().unwrap(), vec![3.0, 6.0]);
    }

    #[test]
    #[should_panic(expected = "cannot reshape")]
    fn reshape_size_mismatch_panics() {
        let x = RawTensor::zeros(&[2, 3]);
        x.reshape(&[4, 2]);
    }
}
