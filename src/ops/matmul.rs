use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor, TensorOps};

fn matmul_data(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let av = a[i * k + p];
            if av == 0.0 {
                continue;
            }
            for j in 0..n {
                out[i * n + j] += av * b[p * n + j];
            }
        }
    }
    out
}

/// dA = dC @ B^T, dB = A^T @ dC.
struct MatMulGradFn;

impl GradFn for MatMulGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let a = parents[0].borrow();
        let b = parents[1].borrow();
        let (m, k) = (a.shape[0], a.shape[1]);
        let n = b.shape[1];

        let grad_a = if a.requires_grad {
            let (bt, _) = transpose_data(&b.data, k, n);
            let g = matmul_data(&out_grad.data, &bt, m, n, k);
            Some(RawTensor::new(g, &[m, k], false))
        } else {
            None
        };
        let grad_b = if b.requires_grad {
            let (at, _) = transpose_data(&a.data, m, k);
            let g = matmul_data(&at, &out_grad.data, k, m, n);
            Some(RawTensor::new(g, &[k, n], false))
        } else {
            None
        };
        vec![grad_a, grad_b]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MatMulGradFn)
    }
}

fn transpose_data(data: &[f32], rows: usize, cols: usize) -> (Vec<f32>, Vec<usize>) {
    let mut out = vec![0.0; data.len()];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    (out, vec![cols, rows])
}

impl RawTensor {
    /// 2D matrix multiply: (m, k) @ (k, n) -> (m, n).
    ///
    /// # Panics
    /// Panics if either operand is not 2D or the inner dimensions disagree.
    pub fn matmul(a: &Tensor, b: &Tensor) -> Tensor {
        let (data, m, n, req_grad) = {
            let ra = a.borrow();
            let rb = b.borrow();
            assert_eq!(ra.shape.len(), 2, "matmul expects a 2D left operand");
            assert_eq!(rb.shape.len(), 2, "matmul expects a 2D right operand");
            assert_eq!(
                ra.shape[1], rb.shape[0],
                "matmul inner dimension mismatch: {:?} @ {:?}",
                ra.shape, rb.shape
            );
            let (m, k, n) = (ra.shape[0], ra.shape[1], rb.shape[1]);
            (
                matmul_data(&ra.data, &rb.data, m, k, n),
                m,
                n,
                ra.requires_grad || rb.requires_grad,
            )
        };

        let out = Self::new(data, &[m, n], req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![a.clone(), b.clone()];
            o.grad_fn = Some(Box::new(MatMulGradFn));
        }
        out
    }

    /// 2D transpose, differentiable via permute.
    pub fn transpose(t: &Tensor) -> Tensor {
        assert_eq!(t.borrow().shape.len(), 2, "transpose expects a 2D tensor");
        t.permute(&[1, 0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_values() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let b = RawTensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2], false);
        let c = a.matmul(&b);
        assert_eq!(c.borrow().shape, vec![2, 2]);
        assert_eq!(c.borrow().data, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_gradients() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], true);
        let b = RawTensor::new(vec![5.0, 6.0, 7.0, 8.0], &[2, 2], true);
        a.matmul(&b).sum().backward();
        // dA = ones @ B^T, dB = A^T @ ones
        assert_eq!(a.grad().unwrap(), vec![11.0, 15.0, 11.0, 15.0]);
        assert_eq!(b.grad().unwrap(), vec![4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn matmul_gradcheck() {
        let a = RawTensor::new(vec![0.5, -1.0, 2.0, 0.3, 1.1, -0.7], &[2, 3], true);
        let b = RawTensor::new(vec![1.0, 0.2, -0.4, 0.8, 0.6, -1.2], &[3, 2], false);
        assert!(RawTensor::check_gradients_simple(&a, |t| t.matmul(&b).sum()));
    }

    #[test]
    #[should_panic(expected = "inner dimension mismatch")]
    fn matmul_shape_mismatch_panics() {
        let a = RawTensor::zeros(&[2, 3]);
        let b = RawTensor::zeros(&[4, 2]);
        a.matmul(&b);
    }

    #[test]
    fn transpose_is_differentiable() {
        let a = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], true);
        let t = a.transpose();
        assert_eq!(t.borrow().shape, vec![3, 2]);
        t.sum().backward();
        assert_eq!(a.grad().unwrap(), vec![1.0; 6]);
    }
}
