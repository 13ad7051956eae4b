use crate::autograd::GradFn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;
use std::rc::Rc;

/// Reference-counted, interior-mutable tensor handle.
///
/// Computation graphs need shared references to parent tensors, and gradient
/// accumulation needs mutation through those references, so the public tensor
/// type is `Rc<RefCell<RawTensor>>`. Single-threaded by design; see the crate
/// docs for the concurrency model.
pub type Tensor = Rc<RefCell<RawTensor>>;

/// Core tensor: flat row-major `f32` data plus gradient bookkeeping.
pub struct RawTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub grad: Option<Vec<f32>>,
    pub requires_grad: bool,
    pub grad_fn: Option<Box<dyn GradFn>>,
    pub parents: Vec<Tensor>,
}

impl Clone for RawTensor {
    fn clone(&self) -> Self {
        RawTensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: self.grad.clone(),
            requires_grad: self.requires_grad,
            grad_fn: self.grad_fn.as_ref().map(|g| g.clone_box()),
            parents: self.parents.clone(),
        }
    }
}

impl std::fmt::Debug for RawTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .field("has_grad", &self.grad.is_some())
            .finish()
    }
}

// ===== RNG =====

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_os_rng());
}

/// Run a closure with the thread-local RNG used by all random constructors.
pub fn with_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    RNG.with(|rng| f(&mut rng.borrow_mut()))
}

/// Reseed the thread-local RNG. Tests use this for determinism.
pub fn seed_rng(seed: u64) {
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed));
}

// ===== CONSTRUCTORS =====

impl RawTensor {
    /// Create a tensor from data and shape.
    ///
    /// # Panics
    /// Panics if `data.len()` does not equal the product of `shape`.
    pub fn new(data: Vec<f32>, shape: &[usize], requires_grad: bool) -> Tensor {
        assert_eq!(
            data.len(),
            shape.iter().product::<usize>(),
            "data length must match shape"
        );
        Rc::new(RefCell::new(RawTensor {
            data,
            shape: shape.to_vec(),
            grad: None,
            requires_grad,
            grad_fn: None,
            parents: vec![],
        }))
    }

    pub fn zeros(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![0.0; size], shape, false)
    }

    pub fn ones(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![1.0; size], shape, false)
    }

    /// Tensor filled with a single constant value.
    pub fn constant(value: f32, shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        Self::new(vec![value; size], shape, false)
    }

    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Tensor {
        Self::new(data, shape, false)
    }

    /// Uniform values in [0, 1).
    pub fn rand(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        let data: Vec<f32> = with_rng(|rng| (0..size).map(|_| rng.random::<f32>()).collect());
        Self::new(data, shape, false)
    }

    /// Standard normal N(0, 1) values.
    pub fn randn(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        let normal = Normal::new(0.0f32, 1.0).unwrap();
        let data: Vec<f32> = with_rng(|rng| (0..size).map(|_| normal.sample(rng)).collect());
        Self::new(data, shape, false)
    }
}

// ===== WEIGHT INITIALISATION =====

/// Fan-in / fan-out for a weight shape.
///
/// Linear weights are (in, out); conv weights are (out_ch, in_ch, kh, kw)
/// where the fans include the kernel area.
fn fans(shape: &[usize]) -> (usize, usize) {
    match shape.len() {
        2 => (shape[0], shape[1]),
        4 => {
            let receptive = shape[2] * shape[3];
            (shape[1] * receptive, shape[0] * receptive)
        }
        _ => {
            let n = shape.iter().product::<usize>().max(1);
            (n, n)
        }
    }
}

impl RawTensor {
    /// Xavier/Glorot uniform: U(-limit, limit), limit = sqrt(6 / (fan_in + fan_out)).
    pub fn xavier_uniform(shape: &[usize]) -> Tensor {
        let (fan_in, fan_out) = fans(shape);
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        let size = shape.iter().product();
        let data: Vec<f32> =
            with_rng(|rng| (0..size).map(|_| rng.random_range(-limit..limit)).collect());
        Self::new(data, shape, false)
    }

    /// He/Kaiming normal: N(0, sqrt(2 / fan_in)). Suited to ReLU networks.
    pub fn kaiming_normal(shape: &[usize]) -> Tensor {
        let (fan_in, _) = fans(shape);
        let std = (2.0 / fan_in as f32).sqrt();
        let normal = Normal::new(0.0f32, std).unwrap();
        let size = shape.iter().product();
        let data: Vec<f32> = with_rng(|rng| (0..size).map(|_| normal.sample(rng)).collect());
        Self::new(data, shape, false)
    }

    /// Small uniform init: U(-0.05, 0.05).
    pub fn uniform_init(shape: &[usize]) -> Tensor {
        let size = shape.iter().product();
        let data: Vec<f32> =
            with_rng(|rng| (0..size).map(|_| rng.random_range(-0.05..0.05)).collect());
        Self::new(data, shape, false)
    }

    /// Small normal init: N(0, 0.05).
    pub fn normal_init(shape: &[usize]) -> Tensor {
        let normal = Normal::new(0.0f32, 0.05).unwrap();
        let size = shape.iter().product();
        let data: Vec<f32> = with_rng(|rng| (0..size).map(|_| normal.sample(rng)).collect());
        Self::new(data, shape, false)
    }
}

// ===== LOSS FUNCTIONS =====

impl RawTensor {
    pub fn mse_loss(pred: &Tensor, target: &Tensor) -> Tensor {
        let diff = pred.sub(target);
        diff.elem_mul(&diff).mean()
    }

    /// Cross entropy over logits with one-hot targets:
    /// -mean(sum(targets * log(softmax(logits)), dim=1)).
    pub fn cross_entropy_loss(logits: &Tensor, targets: &Tensor) -> Tensor {
        let probs = Self::softmax(logits, 1);
        let log_probs = probs.log();
        let picked = targets.elem_mul(&log_probs);
        Self::sum_dim(&picked, 1, false).neg().mean()
    }
}

// ===== AXIS REDUCTIONS =====

fn index_to_coords(idx: usize, shape: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; shape.len()];
    let mut rem = idx;
    for d in (0..shape.len()).rev() {
        coords[d] = rem % shape[d];
        rem /= shape[d];
    }
    coords
}

/// Gradient for sum along a dim: broadcast the output grad back over the
/// reduced dimension.
struct SumDimGradFn {
    input_shape: Vec<usize>,
    dim: usize,
    keepdim: bool,
}

impl GradFn for SumDimGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let mut reduced_shape = out_grad.shape.clone();
        if !self.keepdim {
            reduced_shape.insert(self.dim, 1);
        }
        let reduced_strides = RawTensor::compute_strides(&reduced_shape);

        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (i, slot) in grad.iter_mut().enumerate() {
            let mut coords = index_to_coords(i, &self.input_shape);
            coords[self.dim] = 0;
            let idx: usize = coords.iter().zip(&reduced_strides).map(|(c, s)| c * s).sum();
            *slot = out_grad.data[idx];
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(SumDimGradFn {
            input_shape: self.input_shape.clone(),
            dim: self.dim,
            keepdim: self.keepdim,
        })
    }
}

/// Gradient for max along a dim: only the winning elements receive grad.
#[derive(Clone)]
struct MaxDimGradFn {
    input_shape: Vec<usize>,
    max_indices: Vec<usize>,
}

impl GradFn for MaxDimGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (out_idx, &src_idx) in self.max_indices.iter().enumerate() {
            grad[src_idx] += out_grad.data[out_idx];
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(self.clone())
    }
}

impl RawTensor {
    /// Sum along one axis. `keepdim` keeps the reduced axis as size 1.
    pub fn sum_dim(t: &Tensor, dim: usize, keepdim: bool) -> Tensor {
        let (data, shape, req_grad) = {
            let s = t.borrow();
            assert!(
                dim < s.shape.len(),
                "dim {} out of bounds for shape {:?}",
                dim,
                s.shape
            );
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };

        let mut out_shape = shape.clone();
        out_shape[dim] = 1;
        let out_strides = Self::compute_strides(&out_shape);
        let mut result = vec![0.0; out_shape.iter().product()];

        for (i, &v) in data.iter().enumerate() {
            let mut coords = index_to_coords(i, &shape);
            coords[dim] = 0;
            let idx: usize = coords.iter().zip(&out_strides).map(|(c, s)| c * s).sum();
            result[idx] += v;
        }

        let final_shape: Vec<usize> = if keepdim {
            out_shape
        } else {
            out_shape
                .iter()
                .enumerate()
                .filter(|(d, _)| *d != dim)
                .map(|(_, &sz)| sz)
                .collect()
        };

        let out = Self::new(result, &final_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![t.clone()];
            o.grad_fn = Some(Box::new(SumDimGradFn {
                input_shape: shape,
                dim,
                keepdim,
            }));
        }
        out
    }

    /// Max along one axis, tracking winner indices for the backward pass.
    pub fn max_dim(t: &Tensor, dim: usize, keepdim: bool) -> Tensor {
        let (data, shape, req_grad) = {
            let s = t.borrow();
            assert!(
                dim < s.shape.len(),
                "dim {} out of bounds for shape {:?}",
                dim,
                s.shape
            );
            (s.data.clone(), s.shape.clone(), s.requires_grad)
        };

        let mut out_shape = shape.clone();
        out_shape[dim] = 1;
        let out_strides = Self::compute_strides(&out_shape);
        let out_size: usize = out_shape.iter().product();
        let mut result = vec![f32::NEG_INFINITY; out_size];
        let mut max_indices = vec![0usize; out_size];

        for (i, &v) in data.iter().enumerate() {
            let mut coords = index_to_coords(i, &shape);
            coords[dim] = 0;
            let idx: usize = coords.iter().zip(&out_strides).map(|(c, s)| c * s).sum();
            if v > result[idx] {
                result[idx] = v;
                max_indices[idx] = i;
            }
        }

        let final_shape: Vec<usize> = if keepdim {
            out_shape
        } else {
            out_shape
                .iter()
                .enumerate()
                .filter(|(d, _)| *d != dim)
                .map(|(_, &sz)| sz)
                .collect()
        };

        let out = Self::new(result, &final_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![t.clone()];
            o.grad_fn = Some(Box::new(MaxDimGradFn {
                input_shape: shape,
                max_indices,
            }));
        }
        out
    }

    /// Numerically stable softmax along one axis.
    pub fn softmax(t: &Tensor, dim: usize) -> Tensor {
        let max = Self::max_dim(t, dim, true);
        let shifted = t.sub(&max);
        let exp = shifted.exp();
        let total = Self::sum_dim(&exp, dim, true);
        exp.div(&total)
    }

    /// Mean along one axis, as sum / size.
    pub fn mean_dim(t: &Tensor, dim: usize, keepdim: bool) -> Tensor {
        let n = {
            let s = t.borrow();
            assert!(dim < s.shape.len(), "dim out of bounds");
            s.shape[dim] as f32
        };
        let sum = Self::sum_dim(t, dim, keepdim);
        sum.div(&Self::constant(n, &[1]))
    }
}

// ===== NUMERICAL GRADIENT CHECKING =====

impl RawTensor {
    /// Compare analytical gradients against central finite differences.
    ///
    /// Returns (max_relative_error, mean_relative_error, passed).
    pub fn check_gradients<F>(
        tensor: &Tensor,
        loss_fn: F,
        epsilon: f32,
        tolerance: f32,
    ) -> (f32, f32, bool)
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let loss = loss_fn(tensor);
        loss.backward();
        let analytical = tensor.grad().expect("tensor must have a gradient");

        let original = tensor.borrow().data.clone();
        let shape = tensor.borrow().shape.clone();
        let mut numerical = vec![0.0f32; original.len()];

        for (i, slot) in numerical.iter_mut().enumerate() {
            let mut plus = original.clone();
            plus[i] += epsilon;
            let val_plus = loss_fn(&RawTensor::new(plus, &shape, true)).borrow().data[0];

            let mut minus = original.clone();
            minus[i] -= epsilon;
            let val_minus = loss_fn(&RawTensor::new(minus, &shape, true)).borrow().data[0];

            *slot = (val_plus - val_minus) / (2.0 * epsilon);
        }

        let mut max_err: f32 = 0.0;
        let mut total_err: f32 = 0.0;
        for (i, (&a, &n)) in analytical.iter().zip(&numerical).enumerate() {
            // symmetric relative error with an absolute floor, so near-zero
            // gradients don't blow the ratio up on f32 noise
            let denom = a.abs().max(n.abs()).max(1e-3);
            let rel = (a - n).abs() / denom;
            if rel > tolerance {
                eprintln!("gradient mismatch at {i}: analytical={a:.6e}, numerical={n:.6e}");
            }
            max_err = max_err.max(rel);
            total_err += rel;
        }
        let mean_err = total_err / analytical.len() as f32;
        (max_err, mean_err, max_err < tolerance)
    }

    /// Gradient checker with defaults that work for most ops.
    pub fn check_gradients_simple<F>(tensor: &Tensor, loss_fn: F) -> bool
    where
        F: Fn(&Tensor) -> Tensor,
    {
        let (max_err, mean_err, passed) = Self::check_gradients(tensor, loss_fn, 1e-2, 5e-2);
        if !passed {
            eprintln!("gradient check failed: max={max_err:.6e}, mean={mean_err:.6e}");
        }
        passed
    }
}

// ===== TRAIT-BASED API =====

/// Method-call surface for tensors: `x.add(&y)` instead of
/// `RawTensor::add(&x, &y)`.
pub trait TensorOps {
    // Binary
    fn add(&self, other: &Tensor) -> Tensor;
    fn sub(&self, other: &Tensor) -> Tensor;
    fn elem_mul(&self, other: &Tensor) -> Tensor;
    fn div(&self, other: &Tensor) -> Tensor;
    fn max_elem(&self, other: &Tensor) -> Tensor;

    // Unary
    fn neg(&self) -> Tensor;
    fn sqrt(&self) -> Tensor;
    fn exp(&self) -> Tensor;
    fn log(&self) -> Tensor;
    fn tanh(&self) -> Tensor;
    fn sigmoid(&self) -> Tensor;
    fn relu(&self) -> Tensor;

    // Scalar reductions
    fn sum(&self) -> Tensor;
    fn max_reduce(&self) -> Tensor;
    fn mean(&self) -> Tensor;

    // Movement
    fn reshape(&self, new_shape: &[usize]) -> Tensor;
    fn permute(&self, axes: &[usize]) -> Tensor;
    fn pad(&self, padding: &[(usize, usize)]) -> Tensor;
    fn shrink(&self, ranges: &[(usize, usize)]) -> Tensor;

    // Matmul
    fn matmul(&self, other: &Tensor) -> Tensor;
    fn transpose(&self) -> Tensor;

    // Gradients
    fn backward(&self);
    fn grad(&self) -> Option<Vec<f32>>;

    // Axis reductions
    fn sum_dim(&self, dim: usize, keepdim: bool) -> Tensor;
    fn max_dim(&self, dim: usize, keepdim: bool) -> Tensor;
    fn mean_dim(&self, dim: usize, keepdim: bool) -> Tensor;
    fn softmax(&self, dim: usize) -> Tensor;
}

impl TensorOps for Tensor {
    fn add(&self, other: &Tensor) -> Tensor {
        RawTensor::add(self, other)
    }
    fn sub(&self, other: &Tensor) -> Tensor {
        RawTensor::sub(self, other)
    }
    fn elem_mul(&self, other: &Tensor) -> Tensor {
        RawTensor::elem_mul(self, other)
    }
    fn div(&self, other: &Tensor) -> Tensor {
        RawTensor::div(self, other)
    }
    fn max_elem(&self, other: &Tensor) -> Tensor {
        RawTensor::max_elem(self, other)
    }

    fn neg(&self) -> Tensor {
        RawTensor::neg(self)
    }
    fn sqrt(&self) -> Tensor {
        RawTensor::sqrt(self)
    }
    fn exp(&self) -> Tensor {
        RawTensor::exp(self)
    }
    fn log(&self) -> Tensor {
        RawTensor::log(self)
    }
    fn tanh(&self) -> Tensor {
        RawTensor::tanh(self)
    }
    fn sigmoid(&self) -> Tensor {
        RawTensor::sigmoid(self)
    }
    fn relu(&self) -> Tensor {
        RawTensor::relu(self)
    }

    fn sum(&self) -> Tensor {
        RawTensor::sum(self)
    }
    fn max_reduce(&self) -> Tensor {
        RawTensor::max_reduce(self)
    }
    fn mean(&self) -> Tensor {
        RawTensor::mean(self)
    }

    fn reshape(&self, new_shape: &[usize]) -> Tensor {
        RawTensor::reshape(self, new_shape)
    }
    fn permute(&self, axes: &[usize]) -> Tensor {
        RawTensor::permute(self, axes)
    }
    fn pad(&self, padding: &[(usize, usize)]) -> Tensor {
        RawTensor::pad(self, padding)
    }
    fn shrink(&self, ranges: &[(usize, usize)]) -> Tensor {
        RawTensor::shrink(self, ranges)
    }

    fn matmul(&self, other: &Tensor) -> Tensor {
        RawTensor::matmul(self, other)
    }
    fn transpose(&self) -> Tensor {
        RawTensor::transpose(self)
    }

    fn backward(&self) {
        RawTensor::backward(self)
    }
    fn grad(&self) -> Option<Vec<f32>> {
        self.borrow().grad.clone()
    }

    fn sum_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        RawTensor::sum_dim(self, dim, keepdim)
    }
    fn max_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        RawTensor::max_dim(self, dim, keepdim)
    }
    fn mean_dim(&self, dim: usize, keepdim: bool) -> Tensor {
        RawTensor::mean_dim(self, dim, keepdim)
    }
    fn softmax(&self, dim: usize) -> Tensor {
        RawTensor::softmax(self, dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_rows_sum_to_one() {
        let x = RawTensor::randn(&[4, 7]);
        let s = x.softmax(1);
        let s = s.borrow();
        for row in 0..4 {
            let total: f32 = s.data[row * 7..(row + 1) * 7].iter().sum();
            assert!((total - 1.0).abs() < 1e-5, "row {row} sums to {total}");
        }
    }

    #[test]
    fn sum_dim_values_and_shape() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], false);
        let s = x.sum_dim(1, false);
        assert_eq!(s.borrow().shape, vec![2]);
        assert_eq!(s.borrow().data, vec![6.0, 15.0]);
        let k = x.sum_dim(1, true);
        assert_eq!(k.borrow().shape, vec![2, 1]);
    }

    #[test]
    fn mean_dim_matches_sum() {
        let x = RawTensor::new(vec![2.0, 4.0, 6.0, 8.0], &[2, 2], false);
        let m = x.mean_dim(0, false);
        assert_eq!(m.borrow().data, vec![4.0, 6.0]);
    }

    #[test]
    fn max_dim_routes_gradient_to_winner() {
        let x = RawTensor::new(vec![1.0, 5.0, 2.0, 3.0], &[2, 2], true);
        let m = x.max_dim(1, false);
        m.sum().backward();
        assert_eq!(x.grad().unwrap(), vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn softmax_gradcheck() {
        let x = RawTensor::new(vec![0.3, -0.1, 0.8, 0.2, 0.0, -0.5], &[2, 3], true);
        assert!(RawTensor::check_gradients_simple(&x, |t| {
            t.softmax(1).elem_mul(&t.softmax(1)).sum()
        }));
    }

    #[test]
    fn xavier_uniform_within_limit() {
        let w = RawTensor::xavier_uniform(&[10, 20]);
        let limit = (6.0f32 / 30.0).sqrt();
        assert!(w.borrow().data.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn seeded_rng_is_deterministic() {
        seed_rng(7);
        let a = RawTensor::randn(&[8]);
        seed_rng(7);
        let b = RawTensor::randn(&[8]);
        assert_eq!(a.borrow().data, b.borrow().data);
    }
}
