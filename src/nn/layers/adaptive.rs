use crate::autograd::GradFn;
use crate::nn::Module;
use crate::tensor::{RawTensor, Tensor};

/// Window boundaries for adaptive pooling: output cell `i` of `out` covers
/// input rows [floor(i*n/out), ceil((i+1)*n/out)).
fn window(i: usize, n: usize, out: usize) -> (usize, usize) {
    let start = i * n / out;
    let end = ((i + 1) * n).div_ceil(out);
    (start, end)
}

struct SparseGradFn {
    input_shape: Vec<usize>,
    // one source index per output cell
    sources: Vec<usize>,
}

impl GradFn for SparseGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (&src, &g) in self.sources.iter().zip(&out_grad.data) {
            grad[src] += g;
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(SparseGradFn {
            input_shape: self.input_shape.clone(),
            sources: self.sources.clone(),
        })
    }
}

struct SpreadGradFn {
    input_shape: Vec<usize>,
    windows: Vec<Vec<usize>>,
}

impl GradFn for SpreadGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (cells, &g) in self.windows.iter().zip(&out_grad.data) {
            let share = g / cells.len() as f32;
            for &src in cells {
                grad[src] += share;
            }
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(SpreadGradFn {
            input_shape: self.input_shape.clone(),
            windows: self.windows.clone(),
        })
    }
}

/// Max pooling to a fixed (out_h, out_w) output regardless of input size.
pub struct AdaptiveMaxPool2d {
    out_h: usize,
    out_w: usize,
}

impl AdaptiveMaxPool2d {
    pub fn new(out_h: usize, out_w: usize) -> Self {
        assert!(out_h > 0 && out_w > 0, "output size must be positive");
        AdaptiveMaxPool2d { out_h, out_w }
    }

    pub fn output_size(&self) -> (usize, usize) {
        (self.out_h, self.out_w)
    }
}

impl Module for AdaptiveMaxPool2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (data, out_shape, sources, input_shape, req_grad) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "adaptive maxpool expects (B, C, H, W), got {:?}",
                s.shape
            );
            let (b, c, h, w) = (s.shape[0], s.shape[1], s.shape[2], s.shape[3]);

            let mut data = Vec::with_capacity(b * c * self.out_h * self.out_w);
            let mut sources = Vec::with_capacity(data.capacity());
            for bi in 0..b {
                for ch in 0..c {
                    let plane = (bi * c + ch) * h * w;
                    for i in 0..self.out_h {
                        let (y0, y1) = window(i, h, self.out_h);
                        for j in 0..self.out_w {
                            let (x0, x1) = window(j, w, self.out_w);
                            let mut best = f32::NEG_INFINITY;
                            let mut best_idx = 0;
                            for y in y0..y1 {
                                for x in x0..x1 {
                                    let idx = plane + y * w + x;
                                    if s.data[idx] > best {
                                        best = s.data[idx];
                                        best_idx = idx;
                                    }
                                }
                            }
                            data.push(best);
                            sources.push(best_idx);
                        }
                    }
                }
            }
            (
                data,
                vec![b, c, self.out_h, self.out_w],
                sources,
                s.shape.clone(),
                s.requires_grad,
            )
        };

        let out = RawTensor::new(data, &out_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![input.clone()];
            o.grad_fn = Some(Box::new(SparseGradFn {
                input_shape,
                sources,
            }));
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// Average pooling to a fixed (out_h, out_w) output regardless of input size.
pub struct AdaptiveAvgPool2d {
    out_h: usize,
    out_w: usize,
}

impl AdaptiveAvgPool2d {
    pub fn new(out_h: usize, out_w: usize) -> Self {
        assert!(out_h > 0 && out_w > 0, "output size must be positive");
        AdaptiveAvgPool2d { out_h, out_w }
    }

    pub fn output_size(&self) -> (usize, usize) {
        (self.out_h, self.out_w)
    }
}

impl Module for AdaptiveAvgPool2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (data, out_shape, windows, input_shape, req_grad) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "adaptive avgpool expects (B, C, H, W), got {:?}",
                s.shape
            );
            let (b, c, h, w) = (s.shape[0], s.shape[1], s.shape[2], s.shape[3]);

            let mut data = Vec::with_capacity(b * c * self.out_h * self.out_w);
            let mut windows = Vec::with_capacity(data.capacity());
            for bi in 0..b {
                for ch in 0..c {
                    let plane = (bi * c + ch) * h * w;
                    for i in 0..self.out_h {
                        let (y0, y1) = window(i, h, self.out_h);
                        for j in 0..self.out_w {
                            let (x0, x1) = window(j, w, self.out_w);
                            let mut cells = Vec::with_capacity((y1 - y0) * (x1 - x0));
                            let mut total = 0.0;
                            for y in y0..y1 {
                                for x in x0..x1 {
                                    let idx = plane + y * w + x;
                                    total += s.data[idx];
                                    cells.push(idx);
                                }
                            }
                            data.push(total / cells.len() as f32);
                            windows.push(cells);
                        }
                    }
                }
            }
            (
                data,
                vec![b, c, self.out_h, self.out_w],
                windows,
                s.shape.clone(),
                s.requires_grad,
            )
        };

        let out = RawTensor::new(data, &out_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![input.clone()];
            o.grad_fn = Some(Box::new(SpreadGradFn {
                input_shape,
                windows,
            }));
        }
        out
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn windows_partition_the_input() {
        // 5 rows into 2 outputs: [0,3) and [2,5)
        assert_eq!(window(0, 5, 2), (0, 3));
        assert_eq!(window(1, 5, 2), (2, 5));
        // exact division gives non-overlapping halves
        assert_eq!(window(0, 4, 2), (0, 2));
        assert_eq!(window(1, 4, 2), (2, 4));
        // more outputs than inputs: windows stay non-empty and overlap
        assert_eq!(window(0, 2, 3), (0, 1));
        assert_eq!(window(1, 2, 3), (0, 2));
        assert_eq!(window(2, 2, 3), (1, 2));
    }

    #[test]
    fn upsamples_when_output_exceeds_input() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2], false);
        let y = AdaptiveMaxPool2d::new(3, 3).forward(&x);
        assert_eq!(y.borrow().shape, vec![1, 1, 3, 3]);
        assert_eq!(
            y.borrow().data,
            vec![1.0, 2.0, 2.0, 3.0, 4.0, 4.0, 3.0, 4.0, 4.0]
        );

        let y = AdaptiveAvgPool2d::new(3, 3).forward(&x);
        assert_eq!(
            y.borrow().data,
            vec![1.0, 1.5, 2.0, 2.0, 2.5, 3.0, 3.0, 3.5, 4.0]
        );
    }

    #[test]
    fn adaptive_max_reaches_target_size() {
        let x = RawTensor::rand(&[2, 3, 11, 7]);
        let y = AdaptiveMaxPool2d::new(4, 4).forward(&x);
        assert_eq!(y.borrow().shape, vec![2, 3, 4, 4]);
    }

    #[test]
    fn adaptive_avg_identity_when_sizes_match() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2], false);
        let y = AdaptiveAvgPool2d::new(2, 2).forward(&x);
        assert_eq!(y.borrow().data, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn adaptive_avg_global_pool() {
        let x = RawTensor::new(vec![1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2], false);
        let y = AdaptiveAvgPool2d::new(1, 1).forward(&x);
        assert_eq!(y.borrow().data, vec![2.5]);
    }

    #[test]
    fn adaptive_max_gradient_routes_to_winners() {
        let x = RawTensor::new(vec![1.0, 5.0, 2.0, 3.0], &[1, 1, 2, 2], true);
        AdaptiveMaxPool2d::new(1, 1).forward(&x).sum().backward();
        assert_eq!(x.grad().unwrap(), vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn adaptive_avg_gradcheck() {
        let x = RawTensor::new(
            vec![0.5, -1.0, 2.0, 0.3, 1.1, -0.7, 0.2, 0.9, -0.4],
            &[1, 1, 3, 3],
            true,
        );
        let pool = AdaptiveAvgPool2d::new(2, 2);
        assert!(RawTensor::check_gradients_simple(&x, |t| {
            pool.forward(t).elem_mul(&pool.forward(t)).sum()
        }));
    }
}
