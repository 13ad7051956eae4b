use crate::autograd::GradFn;
use crate::nn::{Module, Padding};
use crate::tensor::{RawTensor, Tensor};

/// 2D average pooling over (B, C, H, W).
///
/// With `Same` padding, border windows average over the cells that actually
/// exist (count-includes-pad would dilute border values with zeros).
pub struct AvgPool2d {
    kernel: usize,
    stride: usize,
    padding: Padding,
}

impl AvgPool2d {
    pub fn new(kernel: usize, stride: usize, padding: Padding) -> Self {
        assert!(kernel > 0, "kernel size must be positive");
        assert!(stride > 0, "stride must be positive");
        AvgPool2d {
            kernel,
            stride,
            padding,
        }
    }

    pub fn kernel(&self) -> usize {
        self.kernel
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }
}

/// Each output cell spreads its gradient uniformly over the cells it averaged.
struct AvgPoolGradFn {
    input_shape: Vec<usize>,
    // (input index, 1/window_count) pairs per output cell
    windows: Vec<Vec<usize>>,
}

impl GradFn for AvgPoolGradFn {
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
        Box::new(AvgPoolGradFn {
            input_shape: self.input_shape.clone(),
            windows: self.windows.clone(),
        })
    }
}

impl Module for AvgPool2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (data, out_shape, windows, input_shape, req_grad) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "avgpool2d expects (B, C, H, W), got {:?}",
                s.shape
            );
            let (b, c, h, w) = (s.shape[0], s.shape[1], s.shape[2], s.shape[3]);
            let (ph, _, out_h) = self.padding.resolve(h, self.kernel, self.stride);
            let (pw, _, out_w) = self.padding.resolve(w, self.kernel, self.stride);

            let mut data = Vec::with_capacity(b * c * out_h * out_w);
            let mut windows = Vec::with_capacity(b * c * out_h * out_w);
            for bi in 0..b {
                for ch in 0..c {
                    let plane = (bi * c + ch) * h * w;
                    for i in 0..out_h {
                        for j in 0..out_w {
                            let y0 = (i * self.stride) as isize - ph as isize;
                            let x0 = (j * self.stride) as isize - pw as isize;
                            let mut cells = Vec::with_capacity(self.kernel * self.kernel);
                            let mut total = 0.0;
                            for ki in 0..self.kernel {
                                for kj in 0..self.kernel {
                                    let y = y0 + ki as isize;
                                    let x = x0 + kj as isize;
                                    if y < 0 || x < 0 || y >= h as isize || x >= w as isize {
                                        continue;
                                    }
                                    let idx = plane + y as usize * w + x as usize;
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
                vec![b, c, out_h, out_w],
                windows,
                s.shape.clone(),
                s.requires_grad,
            )
        };

        let out = RawTensor::new(data, &out_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![input.clone()];
            o.grad_fn = Some(Box::new(AvgPoolGradFn {
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
    fn pool_2x2_stride_2_values() {
        let x = RawTensor::new(
            vec![1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0, 9.0, 10.0, 13.0, 14.0, 11.0, 12.0, 15.0, 16.0],
            &[1, 1, 4, 4],
            false,
        );
        let pool = AvgPool2d::new(2, 2, Padding::Valid);
        let y = pool.forward(&x);
        assert_eq!(y.borrow().data, vec![2.5, 6.5, 10.5, 14.5]);
    }

    #[test]
    fn same_padding_averages_valid_cells_only() {
        // 3x3 ones, 2x2 pool stride 2: bottom-right window covers one cell
        let x = RawTensor::ones(&[1, 1, 3, 3]);
        let pool = AvgPool2d::new(2, 2, Padding::Same);
        let y = pool.forward(&x);
        assert_eq!(y.borrow().shape, vec![1, 1, 2, 2]);
        assert_eq!(y.borrow().data, vec![1.0; 4]);
    }

    #[test]
    fn avgpool_gradcheck() {
        let x = RawTensor::new(
            vec![0.5, -1.0, 2.0, 0.3, 1.1, -0.7, 0.2, 0.9, -0.4],
            &[1, 1, 3, 3],
            true,
        );
        let pool = AvgPool2d::new(2, 1, Padding::Valid);
        assert!(RawTensor::check_gradients_simple(&x, |t| {
            pool.forward(t).elem_mul(&pool.forward(t)).sum()
        }));
    }
}
