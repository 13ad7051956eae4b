use crate::autograd::GradFn;
use crate::nn::{Module, Padding};
use crate::tensor::{RawTensor, Tensor};

/// 2D max pooling over (B, C, H, W).
///
/// `Same` padding extends windows past the border; out-of-bounds cells are
/// simply skipped, which is equivalent to padding with negative infinity.
pub struct MaxPool2d {
    kernel: usize,
    stride: usize,
    padding: Padding,
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize, padding: Padding) -> Self {
        assert!(kernel > 0, "kernel size must be positive");
        assert!(stride > 0, "stride must be positive");
        MaxPool2d {
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

struct MaxPoolGradFn {
    input_shape: Vec<usize>,
    argmax: Vec<usize>,
}

impl GradFn for MaxPoolGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (&src, &g) in self.argmax.iter().zip(&out_grad.data) {
            grad[src] += g;
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(MaxPoolGradFn {
            input_shape: self.input_shape.clone(),
            argmax: self.argmax.clone(),
        })
    }
}

impl Module for MaxPool2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (data, out_shape, argmax, input_shape, req_grad) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "maxpool2d expects (B, C, H, W), got {:?}",
                s.shape
            );
            let (b, c, h, w) = (s.shape[0], s.shape[1], s.shape[2], s.shape[3]);
            let (ph, _, out_h) = self.padding.resolve(h, self.kernel, self.stride);
            let (pw, _, out_w) = self.padding.resolve(w, self.kernel, self.stride);

            let mut data = Vec::with_capacity(b * c * out_h * out_w);
            let mut argmax = Vec::with_capacity(b * c * out_h * out_w);
            for bi in 0..b {
                for ch in 0..c {
                    let plane = (bi * c + ch) * h * w;
                    for i in 0..out_h {
                        for j in 0..out_w {
                            let y0 = (i * self.stride) as isize - ph as isize;
                            let x0 = (j * self.stride) as isize - pw as isize;
                            let mut best = f32::NEG_INFINITY;
                            let mut best_idx = 0;
                            for ki in 0..self.kernel {
                                for kj in 0..self.kernel {
                                    let y = y0 + ki as isize;
                                    let x = x0 + kj as isize;
                                    if y < 0 || x < 0 || y >= h as isize || x >= w as isize {
                                        continue;
                                    }
                                    let idx = plane + y as usize * w + x as usize;
                                    if s.data[idx] > best {
                                        best = s.data[idx];
                                        best_idx = idx;
                                    }
                                }
                            }
                            data.push(best);
                            argmax.push(best_idx);
                        }
                    }
                }
            }
            (
                data,
                vec![b, c, out_h, out_w],
                argmax,
                s.shape.clone(),
                s.requires_grad,
            )
        };

        let out = RawTensor::new(data, &out_shape, req_grad);
        if req_grad {
            let mut o = out.borrow_mut();
            o.parents = vec![input.clone()];
            o.grad_fn = Some(Box::new(MaxPoolGradFn {
                input_shape,
                argmax,
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
        let pool = MaxPool2d::new(2, 2, Padding::Valid);
        let y = pool.forward(&x);
        assert_eq!(y.borrow().shape, vec![1, 1, 2, 2]);
        assert_eq!(y.borrow().data, vec![4.0, 8.0, 12.0, 16.0]);
    }

    #[test]
    fn same_padding_keeps_ceil_size() {
        let x = RawTensor::rand(&[2, 3, 5, 5]);
        let pool = MaxPool2d::new(2, 2, Padding::Same);
        let y = pool.forward(&x);
        assert_eq!(y.borrow().shape, vec![2, 3, 3, 3]);
    }

    #[test]
    fn gradient_routes_to_window_max() {
        let x = RawTensor::new(vec![1.0, 3.0, 2.0, 0.0], &[1, 1, 2, 2], true);
        let pool = MaxPool2d::new(2, 2, Padding::Valid);
        pool.forward(&x).sum().backward();
        assert_eq!(x.grad().unwrap(), vec![0.0, 1.0, 0.0, 0.0]);
    }
}
