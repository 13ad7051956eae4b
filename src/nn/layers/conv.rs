use crate::autograd::GradFn;
use crate::nn::{InitFn, Module, Padding};
use crate::tensor::{RawTensor, Tensor, TensorOps};
use std::cell::OnceCell;

/// 2D convolution over (B, C, H, W) input.
///
/// The forward pass lowers the convolution to a matrix multiply: the (padded)
/// input is unfolded into patch rows (im2col), multiplied by the flattened
/// kernel and reshaped back. im2col carries its own scatter-add backward, so
/// the full gradient composes from existing ops.
///
/// `in_channels` is inferred from the first input; the kernel weight is built
/// by `init` at that point.
pub struct Conv2d {
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: Padding,
    init: InitFn,
    weight: OnceCell<Tensor>,
    bias: Tensor,
}

impl Conv2d {
    pub fn new(out_channels: usize, kernel: usize, stride: usize, padding: Padding) -> Self {
        Self::with_init(out_channels, kernel, stride, padding, RawTensor::kaiming_normal)
    }

    pub fn with_init(
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: Padding,
        init: InitFn,
    ) -> Self {
        assert!(out_channels > 0, "out_channels must be positive");
        assert!(kernel > 0, "kernel size must be positive");
        assert!(stride > 0, "stride must be positive");
        let bias = RawTensor::zeros(&[out_channels]);
        bias.borrow_mut().requires_grad = true;
        Conv2d {
            out_channels,
            kernel,
            stride,
            padding,
            init,
            weight: OnceCell::new(),
            bias,
        }
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
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

    /// Kernel weight (out, in, k, k), present after the first forward.
    pub fn weight(&self) -> Option<&Tensor> {
        self.weight.get()
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let (batch, in_ch, height, width) = {
            let s = input.borrow();
            assert_eq!(
                s.shape.len(),
                4,
                "conv2d expects (B, C, H, W), got {:?}",
                s.shape
            );
            (s.shape[0], s.shape[1], s.shape[2], s.shape[3])
        };

        let weight = self.weight.get_or_init(|| {
            let w = (self.init)(&[self.out_channels, in_ch, self.kernel, self.kernel]);
            w.borrow_mut().requires_grad = true;
            w
        });

        let (ph_b, ph_a, out_h) = self.padding.resolve(height, self.kernel, self.stride);
        let (pw_b, pw_a, out_w) = self.padding.resolve(width, self.kernel, self.stride);
        let padded = if ph_b + ph_a + pw_b + pw_a > 0 {
            input.pad(&[(0, 0), (0, 0), (ph_b, ph_a), (pw_b, pw_a)])
        } else {
            input.clone()
        };

        // (B*oh*ow, C*k*k) @ (C*k*k, O) + bias
        let cols = im2col(&padded, self.kernel, self.stride, out_h, out_w);
        let w2d = weight
            .reshape(&[self.out_channels, in_ch * self.kernel * self.kernel])
            .transpose();
        let out = cols
            .matmul(&w2d)
            .add(&self.bias.reshape(&[1, self.out_channels]));

        out.reshape(&[batch, out_h, out_w, self.out_channels])
            .permute(&[0, 3, 1, 2])
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![];
        if let Some(w) = self.weight.get() {
            params.push(w.clone());
        }
        params.push(self.bias.clone());
        params
    }
}

/// Unfold conv windows of a padded (B, C, H, W) tensor into rows of a
/// (B*out_h*out_w, C*k*k) matrix.
fn im2col(padded: &Tensor, kernel: usize, stride: usize, out_h: usize, out_w: usize) -> Tensor {
    let (indices, rows, cols, req_grad, input_shape) = {
        let s = padded.borrow();
        let (b, c, h, w) = (s.shape[0], s.shape[1], s.shape[2], s.shape[3]);
        let rows = b * out_h * out_w;
        let cols = c * kernel * kernel;
        let mut indices = Vec::with_capacity(rows * cols);
        for bi in 0..b {
            for i in 0..out_h {
                for j in 0..out_w {
                    for ch in 0..c {
                        for ki in 0..kernel {
                            for kj in 0..kernel {
                                let y = i * stride + ki;
                                let x = j * stride + kj;
                                indices.push(((bi * c + ch) * h + y) * w + x);
                            }
                        }
                    }
                }
            }
        }
        (indices, rows, cols, s.requires_grad, s.shape.clone())
    };

    let data: Vec<f32> = {
        let s = padded.borrow();
        indices.iter().map(|&i| s.data[i]).collect()
    };

    let out = RawTensor::new(data, &[rows, cols], req_grad);
    if req_grad {
        let mut o = out.borrow_mut();
        o.parents = vec![padded.clone()];
        o.grad_fn = Some(Box::new(Im2ColGradFn {
            indices,
            input_shape,
        }));
    }
    out
}

/// Scatter-add: overlapping windows accumulate into the same input cell.
struct Im2ColGradFn {
    indices: Vec<usize>,
    input_shape: Vec<usize>,
}

impl GradFn for Im2ColGradFn {
    fn backward(&self, out_grad: &RawTensor, _parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let size: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; size];
        for (&src, &g) in self.indices.iter().zip(&out_grad.data) {
            grad[src] += g;
        }
        vec![Some(RawTensor::new(grad, &self.input_shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(Im2ColGradFn {
            indices: self.indices.clone(),
            input_shape: self.input_shape.clone(),
        })
    }
}
