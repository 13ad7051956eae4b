use crate::autograd::GradFn;
use crate::tensor::{RawTensor, Tensor};

/// Elementwise unary operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UnaryOp {
    Neg,
    Sqrt,
    Exp,
    Log,
    Tanh,
    Sigmoid,
    ReLU,
}

impl UnaryOp {
    fn forward(self, x: f32) -> f32 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::ReLU => x.max(0.0),
        }
    }

    /// Derivative expressed in terms of input x and output y = f(x); several
    /// activations are cheapest through their output.
    fn derivative(self, x: f32, y: f32) -> f32 {
        match self {
            UnaryOp::Neg => -1.0,
            UnaryOp::Sqrt => 0.5 / y,
            UnaryOp::Exp => y,
            UnaryOp::Log => 1.0 / x,
            UnaryOp::Tanh => 1.0 - y * y,
            UnaryOp::Sigmoid => y * (1.0 - y),
            UnaryOp::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

struct UnaryGradFn {
    op: UnaryOp,
    output: Vec<f32>,
}

impl GradFn for UnaryGradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>> {
        let p = parents[0].borrow();
        if !p.requires_grad {
            return vec![None];
        }
        let grad: Vec<f32> = p
            .data
            .iter()
            .zip(&self.output)
            .zip(&out_grad.data)
            .map(|((&x, &y), &g)| self.op.derivative(x, y) * g)
            .collect();
        vec![Some(RawTensor::new(grad, &p.shape, false))]
    }

    fn clone_box(&self) -> Box<dyn GradFn> {
        Box::new(UnaryGradFn {
            op: self.op,
            output: self.output.clone(),
        })
    }
}

fn apply_unary(t: &Tensor, op: UnaryOp) -> Tensor {
    let (data, shape, req_grad) = {
        let s = t.borrow();
        let data: Vec<f32> = s.data.iter().map(|&x| op.forward(x)).collect();
        (data, s.shape.clone(), s.requires_grad)
    };

    let out = RawTensor::new(data.clone(), &shape, req_grad);
    if req_grad {
        let mut o = out.borrow_mut();
        o.parents = vec![t.clone()];
        o.grad_fn = Some(Box::new(UnaryGradFn { op, output: data }));
    }
    out
}

impl RawTensor {
    pub fn neg(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Neg)
    }

    pub fn sqrt(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Sqrt)
    }

    pub fn exp(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Exp)
    }

    pub fn log(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Log)
    }

    pub fn tanh(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Tanh)
    }

    pub fn sigmoid(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::Sigmoid)
    }

    pub fn relu(t: &Tensor) -> Tensor {
        apply_unary(t, UnaryOp::ReLU)
    }
}
