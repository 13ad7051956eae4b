use crate::tensor::{RawTensor, Tensor};
use std::collections::HashSet;

/// Gradient computation function attached to the output of an operation.
///
/// `backward` receives the gradient of the loss with respect to the
/// operation's output and the operation's input tensors, and returns one
/// gradient per parent (`None` for parents that don't require grad).
pub trait GradFn {
    fn backward(&self, out_grad: &RawTensor, parents: &[Tensor]) -> Vec<Option<Tensor>>;
    /// Clone into a box (needed because tensors are `Rc<RefCell<_>>`-shared).
    fn clone_box(&self) -> Box<dyn GradFn>;
}

impl RawTensor {
    /// Reverse-mode backpropagation starting from this tensor.
    ///
    /// Seeds the gradient with ones, walks the graph in reverse topological
    /// order and accumulates each operation's parent gradients. A plain
    /// visited-set DFS is not enough for diamond-shaped graphs, so the order
    /// is built with an explicit post-order pass first.
    ///
    /// # Panics
    /// Panics when called on a tensor with `requires_grad == false`.
    pub fn backward(tensor_ref: &Tensor) {
        enum Step {
            Enter(Tensor),
            Exit(Tensor),
        }

        assert!(
            tensor_ref.borrow().requires_grad,
            "called backward on a tensor that does not require grad"
        );

        {
            let mut t = tensor_ref.borrow_mut();
            if t.grad.is_none() {
                t.grad = Some(vec![1.0; t.data.len()]);
            }
        }

        // Post-order DFS with an explicit stack; recursion would overflow on
        // deep graphs.
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![Step::Enter(tensor_ref.clone())];

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(t) => {
                    if !seen.insert(t.as_ptr()) {
                        continue;
                    }
                    stack.push(Step::Exit(t.clone()));
                    let parents = t.borrow().parents.clone();
                    for p in parents {
                        stack.push(Step::Enter(p));
                    }
                }
                Step::Exit(t) => order.push(t),
            }
        }

        // order is [leaves .. root]; process root first so every consumer has
        // contributed before a node propagates to its own parents.
        for node in order.into_iter().rev() {
            let (grad_fn, parents, grad, shape) = {
                let n = node.borrow();
                (
                    n.grad_fn.as_ref().map(|g| g.clone_box()),
                    n.parents.clone(),
                    n.grad.clone(),
                    n.shape.clone(),
                )
            };

            let (Some(grad_fn), Some(grad)) = (grad_fn, grad) else {
                continue;
            };

            let out_grad = RawTensor {
                data: grad,
                shape,
                grad: None,
                requires_grad: false,
                grad_fn: None,
                parents: vec![],
            };

            let parent_grads = grad_fn.backward(&out_grad, &parents);
            for (contribution, parent) in parent_grads.into_iter().zip(parents.iter()) {
                let Some(g) = contribution else { continue };
                let mut p = parent.borrow_mut();
                let g_data = &g.borrow().data;
                match p.grad {
                    None => p.grad = Some(g_data.clone()),
                    Some(ref mut acc) => {
                        assert_eq!(acc.len(), g_data.len(), "gradient size mismatch");
                        for (a, b) in acc.iter_mut().zip(g_data.iter()) {
                            *a += *b;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::tensor::{RawTensor, TensorOps};

    #[test]
    fn diamond_graph_accumulates_both_paths() {
        // y = x*x + x*x: dy/dx = 4x
        let x = RawTensor::new(vec![3.0], &[1], true);
        let a = x.elem_mul(&x);
        let b = x.elem_mul(&x);
        let y = a.add(&b);
        y.backward();
        let g = x.grad().unwrap();
        assert!((g[0] - 12.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "does not require grad")]
    fn backward_requires_grad() {
        let x = RawTensor::new(vec![1.0], &[1], false);
        x.backward();
    }
}
