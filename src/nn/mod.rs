pub mod layers;
pub mod optim;

use crate::tensor::Tensor;

/// Weight initialisation function used by layers with lazily-sized weights.
pub type InitFn = fn(&[usize]) -> Tensor;

/// Common interface for network layers.
pub trait Module {
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All learnable parameters. Lazily-initialised layers return only the
    /// parameters that have been materialised so far.
    fn parameters(&self) -> Vec<Tensor>;

    fn train(&mut self) {}

    fn eval(&mut self) {}

    fn zero_grad(&self) {
        for p in self.parameters() {
            p.borrow_mut().grad = None;
        }
    }
}

/// Spatial padding policy for conv and pooling layers.
///
/// `Same` preserves `ceil(input / stride)` outputs by zero-padding as needed
/// (asymmetric when the total pad is odd, extra on the trailing side);
/// `Valid` uses only fully-covered windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    Same,
    Valid,
}

impl Padding {
    /// Resolve (pad_before, pad_after, output_size) for one spatial dimension.
    pub fn resolve(self, input: usize, kernel: usize, stride: usize) -> (usize, usize, usize) {
        assert!(stride > 0, "stride must be positive");
        match self {
            Padding::Valid => {
                assert!(
                    input >= kernel,
                    "input size {input} smaller than kernel {kernel} with valid padding"
                );
                (0, 0, (input - kernel) / stride + 1)
            }
            Padding::Same => {
                let out = input.div_ceil(stride);
                let total = ((out - 1) * stride + kernel).saturating_sub(input);
                let before = total / 2;
                (before, total - before, out)
            }
        }
    }
}

impl std::fmt::Display for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Padding::Same => write!(f, "same"),
            Padding::Valid => write!(f, "valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_padding_output_size() {
        assert_eq!(Padding::Valid.resolve(5, 3, 1), (0, 0, 3));
        assert_eq!(Padding::Valid.resolve(5, 3, 2), (0, 0, 2));
        assert_eq!(Padding::Valid.resolve(7, 2, 2), (0, 0, 3));
    }

    #[test]
    fn same_padding_preserves_size_at_stride_one() {
        let (b, a, out) = Padding::Same.resolve(5, 3, 1);
        assert_eq!(out, 5);
        assert_eq!(b + a, 2);
        // odd total pad puts the extra cell after
        let (b, a, out) = Padding::Same.resolve(5, 2, 1);
        assert_eq!(out, 5);
        assert_eq!((b, a), (0, 1));
    }

    #[test]
    fn same_padding_ceil_division_at_stride_two() {
        assert_eq!(Padding::Same.resolve(5, 3, 2).2, 3);
        assert_eq!(Padding::Same.resolve(4, 3, 2).2, 2);
    }

    #[test]
    #[should_panic(expected = "smaller than kernel")]
    fn valid_padding_rejects_oversized_kernel() {
        Padding::Valid.resolve(2, 3, 1);
    }
}
