use crate::error::{GalvaniError, Result};
use crate::nn::InitFn;
use crate::tensor::{RawTensor, Tensor, TensorOps};
use std::collections::HashMap;
use std::sync::LazyLock;

const ELU_ALPHA: f32 = 1.0;
const LEAKY_SLOPE: f32 = 0.01;
const SELU_SCALE: f32 = 1.050_701;
const SELU_ALPHA: f32 = 1.673_263_2;

/// Output/hidden activation functions resolvable by name.
///
/// The name table is a process-wide immutable map; lookups are
/// case-insensitive and `"none"` resolves to the identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Elu,
    Selu,
    LeakyRelu,
    Softplus,
    Identity,
}

static ACTIVATIONS: LazyLock<HashMap<&'static str, Activation>> = LazyLock::new(|| {
    HashMap::from([
        ("relu", Activation::Relu),
        ("sigmoid", Activation::Sigmoid),
        ("tanh", Activation::Tanh),
        ("softmax", Activation::Softmax),
        ("elu", Activation::Elu),
        ("selu", Activation::Selu),
        ("leakyrelu", Activation::LeakyRelu),
        ("softplus", Activation::Softplus),
        ("none", Activation::Identity),
    ])
});

impl Activation {
    pub fn parse(name: &str) -> Result<Activation> {
        ACTIVATIONS
            .get(name.to_lowercase().as_str())
            .copied()
            .ok_or_else(|| GalvaniError::UnknownActivation(name.to_string()))
    }

    /// Every registered name, for diagnostics and exhaustive tests.
    pub fn names() -> impl Iterator<Item = &'static str> {
        ACTIVATIONS.keys().copied()
    }

    pub fn apply(self, x: &Tensor) -> Tensor {
        match self {
            Activation::Relu => x.relu(),
            Activation::Sigmoid => x.sigmoid(),
            Activation::Tanh => x.tanh(),
            Activation::Softmax => RawTensor::softmax(x, 1),
            Activation::Elu => elu(x, ELU_ALPHA),
            Activation::Selu => {
                let scale = RawTensor::constant(SELU_SCALE, &[1]);
                elu(x, SELU_ALPHA).elem_mul(&scale)
            }
            Activation::LeakyRelu => {
                let slope = RawTensor::constant(LEAKY_SLOPE, &[1]);
                x.max_elem(&x.elem_mul(&slope))
            }
            Activation::Softplus => {
                let one = RawTensor::constant(1.0, &[1]);
                x.exp().add(&one).log()
            }
            Activation::Identity => x.clone(),
        }
    }
}

/// elu(x) = x for x > 0, alpha * (exp(x) - 1) otherwise, composed from
/// differentiable primitives: relu(x) + alpha * (exp(min(x, 0)) - 1).
fn elu(x: &Tensor, alpha: f32) -> Tensor {
    let one = RawTensor::constant(1.0, &[1]);
    let alpha = RawTensor::constant(alpha, &[1]);
    let neg_part = x.neg().relu().neg(); // min(x, 0)
    let decayed = neg_part.exp().sub(&one).elem_mul(&alpha);
    x.relu().add(&decayed)
}

/// Weight initialisation schemes resolvable by name.
///
/// `Default` defers to each layer's own default (xavier for linear, kaiming
/// for conv). `"he"` is accepted as an alias for kaiming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initialiser {
    Xavier,
    Kaiming,
    Uniform,
    Normal,
    Default,
}

static INITIALISERS: LazyLock<HashMap<&'static str, Initialiser>> = LazyLock::new(|| {
    HashMap::from([
        ("xavier", Initialiser::Xavier),
        ("kaiming", Initialiser::Kaiming),
        ("he", Initialiser::Kaiming),
        ("uniform", Initialiser::Uniform),
        ("normal", Initialiser::Normal),
        ("default", Initialiser::Default),
    ])
});

impl Initialiser {
    pub fn parse(name: &str) -> Result<Initialiser> {
        INITIALISERS
            .get(name.to_lowercase().as_str())
            .copied()
            .ok_or_else(|| GalvaniError::UnknownInitialiser(name.to_string()))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        INITIALISERS.keys().copied()
    }

    /// The concrete init function, or `None` to let the layer choose.
    pub fn init_fn(self) -> Option<InitFn> {
        match self {
            Initialiser::Xavier => Some(RawTensor::xavier_uniform),
            Initialiser::Kaiming => Some(RawTensor::kaiming_normal),
            Initialiser::Uniform => Some(RawTensor::uniform_init),
            Initialiser::Normal => Some(RawTensor::normal_init),
            Initialiser::Default => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_activation_parses_case_insensitively() {
        for name in Activation::names() {
            let upper = name.to_uppercase();
            assert_eq!(Activation::parse(name).unwrap(), Activation::parse(&upper).unwrap());
        }
    }

    #[test]
    fn unknown_activation_is_an_error() {
        assert!(matches!(
            Activation::parse("swish"),
            Err(GalvaniError::UnknownActivation(name)) if name == "swish"
        ));
    }

    #[test]
    fn he_aliases_kaiming() {
        assert_eq!(Initialiser::parse("he").unwrap(), Initialiser::Kaiming);
        assert_eq!(Initialiser::parse("HE").unwrap(), Initialiser::Kaiming);
    }

    #[test]
    fn unknown_initialiser_is_an_error() {
        assert!(Initialiser::parse("orthogonal").is_err());
    }

    #[test]
    fn elu_matches_closed_form() {
        let x = RawTensor::new(vec![-2.0, -0.5, 0.0, 1.5], &[4], false);
        let y = Activation::Elu.apply(&x);
        let expected: Vec<f32> = [-2.0f32, -0.5, 0.0, 1.5]
            .iter()
            .map(|&v| if v > 0.0 { v } else { v.exp() - 1.0 })
            .collect();
        for (got, want) in y.borrow().data.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn leaky_relu_keeps_negative_slope() {
        let x = RawTensor::new(vec![-100.0, 50.0], &[2], false);
        let y = Activation::LeakyRelu.apply(&x);
        assert!((y.borrow().data[0] + 1.0).abs() < 1e-5);
        assert!((y.borrow().data[1] - 50.0).abs() < 1e-5);
    }

    #[test]
    fn softplus_is_positive_and_smooth() {
        let x = RawTensor::new(vec![-3.0, 0.0, 3.0], &[3], false);
        let y = Activation::Softplus.apply(&x);
        let d = &y.borrow().data;
        assert!(d.iter().all(|&v| v > 0.0));
        assert!((d[1] - 2.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn selu_fixed_point_properties() {
        // selu(0) = 0; positive inputs scale by ~1.0507
        let x = RawTensor::new(vec![0.0, 1.0], &[2], false);
        let y = Activation::Selu.apply(&x);
        assert!(y.borrow().data[0].abs() < 1e-6);
        assert!((y.borrow().data[1] - SELU_SCALE).abs() < 1e-4);
    }

    #[test]
    fn identity_passes_through() {
        let x = RawTensor::rand(&[3, 3]);
        let y = Activation::parse("NONE").unwrap().apply(&x);
        assert_eq!(y.borrow().data, x.borrow().data);
    }

    #[test]
    fn elu_gradcheck() {
        let x = RawTensor::new(vec![-1.5, -0.2, 0.3, 2.0], &[4], true);
        assert!(RawTensor::check_gradients_simple(&x, |t| {
            Activation::Elu.apply(t).sum()
        }));
    }
}
