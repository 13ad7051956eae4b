//! galvani: a small CPU tensor/autograd framework with a declarative CNN
//! builder.
//!
//! Tensors are `Rc<RefCell<RawTensor>>` handles over flat `f32` buffers with
//! reverse-mode autodiff. On top of the tensor ops sit the usual layers
//! (conv, pooling, linear, batch norm, dropout) and optimizers, and the
//! [`builder::Cnn`] type, which validates an untyped nested-list architecture
//! description and assembles a runnable network from it:
//!
//! ```
//! use galvani::{spec_list, Cnn, RawTensor};
//!
//! let cnn = Cnn::builder(spec_list![
//!     spec_list!["conv", 8, 3, 1, "same"],
//!     spec_list!["maxpool", 2, 2, "valid"],
//!     spec_list!["linear", 10],
//! ])
//! .output_activation("softmax")
//! .build()
//! .unwrap();
//!
//! let x = RawTensor::rand(&[4, 1, 28, 28]);
//! let y = cnn.forward(&x).unwrap();
//! assert_eq!(y.borrow().shape, vec![4, 10]);
//! ```
//!
//! Everything is single-threaded; the tensor type is deliberately not `Send`.

pub mod autograd;
pub mod builder;
pub mod error;
pub mod nn;
pub mod ops;
pub mod tensor;

pub use builder::{Activation, Cnn, CnnBuilder, Initialiser, LayerSpec, NetworkSpec, SpecValue};
pub use error::{GalvaniError, Result};
pub use nn::{Module, Padding};
pub use tensor::{seed_rng, RawTensor, Tensor, TensorOps};
