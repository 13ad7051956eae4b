pub mod network;
pub mod registry;
pub mod spec;

pub use network::{Cnn, CnnBuilder};
pub use registry::{Activation, Initialiser};
pub use spec::{LayerSpec, NetworkSpec, SpecValue};
