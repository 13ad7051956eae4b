mod adaptive;
mod avgpool;
mod batchnorm;
mod conv;
mod dropout;
mod flatten;
mod linear;
mod maxpool;

pub use adaptive::{AdaptiveAvgPool2d, AdaptiveMaxPool2d};
pub use avgpool::AvgPool2d;
pub use batchnorm::{BatchNorm1d, BatchNorm2d};
pub use conv::Conv2d;
pub use dropout::Dropout;
pub use flatten::Flatten;
pub use linear::Linear;
pub use maxpool::MaxPool2d;
