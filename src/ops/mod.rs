pub mod binary;
pub mod matmul;
pub mod movement;
pub mod reduce;
pub mod unary;
