//! Leaf kernels: assignment, constant fill and elementary closures.

pub mod assign;
pub mod constant;
pub mod elementary;

pub use assign::{assign, make_assignment};
pub use constant::{constant, make_constant};
pub use elementary::{arith, binary, unary, ArithOp};
