//! Structural kernels: lifting, composition, argument permutation,
//! compound folding and the reduction family.

pub mod compose;
pub mod compound;
pub mod elwise;
pub mod permute;
pub mod reduction;

pub use compose::compose;
pub use compound::{left_compound, right_compound, Side};
pub use elwise::elwise;
pub use permute::permute;
pub use reduction::{reduction, reduction_with_identity, Phase, ReductionContext, ReductionStep};
