//! Ready-made callables built from the leaf and structural kernels.
//!
//! Binary arithmetic works on scalars of any dtype; wrap it in
//! [`elwise`](crate::functional::elwise) to apply it over arrays. The
//! reductions accumulate with a left compound of the matching binary op.

use vole_core::Array;

use crate::callable::Callable;
use crate::functional::{left_compound, reduction, reduction_with_identity};
use crate::kernels::{arith, ArithOp};

pub fn add() -> Callable {
    arith(ArithOp::Add)
}

pub fn sub() -> Callable {
    arith(ArithOp::Sub)
}

pub fn mul() -> Callable {
    arith(ArithOp::Mul)
}

pub fn min() -> Callable {
    arith(ArithOp::Min)
}

pub fn max() -> Callable {
    arith(ArithOp::Max)
}

/// Sum over the reduced axes, seeded with 0.
pub fn sum() -> Callable {
    reduction_with_identity(left_compound(add()), Array::scalar(0u8))
}

/// Product over the reduced axes, seeded with 1.
pub fn prod() -> Callable {
    reduction_with_identity(left_compound(mul()), Array::scalar(1u8))
}

/// Minimum over the reduced axes, seeded with the first element.
pub fn min_all() -> Callable {
    reduction(left_compound(min()))
}

/// Maximum over the reduced axes, seeded with the first element.
pub fn max_all() -> Callable {
    reduction(left_compound(max()))
}
