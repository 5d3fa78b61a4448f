//! # Vole
//!
//! A composable kernel-execution engine for strided, type-erased arrays.
//!
//! Given a computation and the types and layouts of its arguments, vole
//! builds, once, a flat arena of small kernels that together walk the memory
//! in the right order. Running the result never consults types again.
//!
//! ## Usage
//!
//! ```rust
//! use vole::prelude::*;
//!
//! let a = Array::from_slice(&[1i32, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
//! let kwds = Kwds::new().with("axes", vec![1i64]);
//! let rows = ops::sum().call(&EvalContext::default(), &[&a], &kwds).unwrap();
//! assert_eq!(rows.to_vec::<i32>().unwrap(), vec![6, 15]);
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `vole-core` | DType, Type, Layout, Array, KernelRequest, Error |
//! | `vole` | Arena, kernels, instantiation, pipelines |
//!
//! ## Modules
//!
//! - [`builder`] — the kernel arena
//! - [`kernel`] — the dispatch header every arena node implements
//! - [`callable`] — operations, signatures and the instantiation protocol
//! - [`pipeline`] — compiled, runnable kernel trees
//! - [`kernels`] — assignment, constant fill, elementary closures
//! - [`functional`] — elwise, compose, permute, compound, reduction
//! - [`ops`] — built-in arithmetic and reductions
//! - [`config`] — the evaluation context

/// Re-export core types.
pub use vole_core::{
    Array, BufferAllocator, DType, DimKind, DimLayout, Error, HeapAllocator, KernelRequest,
    Layout, Result, Type, TypeVars, VarDimData, WithDType,
};

pub mod builder;
pub mod callable;
pub mod config;
pub mod functional;
pub mod kernel;
pub mod kernels;
pub mod ops;
pub mod pipeline;

/// Convenience imports.
pub mod prelude {
    pub use crate::builder::KernelBuilder;
    pub use crate::callable::{ArgDesc, Callable, Kwd, Kwds, Operation, Signature};
    pub use crate::config::{AssignErrorMode, EvalContext};
    pub use crate::functional::{
        compose, elwise, left_compound, permute, reduction, reduction_with_identity,
        right_compound,
    };
    pub use crate::kernel::{Children, Kernel};
    pub use crate::kernels::{assign, binary, constant, unary};
    pub use crate::ops;
    pub use crate::pipeline::Pipeline;
    pub use vole_core::{Array, DType, Error, KernelRequest, Layout, Result, Type};
}
