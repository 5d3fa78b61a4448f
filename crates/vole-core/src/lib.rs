//! # vole-core
//!
//! Element types, type and layout descriptors, and minimal array storage for
//! the vole kernel engine.
//!
//! This crate provides:
//! - [`DType`] / [`WithDType`] — scalar element types and their Rust bridge
//! - [`Type`] — nested fixed/var dimension descriptors with type-variable matching
//! - [`Layout`] / [`DimLayout`] — per-dimension byte strides ("arrmeta")
//! - [`Array`] / [`BufferAllocator`] — owned storage and the allocation capability
//! - [`KernelRequest`] — which entry point a kernel is built to serve
//! - [`Error`] / [`Result`] — the error type shared by the whole workspace

pub mod array;
pub mod dtype;
pub mod error;
pub mod layout;
pub mod request;
pub mod types;

pub use array::{Array, BufferAllocator, HeapAllocator};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use layout::{DimLayout, Layout, VarDimData};
pub use request::KernelRequest;
pub use types::{DimKind, Type, TypeVars};

#[doc(hidden)]
pub use half;
