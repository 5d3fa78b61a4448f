use crate::dtype::DType;
use crate::request::KernelRequest;
use crate::types::{DimKind, Type};

/// All errors that can occur while building or invoking a kernel pipeline.
///
/// Every failure is detected at construction time: once a pipeline has been
/// built, its execution entry points cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A type did not satisfy what a signature or kernel expects.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: Type, got: Type },

    /// Wrong number of positional arguments for a callable.
    #[error("argument count mismatch: expected {expected} arguments, got {got}")]
    ArgCountMismatch { expected: usize, got: usize },

    /// A symbolic type referenced a type variable with no binding.
    #[error("unbound type variable '{name}'")]
    UnboundTypeVar { name: String },

    /// A kernel variant does not implement the requested entry point.
    #[error("kernel '{kernel}' does not support the {request} request")]
    UnsupportedRequest {
        kernel: &'static str,
        request: KernelRequest,
    },

    /// A raw request value that names no request kind.
    #[error("unrecognized kernel request {value}")]
    UnrecognizedRequest { value: u32 },

    /// Reduction dispatch reached a dimension-kind combination with no kernel.
    #[error(
        "unsupported reduction dimension: {kind} dimension with broadcast={broadcast}, inner={inner}"
    )]
    UnsupportedReduction {
        kind: DimKind,
        broadcast: bool,
        inner: bool,
    },

    /// Assignment between dtypes would lose information under a checked error mode.
    #[error("lossy assignment from {src} to {dst}")]
    LossyAssignment { src: DType, dst: DType },

    /// Reducing an empty dimension with no identity to start from.
    #[error("cannot reduce empty dimension {axis} without an identity")]
    EmptyReduction { axis: usize },

    #[error("axis {axis} out of range for {ndim} reduction dimensions")]
    AxisOutOfRange { axis: i64, ndim: usize },

    #[error("axis {axis} listed more than once")]
    DuplicateAxis { axis: usize },

    #[error("invalid permutation {perm:?}: {reason}")]
    InvalidPermutation { perm: Vec<isize>, reason: String },

    #[error("unknown keyword argument '{name}'")]
    UnknownKeyword { name: String },

    #[error("invalid keyword argument '{name}': {reason}")]
    InvalidKeyword { name: String, reason: String },

    /// An array's layout differs from the layout a pipeline was built for.
    #[error("layout mismatch for argument {arg}")]
    LayoutMismatch { arg: String },

    /// An arena offset did not hold the expected kernel type.
    #[error("kernel at offset {offset} is '{found}', not the requested kernel type")]
    KernelDowncast { offset: usize, found: &'static str },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn type_mismatch(expected: &Type, got: &Type) -> Self {
        Error::TypeMismatch {
            expected: expected.clone(),
            got: got.clone(),
        }
    }
}

/// Convenience Result type used throughout vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
