use std::fmt;

// DType — Scalar element types understood by the engine
//
// Every scalar position inside a type descriptor carries a DType. The engine
// never interprets element bytes itself except in leaf kernels, which are
// monomorphized over the Rust type behind the DType:
//
//   F16  — 16-bit IEEE half float
//   BF16 — 16-bit brain float
//   F32  — 32-bit float
//   F64  — 64-bit float
//   U8   — unsigned byte
//   U32  — unsigned 32-bit int
//   I32  — signed 32-bit int
//   I64  — signed 64-bit int
//
// Element bytes live in type-erased buffers at arbitrary byte strides, so all
// loads and stores go through `load`/`store`, which tolerate misalignment.

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    U8,
    U32,
    I32,
    I64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::U8 => 1,
            DType::U32 => 4,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_signed(&self) -> bool {
        !matches!(self, DType::U8 | DType::U32)
    }

    /// Number of significand bits (floats) or value bits (integers).
    fn precision_bits(&self) -> u32 {
        match self {
            DType::F16 => 11,
            DType::BF16 => 8,
            DType::F32 => 24,
            DType::F64 => 53,
            DType::U8 => 8,
            DType::U32 => 32,
            DType::I32 => 31,
            DType::I64 => 63,
        }
    }

    /// Whether every value of `self` is exactly representable in `dst`.
    ///
    /// Used by assignment instantiation when the evaluation context asks for
    /// inexact conversions to be rejected.
    pub fn is_lossless_to(&self, dst: DType) -> bool {
        if *self == dst {
            return true;
        }
        match (self.is_float(), dst.is_float()) {
            // float -> int always drops fractions
            (true, false) => false,
            (true, true) => {
                // bf16 and f16 have incomparable exponent ranges
                if matches!(
                    (self, dst),
                    (DType::F16, DType::BF16) | (DType::BF16, DType::F16)
                ) {
                    return false;
                }
                self.precision_bits() <= dst.precision_bits()
            }
            (false, true) => self.precision_bits() <= dst.precision_bits(),
            (false, false) => {
                if self.is_signed() && !dst.is_signed() {
                    return false;
                }
                self.precision_bits() <= dst.precision_bits()
            }
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::U8 => "uint8",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::I64 => "int64",
        };
        write!(f, "{}", s)
    }
}

// WithDType — Trait that connects Rust types to the DType enum
//
// Leaf kernels are generic over `T: WithDType`; instantiation picks the
// monomorphization from the runtime DType with `dispatch_dtype!`.

/// Trait implemented by Rust types that can be stored as array elements.
pub trait WithDType:
    Copy
    + Send
    + Sync
    + 'static
    + num_traits::NumCast
    + PartialOrd
    + fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }

    /// Convert to another element type.
    ///
    /// In-range values convert exactly as `NumCast` does; out-of-range values
    /// fall back to a saturating conversion through f64.
    fn cast<D: WithDType>(self) -> D {
        num_traits::cast::<Self, D>(self).unwrap_or_else(|| D::from_f64(self.to_f64()))
    }
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

impl WithDType for u8 {
    const DTYPE: DType = DType::U8;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as u8
    }
}

impl WithDType for u32 {
    const DTYPE: DType = DType::U32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as u32
    }
}

impl WithDType for i32 {
    const DTYPE: DType = DType::I32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i32
    }
}

impl WithDType for i64 {
    const DTYPE: DType = DType::I64;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as i64
    }
}

/// Read one element from a possibly unaligned address.
///
/// # Safety
/// `ptr` must be valid for reads of `size_of::<T>()` bytes.
#[inline]
pub unsafe fn load<T: WithDType>(ptr: *const u8) -> T {
    ptr.cast::<T>().read_unaligned()
}

/// Write one element to a possibly unaligned address.
///
/// # Safety
/// `ptr` must be valid for writes of `size_of::<T>()` bytes.
#[inline]
pub unsafe fn store<T: WithDType>(ptr: *mut u8, value: T) {
    ptr.cast::<T>().write_unaligned(value)
}

/// Bind the Rust element type matching a runtime `DType` and evaluate an
/// expression with it.
///
/// ```ignore
/// dispatch_dtype!(dt, T => size_of::<T>())
/// ```
#[macro_export]
macro_rules! dispatch_dtype {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::DType::F16 => {
                type $t = $crate::half::f16;
                $body
            }
            $crate::DType::BF16 => {
                type $t = $crate::half::bf16;
                $body
            }
            $crate::DType::F32 => {
                type $t = f32;
                $body
            }
            $crate::DType::F64 => {
                type $t = f64;
                $body
            }
            $crate::DType::U8 => {
                type $t = u8;
                $body
            }
            $crate::DType::U32 => {
                type $t = u32;
                $body
            }
            $crate::DType::I32 => {
                type $t = i32;
                $body
            }
            $crate::DType::I64 => {
                type $t = i64;
                $body
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::BF16.size_in_bytes(), 2);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::U8.size_in_bytes(), 1);
        assert_eq!(DType::I32.size_in_bytes(), 4);
    }

    #[test]
    fn test_lossless() {
        assert!(DType::F32.is_lossless_to(DType::F64));
        assert!(DType::I32.is_lossless_to(DType::I64));
        assert!(DType::I32.is_lossless_to(DType::F64));
        assert!(DType::U8.is_lossless_to(DType::I32));
        assert!(!DType::F64.is_lossless_to(DType::F32));
        assert!(!DType::F32.is_lossless_to(DType::I64));
        assert!(!DType::I32.is_lossless_to(DType::U32));
        assert!(!DType::I64.is_lossless_to(DType::F64));
        assert!(!DType::F16.is_lossless_to(DType::BF16));
    }

    #[test]
    fn test_cast_saturates_out_of_range() {
        assert_eq!(300.0f64.cast::<u8>(), 255);
        assert_eq!((-5i32).cast::<u32>(), 0);
        assert_eq!(7i64.cast::<f32>(), 7.0);
        assert_eq!(2.75f64.cast::<i32>(), 2);
    }

    #[test]
    fn test_unaligned_load_store() {
        let mut buf = [0u8; 9];
        unsafe {
            store::<f64>(buf.as_mut_ptr().add(1), 1.5);
            assert_eq!(load::<f64>(buf.as_ptr().add(1)), 1.5);
        }
    }

    #[test]
    fn test_dispatch_dtype() {
        let size = dispatch_dtype!(DType::I64, T => std::mem::size_of::<T>());
        assert_eq!(size, 8);
        let size = dispatch_dtype!(DType::BF16, T => std::mem::size_of::<T>());
        assert_eq!(size, 2);
    }
}
