use crate::bail;
use crate::error::{Error, Result};
use crate::types::{DimKind, Type};

// Layout — Per-dimension byte layout of one array argument (its "arrmeta")
//
// A Type says how dimensions nest; a Layout says how many bytes to skip to
// move one step along each of them. There is exactly one DimLayout per
// dimension of the type, outermost first, including dimensions nested inside
// a var dimension:
//
//   type:    3 * var * 2 * float64
//   layout:  [Fixed { size: 3, stride: 16 },   // 16 = size_of::<VarDimData>()
//             Var   { stride: 16 },            // between consecutive 2 * float64
//             Fixed { size: 2, stride: 8 }]
//
// KEY CONCEPTS:
//
// 1. **Byte strides**: strides are signed byte counts, so reversed views and
//    broadcasting (stride 0) are expressible.
//
// 2. **Peeling**: a kernel handling the leading dimension reads `meta[0]` and
//    hands `&meta[1..]` to the kernel for the element. Instantiation never
//    needs more than a slice.
//
// 3. **Var dimensions**: the array data at a var position is a VarDimData
//    record pointing at the ragged elements; the layout only records the
//    stride between those elements.

/// The in-memory record stored at each position of a var dimension.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VarDimData {
    /// Address of the first element.
    pub begin: *mut u8,
    /// Number of elements.
    pub size: usize,
}

/// Layout facts for one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimLayout {
    Fixed { size: usize, stride: isize },
    Var { stride: isize },
}

impl DimLayout {
    pub fn stride(&self) -> isize {
        match self {
            DimLayout::Fixed { stride, .. } | DimLayout::Var { stride } => *stride,
        }
    }

    pub fn kind(&self) -> DimKind {
        match self {
            DimLayout::Fixed { .. } => DimKind::Fixed,
            DimLayout::Var { .. } => DimKind::Var,
        }
    }
}

/// Layout describes how an argument's dimensions map to bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Layout {
    dims: Vec<DimLayout>,
}

impl Layout {
    /// Default-construct a C-order layout for the given type.
    pub fn contiguous(tp: &Type) -> Result<Self> {
        let mut dims = Vec::with_capacity(tp.ndim());
        let mut cur = tp;
        loop {
            match cur {
                Type::Fixed { size, element } => {
                    dims.push(DimLayout::Fixed {
                        size: *size,
                        stride: element.data_size()? as isize,
                    });
                    cur = element;
                }
                Type::Var(element) => {
                    dims.push(DimLayout::Var {
                        stride: element.data_size()? as isize,
                    });
                    cur = element;
                }
                Type::TypeVar(name) => {
                    return Err(Error::UnboundTypeVar { name: name.clone() })
                }
                _ => break,
            }
        }
        Ok(Layout { dims })
    }

    /// Create a layout with explicit per-dimension facts (for views).
    pub fn new(dims: Vec<DimLayout>) -> Self {
        Layout { dims }
    }

    /// The arrmeta slice handed to instantiation.
    pub fn dims(&self) -> &[DimLayout] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Check that this layout describes every dimension of `tp`.
    pub fn check(&self, tp: &Type) -> Result<()> {
        check_meta(tp, &self.dims)
    }

    /// Whether this layout equals the default layout for `tp`.
    pub fn is_contiguous(&self, tp: &Type) -> bool {
        Layout::contiguous(tp).map(|c| c == *self).unwrap_or(false)
    }

    /// Iterator over the byte offsets of every element of the leading fixed
    /// dimensions, in logical (row-major) order.
    pub fn strided_offsets(&self) -> StridedIter {
        StridedIter::new(&self.dims)
    }
}

/// Check that an arrmeta slice matches the dimensions of a type.
pub fn check_meta(tp: &Type, meta: &[DimLayout]) -> Result<()> {
    let mut cur = tp;
    for (i, dim) in meta.iter().enumerate() {
        let ok = match (cur, dim) {
            (Type::Fixed { size, .. }, DimLayout::Fixed { size: msize, .. }) => size == msize,
            (Type::Var(_), DimLayout::Var { .. }) => true,
            _ => false,
        };
        if !ok {
            bail!(
                "layout dimension {} ({:?}) does not describe type {}",
                i, dim, cur
            );
        }
        cur = cur
            .element()
            .ok_or_else(|| Error::msg(format!("type {} has no element", cur)))?;
    }
    if cur.dim_kind().is_some() {
        bail!(
            "layout has {} dimensions but type {} has {}",
            meta.len(),
            tp,
            tp.ndim()
        );
    }
    Ok(())
}

/// Leading fixed dimension of an arrmeta slice: `(size, stride)`.
pub fn fixed_dim(tp: &Type, meta: &[DimLayout]) -> Result<(usize, isize)> {
    match (tp, meta.first()) {
        (Type::Fixed { size, .. }, Some(DimLayout::Fixed { stride, .. })) => Ok((*size, *stride)),
        _ => Err(Error::msg(format!(
            "expected a fixed dimension with layout, got {}",
            tp
        ))),
    }
}

/// Stride of the leading var dimension of an arrmeta slice.
pub fn var_dim(tp: &Type, meta: &[DimLayout]) -> Result<isize> {
    match (tp, meta.first()) {
        (Type::Var(_), Some(DimLayout::Var { stride })) => Ok(*stride),
        _ => Err(Error::msg(format!(
            "expected a var dimension with layout, got {}",
            tp
        ))),
    }
}

// StridedIter — Iterates over byte offsets respecting strides
//
// Walks the leading fixed dimensions of a layout in logical order and yields
// the byte offset of each element. Iteration stops at the first var
// dimension: everything below it is reached through VarDimData pointers.

/// Iterator that yields byte offsets for each element of a layout.
pub struct StridedIter {
    /// Current multi-dimensional index.
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<isize>,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(meta: &[DimLayout]) -> Self {
        let mut dims = Vec::new();
        let mut strides = Vec::new();
        for dim in meta {
            match dim {
                DimLayout::Fixed { size, stride } => {
                    dims.push(*size);
                    strides.push(*stride);
                }
                DimLayout::Var { .. } => break,
            }
        }
        let remaining = dims.iter().product();
        StridedIter {
            current: vec![0; dims.len()],
            dims,
            strides,
            remaining,
            started: false,
        }
    }

    fn offset(&self) -> isize {
        self.current
            .iter()
            .zip(&self.strides)
            .map(|(&i, &s)| i as isize * s)
            .sum()
    }

    /// Advance the multi-dimensional index by one (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = isize;

    fn next(&mut self) -> Option<isize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.offset())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_contiguous_layout() {
        let tp = Type::from_dims(&[2, 3], DType::F32);
        let layout = Layout::contiguous(&tp).unwrap();
        assert_eq!(
            layout.dims(),
            &[
                DimLayout::Fixed { size: 2, stride: 12 },
                DimLayout::Fixed { size: 3, stride: 4 }
            ]
        );
        assert!(layout.is_contiguous(&tp));
        layout.check(&tp).unwrap();
    }

    #[test]
    fn test_var_layout() {
        let tp = Type::fixed(3, Type::var(Type::fixed(2, DType::F64.into())));
        let layout = Layout::contiguous(&tp).unwrap();
        let var_size = std::mem::size_of::<VarDimData>() as isize;
        assert_eq!(
            layout.dims(),
            &[
                DimLayout::Fixed { size: 3, stride: var_size },
                DimLayout::Var { stride: 16 },
                DimLayout::Fixed { size: 2, stride: 8 },
            ]
        );
    }

    #[test]
    fn test_check_rejects_wrong_layout() {
        let tp = Type::from_dims(&[2, 3], DType::F32);
        let other = Layout::contiguous(&Type::from_dims(&[2, 4], DType::F32)).unwrap();
        assert!(other.check(&tp).is_err());
        let short = Layout::new(vec![DimLayout::Fixed { size: 2, stride: 12 }]);
        let err = short.check(&tp).unwrap_err();
        assert!(matches!(err, Error::Msg(ref m) if m.contains("layout has 1 dimensions")));
    }

    #[test]
    fn test_contiguous_offsets() {
        let layout = Layout::contiguous(&Type::from_dims(&[2, 3], DType::U8)).unwrap();
        let offsets: Vec<isize> = layout.strided_offsets().collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_transposed_offsets() {
        // [2, 3] bytes read column-major: shape [3, 2] with strides [1, 3]
        let layout = Layout::new(vec![
            DimLayout::Fixed { size: 3, stride: 1 },
            DimLayout::Fixed { size: 2, stride: 3 },
        ]);
        let offsets: Vec<isize> = layout.strided_offsets().collect();
        assert_eq!(offsets, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_scalar_offsets() {
        let layout = Layout::contiguous(&Type::scalar(DType::F64)).unwrap();
        let offsets: Vec<isize> = layout.strided_offsets().collect();
        assert_eq!(offsets, vec![0]);
    }
}
