use std::fmt;
use std::sync::Arc;

use crate::dtype::{load, store, WithDType};
use crate::bail;
use crate::error::{Error, Result};
use crate::layout::{DimLayout, Layout, VarDimData};
use crate::types::Type;

// Array — Minimal owned storage for one typed, laid-out value
//
// The engine itself never allocates user arrays; it only needs something
// that pairs a byte buffer with a Type and a Layout so callers can hand it
// argument addresses, and so scratch buffers (Compose) and constant values
// (identity seeding) have a home.
//
// Var dimensions store VarDimData records inside `data`; the ragged elements
// those records point at live in `blocks`, which are reference counted so a
// cloned array keeps them alive.

/// A byte buffer interpreted through a type and a layout.
#[derive(Clone)]
pub struct Array {
    tp: Type,
    layout: Layout,
    data: Vec<u8>,
    blocks: Vec<Arc<Vec<u8>>>,
}

impl Array {
    /// Zero-initialized storage for `tp` in default layout.
    ///
    /// Var dimensions start out empty.
    pub fn empty(tp: Type) -> Result<Self> {
        let layout = Layout::contiguous(&tp)?;
        let data = vec![0u8; tp.data_size()?];
        Ok(Array {
            tp,
            layout,
            data,
            blocks: Vec::new(),
        })
    }

    /// A zero-dimensional array holding one element.
    pub fn scalar<T: WithDType>(value: T) -> Self {
        let mut data = vec![0u8; std::mem::size_of::<T>()];
        unsafe { store(data.as_mut_ptr(), value) };
        Array {
            tp: Type::of::<T>(),
            layout: Layout::default(),
            data,
            blocks: Vec::new(),
        }
    }

    /// A C-order array with the given fixed dimensions.
    pub fn from_slice<T: WithDType>(values: &[T], dims: &[usize]) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != values.len() {
            bail!(
                "element count mismatch: dims {:?} require {} elements, got {}",
                dims,
                expected,
                values.len()
            );
        }
        let tp = Type::from_dims(dims, T::DTYPE);
        let layout = Layout::contiguous(&tp)?;
        Ok(Array {
            tp,
            layout,
            data: pack(values),
            blocks: Vec::new(),
        })
    }

    pub fn from_vec<T: WithDType>(values: Vec<T>, dims: &[usize]) -> Result<Self> {
        Self::from_slice(&values, dims)
    }

    /// A `N * var * T` array from ragged rows.
    pub fn from_ragged<T: WithDType>(rows: &[Vec<T>]) -> Self {
        let elem = std::mem::size_of::<T>();
        let block = Arc::new(pack(&rows.concat()));
        let tp = Type::fixed(rows.len(), Type::var(Type::of::<T>()));
        let record = std::mem::size_of::<VarDimData>();
        let mut data = vec![0u8; rows.len() * record];

        let base = block.as_ptr() as *mut u8;
        let mut start = 0usize;
        for (i, row) in rows.iter().enumerate() {
            let entry = VarDimData {
                // Wrapping arithmetic: an empty trailing row may point one past the block.
                begin: base.wrapping_add(start * elem),
                size: row.len(),
            };
            unsafe {
                data.as_mut_ptr()
                    .add(i * record)
                    .cast::<VarDimData>()
                    .write_unaligned(entry)
            };
            start += row.len();
        }

        Array {
            layout: Layout::new(vec![
                DimLayout::Fixed {
                    size: rows.len(),
                    stride: record as isize,
                },
                DimLayout::Var {
                    stride: elem as isize,
                },
            ]),
            tp,
            data,
            blocks: vec![block],
        }
    }

    /// Reinterpret the same bytes through another fixed-dimension type and layout.
    ///
    /// Every element addressed by the new layout must lie inside the buffer.
    pub fn with_layout(self, tp: Type, layout: Layout) -> Result<Self> {
        layout.check(&tp)?;
        let elem = match tp.type_at_dimension(layout.ndim())? {
            Type::Scalar(dt) => dt.size_in_bytes() as isize,
            other => {
                bail!(
                    "with_layout requires fixed dimensions over a scalar, got element {}",
                    other
                )
            }
        };
        for offset in layout.strided_offsets() {
            if offset < 0 || offset + elem > self.data.len() as isize {
                return Err(Error::LayoutMismatch {
                    arg: format!("view {} reaches byte {}", tp, offset),
                });
            }
        }
        Ok(Array {
            tp,
            layout,
            data: self.data,
            blocks: self.blocks,
        })
    }

    pub fn tp(&self) -> &Type {
        &self.tp
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The arrmeta slice describing this array's dimensions.
    pub fn meta(&self) -> &[DimLayout] {
        self.layout.dims()
    }

    pub fn data_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    pub fn data_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Zero the buffer and drop any ragged storage it referenced.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.blocks.clear();
    }

    /// Copy out the elements in logical order.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        if self.meta().iter().any(|d| matches!(d, DimLayout::Var { .. })) {
            bail!(
                "to_vec needs fixed dimensions only, array has type {}",
                self.tp
            );
        }
        let elem_tp = self.tp.type_at_dimension(self.layout.ndim())?;
        if *elem_tp != Type::of::<T>() {
            return Err(Error::type_mismatch(&Type::of::<T>(), elem_tp));
        }
        let base = self.data.as_ptr();
        Ok(self
            .layout
            .strided_offsets()
            .map(|off| unsafe { load::<T>(base.offset(off)) })
            .collect())
    }

    pub fn to_scalar<T: WithDType>(&self) -> Result<T> {
        if self.tp != Type::of::<T>() {
            return Err(Error::type_mismatch(&Type::of::<T>(), &self.tp));
        }
        Ok(unsafe { load::<T>(self.data.as_ptr()) })
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("tp", &self.tp.to_string())
            .field("layout", &self.layout)
            .field("nbytes", &self.data.len())
            .finish()
    }
}

fn pack<T: WithDType>(values: &[T]) -> Vec<u8> {
    let elem = std::mem::size_of::<T>();
    let mut data = vec![0u8; values.len() * elem];
    for (i, v) in values.iter().enumerate() {
        unsafe { store(data.as_mut_ptr().add(i * elem), *v) };
    }
    data
}

// BufferAllocator — The allocation capability handed to the engine
//
// Kernels that need scratch space (Compose) or materialized values (constant
// seeding) ask this capability instead of choosing an allocation policy.

/// Allocates arrays on behalf of the engine.
pub trait BufferAllocator: Send + Sync + fmt::Debug {
    /// Storage for one value of `tp`.
    fn allocate(&self, tp: &Type) -> Result<Array>;

    /// Storage for a run of `count` values of `tp` (a `count * tp` array).
    fn allocate_run(&self, count: usize, tp: &Type) -> Result<Array> {
        self.allocate(&Type::fixed(count, tp.clone()))
    }
}

/// Allocates zeroed arrays on the heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, tp: &Type) -> Result<Array> {
        Array::empty(tp.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_from_slice_roundtrip() {
        let a = Array::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(a.tp(), &Type::from_dims(&[2, 3], DType::F32));
        assert_eq!(a.nbytes(), 24);
        assert_eq!(a.to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_element_count_mismatch() {
        let err = Array::from_slice(&[1i32, 2, 3], &[2, 2]).unwrap_err();
        assert!(matches!(err, Error::Msg(ref m) if m.contains("element count mismatch")));
    }

    #[test]
    fn test_to_vec_dtype_mismatch() {
        let a = Array::from_slice(&[1i64, 2], &[2]).unwrap();
        assert!(a.to_vec::<f64>().is_err());
    }

    #[test]
    fn test_scalar() {
        let a = Array::scalar(7u32);
        assert_eq!(a.tp(), &Type::scalar(DType::U32));
        assert_eq!(a.to_scalar::<u32>().unwrap(), 7);
        assert!(a.meta().is_empty());
    }

    #[test]
    fn test_transposed_view() {
        let a = Array::from_slice(&[0u8, 1, 2, 3, 4, 5], &[2, 3]).unwrap();
        let t = a
            .with_layout(
                Type::from_dims(&[3, 2], DType::U8),
                Layout::new(vec![
                    DimLayout::Fixed { size: 3, stride: 1 },
                    DimLayout::Fixed { size: 2, stride: 3 },
                ]),
            )
            .unwrap();
        assert_eq!(t.to_vec::<u8>().unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_view_out_of_bounds() {
        let a = Array::from_slice(&[0u8, 1, 2, 3], &[4]).unwrap();
        let res = a.with_layout(
            Type::from_dims(&[4], DType::U8),
            Layout::new(vec![DimLayout::Fixed { size: 4, stride: 2 }]),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_ragged_records() {
        let a = Array::from_ragged(&[vec![1i32, 2, 3], vec![], vec![4]]);
        assert_eq!(a.tp().to_string(), "3 * var * int32");
        let record = std::mem::size_of::<VarDimData>();
        let sizes: Vec<usize> = (0..3)
            .map(|i| unsafe {
                a.data_ptr()
                    .add(i * record)
                    .cast::<VarDimData>()
                    .read_unaligned()
                    .size
            })
            .collect();
        assert_eq!(sizes, vec![3, 0, 1]);

        let last = unsafe {
            a.data_ptr()
                .add(2 * record)
                .cast::<VarDimData>()
                .read_unaligned()
        };
        assert_eq!(unsafe { load::<i32>(last.begin) }, 4);
    }

    #[test]
    fn test_heap_allocator_run() {
        let a = HeapAllocator.allocate_run(4, &Type::scalar(DType::F64)).unwrap();
        assert_eq!(a.tp(), &Type::from_dims(&[4], DType::F64));
        assert_eq!(a.to_vec::<f64>().unwrap(), vec![0.0; 4]);
    }

    #[test]
    fn test_reset_zeroes() {
        let mut a = Array::from_slice(&[3i64, 4], &[2]).unwrap();
        a.reset();
        assert_eq!(a.to_vec::<i64>().unwrap(), vec![0, 0]);
    }
}
