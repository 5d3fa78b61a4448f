use vole_core::layout::fixed_dim;
use vole_core::{bail, Error, KernelRequest, Result, Type, TypeVars};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};

/// Walks one fixed dimension, calling its child's strided entry point once
/// per outer element. A source stride of 0 broadcasts that source.
pub struct FixedDimKernel {
    size: usize,
    dst_stride: isize,
    src_stride: Vec<isize>,
}

impl FixedDimKernel {
    pub fn new(size: usize, dst_stride: isize, src_stride: Vec<isize>) -> Self {
        Self {
            size,
            dst_stride,
            src_stride,
        }
    }
}

impl Kernel for FixedDimKernel {
    fn name(&self) -> &'static str {
        "fixed_dim"
    }

    unsafe fn single(&mut self, mut children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        children.strided(1, dst, self.dst_stride, src, &self.src_stride, self.size);
    }

    unsafe fn strided(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) {
        let mut dst = dst;
        let mut cur = src.to_vec();
        for _ in 0..count {
            children.strided(1, dst, self.dst_stride, &cur, &self.src_stride, self.size);
            dst = dst.wrapping_offset(dst_stride);
            for (p, s) in cur.iter_mut().zip(src_stride) {
                *p = p.wrapping_offset(*s);
            }
        }
    }
}

// Elwise — Lift a scalar-level callable over leading fixed dimensions
//
// Sources are aligned from the right, as in numpy broadcasting: a source
// with fewer dimensions than the widest one is repeated (stride 0) along the
// missing leading dimensions. Sources that do have a dimension at the
// current level must agree on its size.
//
//   (3 * 4 * T, 4 * T) -> 3 * 4 * R
//     level 0: src0 peels 3, src1 broadcasts
//     level 1: both peel 4
//     child sees (T, T) -> R

struct Elwise {
    child: Callable,
    sig: Signature,
}

impl Elwise {
    /// Remaining dimensions above the child's parameter for each source.
    fn excess(&self, src: &[&Type]) -> Vec<usize> {
        src.iter()
            .zip(&self.child.signature().params)
            .map(|(tp, param)| tp.ndim().saturating_sub(param.ndim()))
            .collect()
    }

    /// The size of the current level and which sources peel it.
    fn level(src: &[&Type], excess: &[usize]) -> Result<(usize, Vec<bool>)> {
        let depth = excess.iter().copied().max().unwrap_or(0);
        let mut size = None;
        let mut peel = Vec::with_capacity(src.len());
        for (tp, &e) in src.iter().zip(excess) {
            if e < depth {
                peel.push(false);
                continue;
            }
            let dim = match tp {
                Type::Fixed { size, .. } => *size,
                other => bail!("elwise lifts fixed dimensions only, got {}", other),
            };
            match size {
                None => size = Some(dim),
                Some(s) if s == dim => {}
                Some(s) => {
                    return Err(Error::type_mismatch(
                        &Type::fixed(s, Type::typevar("T")),
                        tp,
                    ))
                }
            }
            peel.push(true);
        }
        Ok((size.unwrap_or(0), peel))
    }

    fn resolve(&self, src: &[&Type], kwds: &Kwds) -> Result<Type> {
        let excess = self.excess(src);
        if excess.iter().all(|&e| e == 0) {
            return self.child.resolve_dst_type(src, kwds);
        }
        let (size, peel) = Self::level(src, &excess)?;
        let inner: Vec<&Type> = src
            .iter()
            .zip(&peel)
            .map(|(&tp, &p)| if p { tp.element().unwrap_or(tp) } else { tp })
            .collect();
        Ok(Type::fixed(size, self.resolve(&inner, kwds)?))
    }

    #[allow(clippy::too_many_arguments)]
    fn lift(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        kwds: &Kwds,
    ) -> Result<()> {
        let tps: Vec<&Type> = src.iter().map(|s| s.tp).collect();
        let excess = self.excess(&tps);
        if excess.iter().all(|&e| e == 0) {
            return self.child.instantiate(ckb, ectx, dst, src, request, kwds);
        }

        let (size, peel) = Self::level(&tps, &excess)?;
        let (dst_size, dst_stride) = fixed_dim(dst.tp, dst.meta)?;
        if dst_size != size {
            return Err(Error::type_mismatch(
                &Type::fixed(size, Type::typevar("R")),
                dst.tp,
            ));
        }
        let mut strides = Vec::with_capacity(src.len());
        let mut inner = Vec::with_capacity(src.len());
        for (s, &p) in src.iter().zip(&peel) {
            if p {
                strides.push(fixed_dim(s.tp, s.meta)?.1);
                inner.push(s.peel()?);
            } else {
                strides.push(0);
                inner.push(*s);
            }
        }
        ckb.emplace(request, FixedDimKernel::new(size, dst_stride, strides))?;
        self.lift(ckb, ectx, dst.peel()?, &inner, KernelRequest::Strided, kwds)
    }
}

impl Operation for Elwise {
    fn name(&self) -> &'static str {
        "elwise"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve_dst_type(&self, src: &[&Type], kwds: &Kwds, _tp_vars: &TypeVars) -> Result<Type> {
        self.resolve(src, kwds)
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        self.lift(ckb, ectx, dst, src, request, kwds)
    }
}

/// Lift `child` elementwise over leading fixed dimensions.
pub fn elwise(child: Callable) -> Callable {
    let nsrc = child.signature().nsrc();
    let params = (0..nsrc).map(|i| Type::typevar(format!("A{}", i))).collect();
    let sig = Signature::new(Type::typevar("R"), params).with_kwds(&child.signature().kwds);
    Callable::new(Elwise { child, sig })
}
