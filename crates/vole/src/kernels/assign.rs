use std::marker::PhantomData;

use vole_core::dtype::{load, store};
use vole_core::layout::fixed_dim;
use vole_core::{dispatch_dtype, Error, KernelRequest, Result, Type, TypeVars, WithDType};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::{AssignErrorMode, EvalContext};
use crate::functional::elwise::FixedDimKernel;
use crate::kernel::{Children, Kernel};

/// Copies one scalar, converting between element types.
pub struct ScalarAssign<S, D> {
    _types: PhantomData<fn(S) -> D>,
}

impl<S, D> ScalarAssign<S, D> {
    fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<S: WithDType, D: WithDType> Kernel for ScalarAssign<S, D> {
    fn name(&self) -> &'static str {
        "assign"
    }

    unsafe fn single(&mut self, _children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        store::<D>(dst, load::<S>(src[0]).cast::<D>());
    }

    unsafe fn strided(
        &mut self,
        _children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) {
        let (mut d, mut s) = (dst, src[0]);
        for _ in 0..count {
            store::<D>(d, load::<S>(s).cast::<D>());
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
    }
}

/// Build the kernels assigning `src` into `dst`.
///
/// Scalars convert between dtypes. Matching fixed dimensions are walked
/// together; a destination with more dimensions than the source broadcasts
/// the source along the extra leading dimensions.
pub fn make_assignment(
    ckb: &mut KernelBuilder,
    ectx: &EvalContext,
    dst: ArgDesc<'_>,
    src: ArgDesc<'_>,
    request: KernelRequest,
) -> Result<usize> {
    match (dst.tp, src.tp) {
        (Type::Scalar(dt), Type::Scalar(st)) => {
            if ectx.errmode == AssignErrorMode::Inexact && !st.is_lossless_to(*dt) {
                return Err(Error::LossyAssignment { src: *st, dst: *dt });
            }
            dispatch_dtype!(*st, S => dispatch_dtype!(*dt, D => {
                ckb.emplace(request, ScalarAssign::<S, D>::new())
            }))
        }
        (Type::Fixed { .. }, _) => {
            let (size, dst_stride) = fixed_dim(dst.tp, dst.meta)?;
            let broadcast = dst.tp.ndim() > src.tp.ndim();
            let (src_stride, child_src) = if broadcast {
                (0, src)
            } else {
                let (src_size, src_stride) = fixed_dim(src.tp, src.meta)?;
                if src_size != size {
                    return Err(Error::type_mismatch(dst.tp, src.tp));
                }
                (src_stride, src.peel()?)
            };
            let offset = ckb.emplace(
                request,
                FixedDimKernel::new(size, dst_stride, vec![src_stride]),
            )?;
            make_assignment(ckb, ectx, dst.peel()?, child_src, KernelRequest::Strided)?;
            Ok(offset)
        }
        _ => Err(Error::type_mismatch(dst.tp, src.tp)),
    }
}

struct Assign {
    sig: Signature,
}

impl Operation for Assign {
    fn name(&self) -> &'static str {
        "assign"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve_dst_type(&self, src: &[&Type], _kwds: &Kwds, _tp_vars: &TypeVars) -> Result<Type> {
        Ok(src[0].clone())
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        _kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        make_assignment(ckb, ectx, dst, src[0], request).map(|_| ())
    }
}

/// `(S) -> D`: copy with dtype conversion.
pub fn assign() -> Callable {
    Callable::new(Assign {
        sig: Signature::new(Type::typevar("D"), vec![Type::typevar("S")]),
    })
}
