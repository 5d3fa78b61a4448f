use vole_core::{Array, KernelRequest, Layout, Result, Type, TypeVars};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};
use crate::kernels::assign::make_assignment;

/// Writes a stored value into the destination; sources are ignored.
///
/// The value is held already converted to the destination type, and is
/// copied out through an assignment child at offset 1.
pub struct ConstantKernel {
    value: Array,
}

impl Kernel for ConstantKernel {
    fn name(&self) -> &'static str {
        "constant"
    }

    unsafe fn single(&mut self, mut children: Children<'_>, dst: *mut u8, _src: &[*const u8]) {
        children.single(1, dst, &[self.value.data_ptr()]);
    }

    unsafe fn strided(
        &mut self,
        mut children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        _src: &[*const u8],
        _src_stride: &[isize],
        count: usize,
    ) {
        children.strided(1, dst, dst_stride, &[self.value.data_ptr()], &[0], count);
    }
}

/// Build a constant-fill kernel writing `value` into `dst`.
pub fn make_constant(
    ckb: &mut KernelBuilder,
    ectx: &EvalContext,
    value: &Array,
    dst: ArgDesc<'_>,
    request: KernelRequest,
) -> Result<usize> {
    let converted = convert(ectx, value, dst.tp)?;
    let (value_tp, value_layout) = (converted.tp().clone(), converted.layout().clone());
    let offset = ckb.emplace(request, ConstantKernel { value: converted })?;
    let child_request = if request.is_strided() {
        KernelRequest::Strided
    } else {
        KernelRequest::Single
    };
    make_assignment(
        ckb,
        ectx,
        dst,
        ArgDesc::new(&value_tp, value_layout.dims()),
        child_request,
    )?;
    Ok(offset)
}

/// Convert `value` into a fresh default-layout array of type `tp`.
fn convert(ectx: &EvalContext, value: &Array, tp: &Type) -> Result<Array> {
    let mut out = ectx.allocator.allocate(tp)?;
    let layout = Layout::contiguous(tp)?;
    let mut tmp = KernelBuilder::new();
    make_assignment(
        &mut tmp,
        ectx,
        ArgDesc::new(tp, layout.dims()),
        ArgDesc::of(value),
        KernelRequest::Single,
    )?;
    if let Some((root, children)) = tmp.root() {
        // `out` has type `tp` in default layout, `value` is described by its own layout.
        unsafe { root.single(children, out.data_mut_ptr(), &[value.data_ptr()]) };
    }
    Ok(out)
}

struct Constant {
    value: Array,
    sig: Signature,
}

impl Operation for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve_dst_type(&self, _src: &[&Type], _kwds: &Kwds, _tp_vars: &TypeVars) -> Result<Type> {
        Ok(self.value.tp().clone())
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        _src: &[ArgDesc<'_>],
        request: KernelRequest,
        _kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        make_constant(ckb, ectx, &self.value, dst, request).map(|_| ())
    }
}

/// `() -> D`: fill the destination with `value`, converted to its type.
pub fn constant(value: Array) -> Callable {
    Callable::new(Constant {
        value,
        sig: Signature::new(Type::typevar("D"), Vec::new()),
    })
}
