use std::collections::HashSet;

use tracing::trace;
use vole_core::layout::{fixed_dim, var_dim};
use vole_core::{
    Array, DimKind, Error, KernelRequest, Result, Type, TypeVars, VarDimData,
};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};
use crate::kernels::assign::make_assignment;
use crate::kernels::constant::make_constant;

// Reduction — Dimension-peeling reduction kernels
//
// A reduction folds an accumulate operation `dst = acc(dst, src)` over the
// reduced axes of a source. Instantiation peels one leading dimension per
// step and builds one node for it, chosen by three facts:
//
//   kind       fixed or var dimension
//   broadcast  the axis is kept in the destination (not reduced)
//   inner      it is the last dimension before the scalar operation
//
//   (Fixed, reduce,    outer)  FixedReduceOuter      dst stride 0 for the child
//                              FixedReduceEmpty      size 0 with an identity
//   (Fixed, reduce,    inner)  FixedReduceInner      seeds, then accumulates
//   (Fixed, broadcast, outer)  FixedBroadcastOuter   child per destination element
//   (Fixed, broadcast, inner)  FixedBroadcastInner   seeds a strided run
//   (Var,   reduce,    inner)  VarReduceInner        ragged run behind VarDimData
//   anything else              Error::UnsupportedReduction
//
// Inner nodes own two children: the accumulate kernel at offset 1 and the
// initializer at `init_offset`. The initializer either writes the identity
// (constant kernel) or copies the first element (assignment kernel), in which
// case accumulation starts from the second element.
//
// FIRST AND FOLLOWUP:
//
// A destination cell must be seeded exactly once per reduction run. Every
// node receives a Phase with each call:
//
//   First     the destination cells in this call have not been written yet
//   Followup  they already hold a running value; only accumulate
//
// A node iterating its outer steps derives the phase of step `i` with
// `Phase::at_step`: when the destination stride is 0, every step after the
// first revisits the same cell and continues as Followup.

/// Whether a destination cell still needs seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    First,
    Followup,
}

impl Phase {
    /// Phase of outer step `i` of a call made in phase `self`, where the
    /// destination advances by `dst_stride` per step.
    pub fn at_step(self, i: usize, dst_stride: isize) -> Phase {
        match self {
            Phase::Followup => Phase::Followup,
            Phase::First if i > 0 && dst_stride == 0 => Phase::Followup,
            Phase::First => Phase::First,
        }
    }
}

/// The entry point shared by every node of the reduction family.
///
/// Reduction nodes have exactly one source.
pub trait ReductionStep {
    /// Reduce `count` outer steps.
    ///
    /// # Safety
    /// For every `i < count`, `dst + i * dst_stride` and `src + i * src_stride`
    /// must address values of the destination and source types this node was
    /// instantiated with.
    #[allow(clippy::too_many_arguments)]
    unsafe fn reduce(
        &mut self,
        children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    );
}

/// Plain single/strided calls on a reduction node start a new run.
macro_rules! impl_reduction_kernel {
    ($ty:ty, $name:literal) => {
        impl Kernel for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            unsafe fn single(&mut self, children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
                self.reduce(children, Phase::First, dst, 0, src[0], 0, 1)
            }

            unsafe fn strided(
                &mut self,
                children: Children<'_>,
                dst: *mut u8,
                dst_stride: isize,
                src: &[*const u8],
                src_stride: &[isize],
                count: usize,
            ) {
                self.reduce(
                    children,
                    Phase::First,
                    dst,
                    dst_stride,
                    src[0],
                    src_stride[0],
                    count,
                )
            }

            fn as_reduction(&mut self) -> Option<&mut dyn ReductionStep> {
                Some(self)
            }
        }
    };
}

#[inline]
fn step_mut(p: *mut u8, i: usize, stride: isize) -> *mut u8 {
    p.wrapping_offset(i as isize * stride)
}

#[inline]
fn step(p: *const u8, i: usize, stride: isize) -> *const u8 {
    p.wrapping_offset(i as isize * stride)
}

/// A reduced dimension above the innermost one. All of its elements fold
/// into the same destination, so the child sees destination stride 0.
pub struct FixedReduceOuter {
    size: usize,
    src_elem_stride: isize,
}

impl ReductionStep for FixedReduceOuter {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        for i in 0..count {
            children.reduce(
                1,
                phase.at_step(i, dst_stride),
                step_mut(dst, i, dst_stride),
                0,
                step(src, i, src_stride),
                self.src_elem_stride,
                self.size,
            );
        }
    }
}

impl_reduction_kernel!(FixedReduceOuter, "fixed_reduce_outer");

/// A reduced outer dimension of size 0 when an identity exists: nothing is
/// folded, so each destination is filled by the constant child at offset 1.
pub struct FixedReduceEmpty;

impl ReductionStep for FixedReduceEmpty {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        _src: *const u8,
        _src_stride: isize,
        count: usize,
    ) {
        for i in 0..count {
            if phase.at_step(i, dst_stride) == Phase::First {
                children.single(1, step_mut(dst, i, dst_stride), &[]);
            }
        }
    }
}

impl_reduction_kernel!(FixedReduceEmpty, "fixed_reduce_empty");

/// The innermost reduced fixed dimension.
pub struct FixedReduceInner {
    size: usize,
    src_elem_stride: isize,
    init_offset: usize,
    has_identity: bool,
}

impl ReductionStep for FixedReduceInner {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        let ss = self.src_elem_stride;
        for i in 0..count {
            let (d, s) = (step_mut(dst, i, dst_stride), step(src, i, src_stride));
            match phase.at_step(i, dst_stride) {
                Phase::First => {
                    children.single(self.init_offset, d, &[s]);
                    if self.has_identity {
                        children.strided(1, d, 0, &[s], &[ss], self.size);
                    } else if self.size > 1 {
                        children.strided(1, d, 0, &[s.wrapping_offset(ss)], &[ss], self.size - 1);
                    }
                }
                Phase::Followup => children.strided(1, d, 0, &[s], &[ss], self.size),
            }
        }
    }
}

impl_reduction_kernel!(FixedReduceInner, "fixed_reduce_inner");

/// A kept fixed dimension above the innermost one.
pub struct FixedBroadcastOuter {
    size: usize,
    dst_elem_stride: isize,
    src_elem_stride: isize,
}

impl ReductionStep for FixedBroadcastOuter {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        for i in 0..count {
            children.reduce(
                1,
                phase.at_step(i, dst_stride),
                step_mut(dst, i, dst_stride),
                self.dst_elem_stride,
                step(src, i, src_stride),
                self.src_elem_stride,
                self.size,
            );
        }
    }
}

impl_reduction_kernel!(FixedBroadcastOuter, "fixed_broadcast_outer");

/// The innermost dimension, kept: each element seeds or updates its own cell.
pub struct FixedBroadcastInner {
    size: usize,
    dst_elem_stride: isize,
    src_elem_stride: isize,
    init_offset: usize,
    has_identity: bool,
}

impl ReductionStep for FixedBroadcastInner {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        let (ds, ss) = (self.dst_elem_stride, self.src_elem_stride);
        for i in 0..count {
            let (d, s) = (step_mut(dst, i, dst_stride), step(src, i, src_stride));
            match phase.at_step(i, dst_stride) {
                Phase::First => {
                    children.strided(self.init_offset, d, ds, &[s], &[ss], self.size);
                    if self.has_identity {
                        children.strided(1, d, ds, &[s], &[ss], self.size);
                    }
                }
                Phase::Followup => children.strided(1, d, ds, &[s], &[ss], self.size),
            }
        }
    }
}

impl_reduction_kernel!(FixedBroadcastInner, "fixed_broadcast_inner");

/// The innermost reduced var dimension.
///
/// Without an identity, an empty row cannot seed its destination cell. The
/// cell is left untouched and remembered in `pending`; the next non-empty row
/// reaching it seeds it even though its phase is Followup.
pub struct VarReduceInner {
    src_elem_stride: isize,
    init_offset: usize,
    has_identity: bool,
    pending: HashSet<usize>,
}

impl VarReduceInner {
    /// Seed `d` from the first element of the row, then fold the rest in.
    unsafe fn seed_from_row(
        &mut self,
        children: &mut Children<'_>,
        d: *mut u8,
        begin: *const u8,
        n: usize,
    ) {
        if n == 0 {
            self.pending.insert(d as usize);
            return;
        }
        self.pending.remove(&(d as usize));
        let ss = self.src_elem_stride;
        children.single(self.init_offset, d, &[begin]);
        children.strided(1, d, 0, &[begin.wrapping_offset(ss)], &[ss], n - 1);
    }
}

impl ReductionStep for VarReduceInner {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        let ss = self.src_elem_stride;
        for i in 0..count {
            let d = step_mut(dst, i, dst_stride);
            let row = step(src, i, src_stride).cast::<VarDimData>().read_unaligned();
            let (begin, n) = (row.begin as *const u8, row.size);
            match phase.at_step(i, dst_stride) {
                Phase::First if self.has_identity => {
                    children.single(self.init_offset, d, &[begin]);
                    children.strided(1, d, 0, &[begin], &[ss], n);
                }
                Phase::First => self.seed_from_row(&mut children, d, begin, n),
                Phase::Followup if self.pending.contains(&(d as usize)) => {
                    self.seed_from_row(&mut children, d, begin, n)
                }
                Phase::Followup => children.strided(1, d, 0, &[begin], &[ss], n),
            }
        }
    }
}

impl_reduction_kernel!(VarReduceInner, "var_reduce_inner");

/// Reduction of a zero-dimensional source: seed, then fold the one value in
/// when seeding used the identity.
pub struct ScalarReduction {
    init_offset: usize,
    has_identity: bool,
}

impl ReductionStep for ScalarReduction {
    unsafe fn reduce(
        &mut self,
        mut children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        for i in 0..count {
            let (d, s) = (step_mut(dst, i, dst_stride), step(src, i, src_stride));
            match phase.at_step(i, dst_stride) {
                Phase::First => {
                    children.single(self.init_offset, d, &[s]);
                    if self.has_identity {
                        children.single(1, d, &[s]);
                    }
                }
                Phase::Followup => children.single(1, d, &[s]),
            }
        }
    }
}

impl_reduction_kernel!(ScalarReduction, "scalar_reduction");

/// Construction-time state threaded through the dimension peeling.
#[derive(Debug, Clone)]
pub struct ReductionContext {
    pub identity: Option<Array>,
    /// Dimensions left to peel.
    pub ndim: usize,
    /// Dimensions of the source as passed in.
    pub stored_ndim: usize,
    /// Sorted reduced axes; `None` reduces every dimension.
    pub axes: Option<Vec<usize>>,
    cursor: usize,
    /// Reduced axes left to peel.
    pub naxis: usize,
    pub keepdims: bool,
    /// Absolute arena offset of the most recently built initializer.
    pub init_offset: Option<usize>,
}

impl ReductionContext {
    pub fn new(
        src: &Type,
        axes: Option<&[i64]>,
        keepdims: bool,
        identity: Option<Array>,
    ) -> Result<Self> {
        let ndim = src.ndim();
        let axes = axes.map(|axes| normalize_axes(axes, ndim)).transpose()?;
        Ok(Self {
            identity,
            ndim,
            stored_ndim: ndim,
            naxis: axes.as_ref().map_or(ndim, |a| a.len()),
            axes,
            cursor: 0,
            keepdims,
            init_offset: None,
        })
    }

    /// Index of the dimension about to be peeled.
    pub fn axis(&self) -> usize {
        self.stored_ndim - self.ndim
    }

    /// Whether the dimension about to be peeled is kept in the destination.
    pub fn is_broadcast(&self) -> bool {
        match &self.axes {
            None => false,
            Some(axes) => self.naxis == 0 || axes[self.cursor] != self.axis(),
        }
    }

    pub fn is_inner(&self) -> bool {
        self.ndim == 1
    }

    fn is_reduced(&self, axis: usize) -> bool {
        self.axes.as_ref().is_none_or(|a| a.contains(&axis))
    }

    fn step_reduce(&mut self) {
        self.ndim -= 1;
        self.naxis -= 1;
        self.cursor += 1;
    }

    fn step_broadcast(&mut self) {
        self.ndim -= 1;
    }
}

fn normalize_axes(axes: &[i64], ndim: usize) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let resolved = if axis < 0 { axis + ndim as i64 } else { axis };
        if resolved < 0 || resolved >= ndim as i64 {
            return Err(Error::AxisOutOfRange { axis, ndim });
        }
        out.push(resolved as usize);
    }
    out.sort_unstable();
    if let Some(w) = out.windows(2).find(|w| w[0] == w[1]) {
        return Err(Error::DuplicateAxis { axis: w[0] });
    }
    Ok(out)
}

const REDUCTION_KWDS: [&str; 3] = ["axes", "identity", "keepdims"];

struct Reduction {
    child: Callable,
    default_identity: Option<Array>,
    sig: Signature,
}

impl Reduction {
    fn context(&self, src: &Type, kwds: &Kwds) -> Result<ReductionContext> {
        let axes = kwds.get_ints("axes")?;
        let keepdims = kwds.get_bool("keepdims")?.unwrap_or(false);
        let identity = match kwds.get_array("identity")? {
            Some(a) => Some(a.clone()),
            None => self.default_identity.clone(),
        };
        ReductionContext::new(src, axes.as_deref(), keepdims, identity)
    }

    /// Build the accumulate child at offset 1 and the initializer after it,
    /// recording the initializer's offset in `ctx`.
    #[allow(clippy::too_many_arguments)]
    fn instantiate_scalar(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: ArgDesc<'_>,
        acc_request: KernelRequest,
        init_request: KernelRequest,
        kwds: &Kwds,
        ctx: &mut ReductionContext,
    ) -> Result<()> {
        self.child
            .instantiate(ckb, ectx, dst, &[src], acc_request, kwds)?;
        ctx.init_offset = Some(ckb.current_size());
        match &ctx.identity {
            Some(identity) => make_constant(ckb, ectx, identity, dst, init_request)?,
            None => make_assignment(ckb, ectx, dst, src, init_request)?,
        };
        Ok(())
    }

    fn init_offset(ctx: &ReductionContext, node: usize) -> Result<usize> {
        ctx.init_offset
            .map(|abs| abs - node)
            .ok_or_else(|| Error::msg("reduction initializer was not built"))
    }

    /// Peel the leading dimension of `src` (and of `dst` where it survives).
    #[allow(clippy::too_many_arguments)]
    fn instantiate_dim(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: ArgDesc<'_>,
        request: KernelRequest,
        kwds: &Kwds,
        ctx: &mut ReductionContext,
    ) -> Result<()> {
        let kind = src
            .tp
            .dim_kind()
            .ok_or_else(|| Error::msg(format!("expected a dimension, got {}", src.tp)))?;
        let broadcast = ctx.is_broadcast();
        let inner = ctx.is_inner();
        let axis = ctx.axis();
        let has_identity = ctx.identity.is_some();
        trace!(
            axis,
            %kind,
            broadcast,
            inner,
            remaining = ctx.ndim,
            "reduction dimension"
        );

        match (kind, broadcast, inner) {
            (DimKind::Fixed, false, _) => {
                let (size, src_elem_stride) = fixed_dim(src.tp, src.meta)?;
                let dst = self.reduced_dst(dst, ctx)?;
                ctx.step_reduce();
                if inner {
                    if size == 0 && !has_identity {
                        return Err(Error::EmptyReduction { axis });
                    }
                    let node = ckb.emplace(
                        request,
                        FixedReduceInner {
                            size,
                            src_elem_stride,
                            init_offset: 0,
                            has_identity,
                        },
                    )?;
                    self.instantiate_scalar(
                        ckb,
                        ectx,
                        dst,
                        src.peel()?,
                        KernelRequest::Strided,
                        KernelRequest::Single,
                        kwds,
                        ctx,
                    )?;
                    ckb.at_mut::<FixedReduceInner>(node)?.init_offset =
                        Self::init_offset(ctx, node)?;
                } else if size == 0 {
                    let Some(identity) = &ctx.identity else {
                        return Err(Error::EmptyReduction { axis });
                    };
                    ckb.emplace(request, FixedReduceEmpty)?;
                    make_constant(ckb, ectx, identity, dst, KernelRequest::Single)?;
                } else {
                    let node = ckb.emplace(
                        request,
                        FixedReduceOuter {
                            size,
                            src_elem_stride,
                        },
                    )?;
                    self.instantiate_dim(
                        ckb,
                        ectx,
                        dst,
                        src.peel()?,
                        KernelRequest::Strided,
                        kwds,
                        ctx,
                    )?;
                    ckb.ensure_reduction(node + 1)?;
                }
            }
            (DimKind::Fixed, true, _) => {
                let (size, src_elem_stride) = fixed_dim(src.tp, src.meta)?;
                let (dst_size, dst_elem_stride) = fixed_dim(dst.tp, dst.meta)
                    .map_err(|_| Error::type_mismatch(src.tp, dst.tp))?;
                if dst_size != size {
                    return Err(Error::type_mismatch(src.tp, dst.tp));
                }
                ctx.step_broadcast();
                if inner {
                    let node = ckb.emplace(
                        request,
                        FixedBroadcastInner {
                            size,
                            dst_elem_stride,
                            src_elem_stride,
                            init_offset: 0,
                            has_identity,
                        },
                    )?;
                    self.instantiate_scalar(
                        ckb,
                        ectx,
                        dst.peel()?,
                        src.peel()?,
                        KernelRequest::Strided,
                        KernelRequest::Strided,
                        kwds,
                        ctx,
                    )?;
                    ckb.at_mut::<FixedBroadcastInner>(node)?.init_offset =
                        Self::init_offset(ctx, node)?;
                } else {
                    let node = ckb.emplace(
                        request,
                        FixedBroadcastOuter {
                            size,
                            dst_elem_stride,
                            src_elem_stride,
                        },
                    )?;
                    self.instantiate_dim(
                        ckb,
                        ectx,
                        dst.peel()?,
                        src.peel()?,
                        KernelRequest::Strided,
                        kwds,
                        ctx,
                    )?;
                    ckb.ensure_reduction(node + 1)?;
                }
            }
            (DimKind::Var, false, true) => {
                let src_elem_stride = var_dim(src.tp, src.meta)?;
                let dst = self.reduced_dst(dst, ctx)?;
                ctx.step_reduce();
                let node = ckb.emplace(
                    request,
                    VarReduceInner {
                        src_elem_stride,
                        init_offset: 0,
                        has_identity,
                        pending: HashSet::new(),
                    },
                )?;
                self.instantiate_scalar(
                    ckb,
                    ectx,
                    dst,
                    src.peel()?,
                    KernelRequest::Strided,
                    KernelRequest::Single,
                    kwds,
                    ctx,
                )?;
                ckb.at_mut::<VarReduceInner>(node)?.init_offset = Self::init_offset(ctx, node)?;
            }
            (kind, broadcast, inner) => {
                return Err(Error::UnsupportedReduction {
                    kind,
                    broadcast,
                    inner,
                })
            }
        }
        Ok(())
    }

    /// The destination below a reduced axis: unchanged, or with its size-1
    /// axis peeled when keepdims is set.
    fn reduced_dst<'a>(&self, dst: ArgDesc<'a>, ctx: &ReductionContext) -> Result<ArgDesc<'a>> {
        if !ctx.keepdims {
            return Ok(dst);
        }
        match fixed_dim(dst.tp, dst.meta) {
            Ok((1, _)) => dst.peel(),
            _ => Err(Error::type_mismatch(
                &Type::fixed(1, Type::typevar("R")),
                dst.tp,
            )),
        }
    }
}

impl Operation for Reduction {
    fn name(&self) -> &'static str {
        "reduction"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve_dst_type(&self, src: &[&Type], kwds: &Kwds, _tp_vars: &TypeVars) -> Result<Type> {
        let ctx = self.context(src[0], kwds)?;
        let element = src[0].type_at_dimension(ctx.ndim)?;
        let child_kwds = kwds.without(&REDUCTION_KWDS);
        let mut tp = self.child.resolve_dst_type(&[element], &child_kwds)?;
        for axis in (0..ctx.ndim).rev() {
            if ctx.is_reduced(axis) {
                if ctx.keepdims {
                    tp = Type::fixed(1, tp);
                }
            } else {
                tp = src[0].type_at_dimension(axis)?.with_element(tp)?;
            }
        }
        Ok(tp)
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
        let src = src[0];
        let mut ctx = self.context(src.tp, kwds)?;
        let child_kwds = kwds.without(&REDUCTION_KWDS);

        if ctx.stored_ndim == 0 {
            let node = ckb.emplace(
                request,
                ScalarReduction {
                    init_offset: 0,
                    has_identity: ctx.identity.is_some(),
                },
            )?;
            self.instantiate_scalar(
                ckb,
                ectx,
                dst,
                src,
                KernelRequest::Single,
                KernelRequest::Single,
                &child_kwds,
                &mut ctx,
            )?;
            ckb.at_mut::<ScalarReduction>(node)?.init_offset = Self::init_offset(&ctx, node)?;
            return Ok(());
        }
        self.instantiate_dim(ckb, ectx, dst, src, request, &child_kwds, &mut ctx)
    }
}

/// Reduce with `child` as the accumulate step: `dst = child(dst, src)`,
/// typically a left compound of a binary operation.
///
/// Keywords: `axes` (integer list, negative counts from the end; absent
/// reduces every dimension), `keepdims` (bool), `identity` (array seeding each
/// destination cell; absent copies the first element instead).
pub fn reduction(child: Callable) -> Callable {
    build(child, None)
}

/// As [`reduction`], with an identity used when no `identity` keyword is given.
pub fn reduction_with_identity(child: Callable, identity: Array) -> Callable {
    build(child, Some(identity))
}

fn build(child: Callable, default_identity: Option<Array>) -> Callable {
    let sig = Signature::new(Type::typevar("R"), vec![Type::typevar("S")])
        .with_kwds(&REDUCTION_KWDS)
        .with_kwds(&child.signature().kwds);
    Callable::new(Reduction {
        child,
        default_identity,
        sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transition() {
        assert_eq!(Phase::First.at_step(0, 0), Phase::First);
        assert_eq!(Phase::First.at_step(1, 0), Phase::Followup);
        assert_eq!(Phase::First.at_step(3, 8), Phase::First);
        assert_eq!(Phase::Followup.at_step(0, 8), Phase::Followup);
    }

    #[test]
    fn test_context_axes() {
        let src = Type::from_dims(&[2, 3, 4], vole_core::DType::F32);
        let ctx = ReductionContext::new(&src, Some(&[-1, 0][..]), false, None).unwrap();
        assert_eq!(ctx.axes, Some(vec![0, 2]));
        assert_eq!(ctx.naxis, 2);
        assert!(!ctx.is_broadcast());

        let mut ctx = ctx.clone();
        ctx.step_reduce();
        assert!(ctx.is_broadcast());
        ctx.step_broadcast();
        assert!(!ctx.is_broadcast());
        assert!(ctx.is_inner());
    }

    #[test]
    fn test_context_rejects_bad_axes() {
        let src = Type::from_dims(&[2, 3], vole_core::DType::F32);
        assert!(matches!(
            ReductionContext::new(&src, Some(&[2][..]), false, None),
            Err(Error::AxisOutOfRange { axis: 2, ndim: 2 })
        ));
        assert!(matches!(
            ReductionContext::new(&src, Some(&[1, -1][..]), false, None),
            Err(Error::DuplicateAxis { axis: 1 })
        ));
    }

    #[test]
    fn test_no_axes_left_means_broadcast() {
        let src = Type::from_dims(&[2], vole_core::DType::F32);
        let ctx = ReductionContext::new(&src, Some(&[][..]), false, None).unwrap();
        assert!(ctx.is_broadcast());
    }
}
