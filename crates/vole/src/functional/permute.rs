use vole_core::{Error, KernelRequest, Result, Type, TypeVars};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};

// Permute — Present the caller's arguments to a child in another order
//
// `perm[i]` names the caller slot the child's argument `i` is taken from.
// In the destination-inclusive form, `-1` stands for the caller's
// destination: the child then returns void and writes through that argument.
//
//   perm = [1, -1, 0]     caller (dst; s0, s1)  →  child (void; s1, dst, s0)
//
// The same mapping is applied to types, layouts, data pointers and strides,
// so every view of an argument moves together.

const DST: isize = -1;

/// Where one child argument comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Dst,
    Src(usize),
}

pub struct PermuteKernel {
    slots: Vec<Slot>,
    /// Whether the child writes through an argument instead of a destination.
    inclusive: bool,
}

impl PermuteKernel {
    fn ptrs(&self, dst: *mut u8, src: &[*const u8]) -> Vec<*const u8> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Dst => dst as *const u8,
                Slot::Src(j) => src[*j],
            })
            .collect()
    }

    fn strides(&self, dst_stride: isize, src_stride: &[isize]) -> Vec<isize> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Dst => dst_stride,
                Slot::Src(j) => src_stride[*j],
            })
            .collect()
    }

    fn child_dst(&self, dst: *mut u8) -> *mut u8 {
        if self.inclusive {
            std::ptr::null_mut()
        } else {
            dst
        }
    }
}

impl Kernel for PermuteKernel {
    fn name(&self) -> &'static str {
        "permute"
    }

    unsafe fn single(&mut self, mut children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        let ptrs = self.ptrs(dst, src);
        children.single(1, self.child_dst(dst), &ptrs);
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
        let ptrs = self.ptrs(dst, src);
        let strides = self.strides(dst_stride, src_stride);
        let child_stride = if self.inclusive { 0 } else { dst_stride };
        children.strided(
            1,
            self.child_dst(dst),
            child_stride,
            &ptrs,
            &strides,
            count,
        );
    }
}

struct Permute {
    child: Callable,
    slots: Vec<Slot>,
    inclusive: bool,
    sig: Signature,
}

impl Operation for Permute {
    fn name(&self) -> &'static str {
        "permute"
    }

    fn signature(&self) -> &Signature {
        &self.sig
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
        let child_src: Vec<ArgDesc<'_>> = self
            .slots
            .iter()
            .map(|slot| match slot {
                Slot::Dst => dst,
                Slot::Src(j) => src[*j],
            })
            .collect();
        ckb.emplace(
            request,
            PermuteKernel {
                slots: self.slots.clone(),
                inclusive: self.inclusive,
            },
        )?;
        let void = Type::Void;
        let child_dst = if self.inclusive {
            ArgDesc::new(&void, &[])
        } else {
            dst
        };
        self.child.instantiate(
            ckb,
            ectx,
            child_dst,
            &child_src,
            request.data_only(),
            kwds,
        )
    }
}

/// Reorder (and possibly duplicate) the arguments seen by `child`.
///
/// With a `-1` entry the caller's destination is passed to the child as that
/// argument and the child must return void.
pub fn permute(child: Callable, perm: &[isize]) -> Result<Callable> {
    let invalid = |reason: &str| Error::InvalidPermutation {
        perm: perm.to_vec(),
        reason: reason.to_string(),
    };

    let child_sig = child.signature();
    if perm.len() != child_sig.nsrc() {
        return Err(invalid(&format!(
            "child '{}' takes {} arguments",
            child.name(),
            child_sig.nsrc()
        )));
    }
    let ndst = perm.iter().filter(|&&p| p == DST).count();
    if ndst > 1 {
        return Err(invalid("the destination may appear at most once"));
    }
    let inclusive = ndst == 1;
    if inclusive && !matches!(child_sig.ret, Type::Void | Type::TypeVar(_)) {
        return Err(invalid("a destination-inclusive child must return void"));
    }

    if let Some(&p) = perm.iter().find(|&&p| p < DST) {
        return Err(invalid(&format!("negative index {}", p)));
    }

    // Sources may repeat: the caller's arity is the highest index plus one.
    let nsrc = perm.iter().filter(|&&p| p >= 0).max().map_or(0, |&p| p as usize + 1);
    let mut seen = vec![false; nsrc];
    let mut slots = Vec::with_capacity(perm.len());
    for &p in perm {
        if p == DST {
            slots.push(Slot::Dst);
        } else {
            seen[p as usize] = true;
            slots.push(Slot::Src(p as usize));
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(invalid(&format!("source {} is never used", missing)));
    }

    // Caller parameter j takes the child's type at the first position reading it.
    let mut params = vec![Type::Void; nsrc];
    for (j, param) in params.iter_mut().enumerate() {
        if let Some(i) = slots.iter().position(|s| *s == Slot::Src(j)) {
            *param = child_sig.params[i].clone();
        }
    }
    let ret = match slots.iter().position(|s| *s == Slot::Dst) {
        Some(i) => child_sig.params[i].clone(),
        None => child_sig.ret.clone(),
    };
    let sig = Signature::new(ret, params).with_kwds(&child_sig.kwds);

    Ok(Callable::new(Permute {
        child,
        slots,
        inclusive,
        sig,
    }))
}
