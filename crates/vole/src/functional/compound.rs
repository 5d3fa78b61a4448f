use vole_core::{KernelRequest, Result, TypeVars};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};

/// Which side of the binary child the running value is passed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// `dst = combine(dst, src)`
    Left,
    /// `dst = combine(src, dst)`
    Right,
}

/// Folds one source into the destination with a binary child, reading the
/// destination as the running value.
pub struct CompoundKernel {
    side: Side,
}

impl Kernel for CompoundKernel {
    fn name(&self) -> &'static str {
        match self.side {
            Side::Left => "left_compound",
            Side::Right => "right_compound",
        }
    }

    unsafe fn single(&mut self, mut children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        let running = dst as *const u8;
        let args = match self.side {
            Side::Left => [running, src[0]],
            Side::Right => [src[0], running],
        };
        children.single(1, dst, &args);
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
        let running = dst as *const u8;
        let (args, strides) = match self.side {
            Side::Left => ([running, src[0]], [dst_stride, src_stride[0]]),
            Side::Right => ([src[0], running], [src_stride[0], dst_stride]),
        };
        children.strided(1, dst, dst_stride, &args, &strides, count);
    }
}

struct Compound {
    child: Callable,
    side: Side,
    sig: Signature,
}

impl Operation for Compound {
    fn name(&self) -> &'static str {
        match self.side {
            Side::Left => "left_compound",
            Side::Right => "right_compound",
        }
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
        let child_src = match self.side {
            Side::Left => [dst, src[0]],
            Side::Right => [src[0], dst],
        };
        ckb.emplace(request, CompoundKernel { side: self.side })?;
        self.child
            .instantiate(ckb, ectx, dst, &child_src, request.data_only(), kwds)
    }
}

fn compound(child: Callable, side: Side) -> Callable {
    let child_sig = child.signature();
    let param = match side {
        Side::Left => child_sig.params.get(1),
        Side::Right => child_sig.params.first(),
    };
    let params = param.cloned().into_iter().collect();
    let sig = Signature::new(child_sig.ret.clone(), params).with_kwds(&child_sig.kwds);
    Callable::new(Compound { child, side, sig })
}

/// `dst = child(dst, src)`: fold each source in after the running value.
pub fn left_compound(child: Callable) -> Callable {
    compound(child, Side::Left)
}

/// `dst = child(src, dst)`: fold each source in before the running value.
pub fn right_compound(child: Callable) -> Callable {
    compound(child, Side::Right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::elementary::{arith, ArithOp};
    use vole_core::{Array, Type};

    fn fold(f: &Callable, seed: i32, values: &[i32]) -> i32 {
        let tp = Type::of::<i32>();
        let mut ckb = KernelBuilder::new();
        f.instantiate(
            &mut ckb,
            &EvalContext::default(),
            ArgDesc::new(&tp, &[]),
            &[ArgDesc::new(&tp, &[])],
            KernelRequest::Strided,
            &Kwds::new(),
        )
        .unwrap();
        let mut acc = seed;
        let (root, children) = ckb.root().unwrap();
        unsafe {
            root.strided(
                children,
                (&mut acc as *mut i32).cast(),
                0,
                &[values.as_ptr().cast()],
                &[4],
                values.len(),
            )
        };
        acc
    }

    #[test]
    fn test_left_and_right_differ_for_sub() {
        let left = left_compound(arith(ArithOp::Sub));
        let right = right_compound(arith(ArithOp::Sub));
        // ((10 - 4) - 3)
        assert_eq!(fold(&left, 10, &[4, 3]), 3);
        // 4 - 10 = -6, then 3 - (-6)
        assert_eq!(fold(&right, 10, &[4, 3]), 9);
    }

    #[test]
    fn test_signature_is_unary() {
        let f = left_compound(arith(ArithOp::Add));
        assert_eq!(f.signature().nsrc(), 1);
        let out = f
            .call(&EvalContext::default(), &[&Array::scalar(5i32)], &Kwds::new())
            .unwrap();
        // The freshly allocated destination starts at zero.
        assert_eq!(out.to_scalar::<i32>().unwrap(), 5);
    }
}
