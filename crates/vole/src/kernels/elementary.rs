use std::sync::Arc;

use vole_core::dtype::{load, store};
use vole_core::{dispatch_dtype, Error, KernelRequest, Result, Type, TypeVars, WithDType};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};

// Elementary — Scalar leaf operations built from Rust closures
//
// These are the leaves the structural kernels wrap: `(T) -> T` and
// `(T, T) -> T` functions applied to one element at a time. User closures
// fix their element type at construction; the built-in arithmetic ops are
// generic over `T` and pick the monomorphization from the destination dtype
// at instantiation.

type UnaryFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
type BinaryFn<T> = Arc<dyn Fn(T, T) -> T + Send + Sync>;

pub struct UnaryKernel<T> {
    name: &'static str,
    f: UnaryFn<T>,
}

impl<T: WithDType> Kernel for UnaryKernel<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    unsafe fn single(&mut self, _children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        store(dst, (self.f)(load::<T>(src[0])));
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
            store(d, (self.f)(load::<T>(s)));
            d = d.wrapping_offset(dst_stride);
            s = s.wrapping_offset(src_stride[0]);
        }
    }
}

pub struct BinaryKernel<T> {
    name: &'static str,
    f: BinaryFn<T>,
}

impl<T: WithDType> Kernel for BinaryKernel<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    unsafe fn single(&mut self, _children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        // Both loads happen before the store: dst may alias a source.
        let (a, b) = (load::<T>(src[0]), load::<T>(src[1]));
        store(dst, (self.f)(a, b));
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
        let (mut d, mut s0, mut s1) = (dst, src[0], src[1]);
        for _ in 0..count {
            let (a, b) = (load::<T>(s0), load::<T>(s1));
            store(d, (self.f)(a, b));
            d = d.wrapping_offset(dst_stride);
            s0 = s0.wrapping_offset(src_stride[0]);
            s1 = s1.wrapping_offset(src_stride[1]);
        }
    }
}

struct Unary<T> {
    name: &'static str,
    f: UnaryFn<T>,
    sig: Signature,
}

impl<T: WithDType> Operation for Unary<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _ectx: &EvalContext,
        _dst: ArgDesc<'_>,
        _src: &[ArgDesc<'_>],
        request: KernelRequest,
        _kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        ckb.emplace(
            request,
            UnaryKernel {
                name: self.name,
                f: self.f.clone(),
            },
        )?;
        Ok(())
    }
}

struct Binary<T> {
    name: &'static str,
    f: BinaryFn<T>,
    sig: Signature,
}

impl<T: WithDType> Operation for Binary<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _ectx: &EvalContext,
        _dst: ArgDesc<'_>,
        _src: &[ArgDesc<'_>],
        request: KernelRequest,
        _kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        ckb.emplace(
            request,
            BinaryKernel {
                name: self.name,
                f: self.f.clone(),
            },
        )?;
        Ok(())
    }
}

/// `(T) -> T` from a closure.
pub fn unary<T, F>(name: &'static str, f: F) -> Callable
where
    T: WithDType,
    F: Fn(T) -> T + Send + Sync + 'static,
{
    Callable::new(Unary {
        name,
        f: Arc::new(f),
        sig: Signature::new(Type::of::<T>(), vec![Type::of::<T>()]),
    })
}

/// `(T, T) -> T` from a closure.
pub fn binary<T, F>(name: &'static str, f: F) -> Callable
where
    T: WithDType,
    F: Fn(T, T) -> T + Send + Sync + 'static,
{
    Callable::new(Binary {
        name,
        f: Arc::new(f),
        sig: Signature::new(Type::of::<T>(), vec![Type::of::<T>(), Type::of::<T>()]),
    })
}

/// Built-in binary arithmetic, defined for every dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Min,
    Max,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Min => "min",
            ArithOp::Max => "max",
        }
    }

    pub fn apply<T: WithDType>(self, a: T, b: T) -> T {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            ArithOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

struct Arith {
    op: ArithOp,
    sig: Signature,
}

impl Operation for Arith {
    fn name(&self) -> &'static str {
        self.op.name()
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        _ectx: &EvalContext,
        dst: ArgDesc<'_>,
        _src: &[ArgDesc<'_>],
        request: KernelRequest,
        _kwds: &Kwds,
        _tp_vars: &TypeVars,
    ) -> Result<()> {
        let dtype = match dst.tp {
            Type::Scalar(dt) => *dt,
            other => return Err(Error::type_mismatch(&Type::typevar("T"), other)),
        };
        let op = self.op;
        dispatch_dtype!(dtype, T => {
            ckb.emplace(
                request,
                BinaryKernel::<T> {
                    name: op.name(),
                    f: Arc::new(move |a: T, b: T| op.apply(a, b)),
                },
            )?
        });
        Ok(())
    }
}

/// `(T, T) -> T` for a built-in arithmetic op over any scalar dtype.
pub fn arith(op: ArithOp) -> Callable {
    let t = Type::typevar("T");
    Callable::new(Arith {
        op,
        sig: Signature::new(t.clone(), vec![t.clone(), t]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::Array;

    fn eval(f: &Callable, a: &Array, b: &Array) -> Array {
        f.call(&EvalContext::default(), &[a, b], &Kwds::new()).unwrap()
    }

    #[test]
    fn test_arith_ops() {
        let a = Array::scalar(7i64);
        let b = Array::scalar(3i64);
        let got: Vec<i64> = [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Min, ArithOp::Max]
            .into_iter()
            .map(|op| eval(&arith(op), &a, &b).to_scalar::<i64>().unwrap())
            .collect();
        assert_eq!(got, vec![10, 4, 21, 3, 7]);
    }

    #[test]
    fn test_arith_rejects_mixed_dtypes() {
        let err = arith(ArithOp::Add)
            .call(
                &EvalContext::default(),
                &[&Array::scalar(1.0f32), &Array::scalar(1.0f64)],
                &Kwds::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_closures() {
        let neg = unary("neg", |x: f64| -x);
        let out = neg
            .call(&EvalContext::default(), &[&Array::scalar(2.0f64)], &Kwds::new())
            .unwrap();
        assert_eq!(out.to_scalar::<f64>().unwrap(), -2.0);

        let hypot = binary("hypot", |a: f32, b: f32| (a * a + b * b).sqrt());
        let out = eval(&hypot, &Array::scalar(3.0f32), &Array::scalar(4.0f32));
        assert_eq!(out.to_scalar::<f32>().unwrap(), 5.0);
    }

    #[test]
    fn test_binary_strided_in_place() {
        let mut acc = [1i32, 2, 3];
        let other = [10i32, 20, 30];
        let mut k = BinaryKernel::<i32> {
            name: "add",
            f: Arc::new(|a: i32, b: i32| a + b),
        };
        let mut no_children: [crate::kernel::KernelSlot; 0] = [];
        unsafe {
            let p = acc.as_mut_ptr().cast::<u8>();
            k.strided(
                Children::new(&mut no_children),
                p,
                4,
                &[p as *const u8, other.as_ptr().cast()],
                &[4, 4],
                3,
            );
        }
        assert_eq!(acc, [11, 22, 33]);
    }
}
