use vole_core::{Array, KernelRequest, Layout, Result, Type, TypeVars};

use crate::builder::KernelBuilder;
use crate::callable::{ArgDesc, Callable, Kwds, Operation, Signature};
use crate::config::EvalContext;
use crate::kernel::{Children, Kernel};

// Compose — Chain two computations through an intermediate buffer
//
//   src ──first──▶ buffer ──second──▶ dst
//
// Arena layout:
//
//   [ compose | first ... | second ... ]
//               +1          +second_offset
//
// The single path keeps one buffer element. The strided path processes the
// run in chunks of `chunk_size` elements through a buffer run of that many
// elements, so scratch memory is bounded no matter how long the run is.
// Chunking never changes the result: each element goes through `first` then
// `second` exactly once, whatever the chunk boundaries.

pub struct ComposeKernel {
    second_offset: usize,
    buffer: Array,
    run: Option<Array>,
    buffer_stride: isize,
    chunk_size: usize,
}

impl Kernel for ComposeKernel {
    fn name(&self) -> &'static str {
        "compose"
    }

    unsafe fn single(&mut self, mut children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        self.buffer.reset();
        let buf = self.buffer.data_mut_ptr();
        children.single(1, buf, src);
        children.single(self.second_offset, dst, &[buf as *const u8]);
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
        match self.run.as_mut() {
            // Built for single calls: children only have single entry points.
            None => {
                for _ in 0..count {
                    self.buffer.reset();
                    let buf = self.buffer.data_mut_ptr();
                    children.single(1, buf, &cur);
                    children.single(self.second_offset, dst, &[buf as *const u8]);
                    dst = dst.wrapping_offset(dst_stride);
                    for (p, s) in cur.iter_mut().zip(src_stride) {
                        *p = p.wrapping_offset(*s);
                    }
                }
            }
            Some(run) => {
                let mut remaining = count;
                while remaining > 0 {
                    let n = remaining.min(self.chunk_size);
                    run.reset();
                    let buf = run.data_mut_ptr();
                    children.strided(1, buf, self.buffer_stride, &cur, src_stride, n);
                    children.strided(
                        self.second_offset,
                        dst,
                        dst_stride,
                        &[buf as *const u8],
                        &[self.buffer_stride],
                        n,
                    );
                    let step = n as isize;
                    dst = dst.wrapping_offset(step * dst_stride);
                    for (p, s) in cur.iter_mut().zip(src_stride) {
                        *p = p.wrapping_offset(step * *s);
                    }
                    remaining -= n;
                }
            }
        }
    }
}

struct Compose {
    first: Callable,
    second: Callable,
    buffer_tp: Type,
    sig: Signature,
}

impl Operation for Compose {
    fn name(&self) -> &'static str {
        "compose"
    }

    fn signature(&self) -> &Signature {
        &self.sig
    }

    fn resolve_dst_type(&self, _src: &[&Type], kwds: &Kwds, _tp_vars: &TypeVars) -> Result<Type> {
        self.second.resolve_dst_type(&[&self.buffer_tp], kwds)
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
        let chunk_size = ectx.buffer_chunk_size.max(1);
        let buffer = ectx.allocator.allocate(&self.buffer_tp)?;
        let run = if request.is_strided() {
            Some(ectx.allocator.allocate_run(chunk_size, &self.buffer_tp)?)
        } else {
            None
        };
        let buffer_layout = Layout::contiguous(&self.buffer_tp)?;
        let buffer_stride = self.buffer_tp.data_size()? as isize;

        let root = ckb.emplace(
            request,
            ComposeKernel {
                second_offset: 0,
                buffer,
                run,
                buffer_stride,
                chunk_size,
            },
        )?;

        let child_request = request.data_only();
        let buffer_desc = ArgDesc::new(&self.buffer_tp, buffer_layout.dims());
        self.first
            .instantiate(ckb, ectx, buffer_desc, src, child_request, kwds)?;

        let second_offset = ckb.current_size() - root;
        ckb.at_mut::<ComposeKernel>(root)?.second_offset = second_offset;
        self.second
            .instantiate(ckb, ectx, dst, &[buffer_desc], child_request, kwds)
    }
}

/// `first` then `second`, through an intermediate value of type `buffer_tp`.
pub fn compose(first: Callable, second: Callable, buffer_tp: Type) -> Callable {
    let sig = Signature::new(Type::typevar("R"), first.signature().params.clone())
        .with_kwds(&first.signature().kwds)
        .with_kwds(&second.signature().kwds);
    Callable::new(Compose {
        first,
        second,
        buffer_tp,
        sig,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::elementary::unary;
    use vole_core::DType;

    #[test]
    fn test_compose_single() {
        let f = compose(
            unary("double", |x: i32| x * 2),
            unary("widen", |x: i32| x + 1),
            Type::scalar(DType::I32),
        );
        let out = f
            .call(&EvalContext::default(), &[&Array::scalar(20i32)], &Kwds::new())
            .unwrap();
        assert_eq!(out.to_scalar::<i32>().unwrap(), 41);
    }

    #[test]
    fn test_compose_arena_layout() {
        let tp = Type::scalar(DType::F64);
        let f = compose(
            unary("neg", |x: f64| -x),
            unary("half", |x: f64| x / 2.0),
            tp.clone(),
        );
        let src = Array::scalar(3.0f64);
        let dst = Array::scalar(0.0f64);
        let p = f
            .compile(
                &EvalContext::default(),
                ArgDesc::of(&dst),
                &[ArgDesc::of(&src)],
                KernelRequest::Strided,
                &Kwds::new(),
            )
            .unwrap();
        assert_eq!(p.kernel_names(), vec!["compose", "neg", "half"]);
    }

    #[test]
    fn test_single_built_compose_runs_strided_elementwise() {
        let tp = Type::scalar(DType::I32);
        let f = compose(
            unary("double", |x: i32| x * 2),
            unary("dec", |x: i32| x - 1),
            tp.clone(),
        );
        let mut ckb = KernelBuilder::new();
        f.instantiate(
            &mut ckb,
            &EvalContext::default(),
            ArgDesc::new(&tp, &[]),
            &[ArgDesc::new(&tp, &[])],
            KernelRequest::Single,
            &Kwds::new(),
        )
        .unwrap();
        assert!(ckb.at_mut::<ComposeKernel>(0).unwrap().run.is_none());

        let src = [1i32, 5, -4];
        let mut out = [0i32; 3];
        let (root, children) = ckb.root().unwrap();
        unsafe {
            root.kernel_mut().strided(
                children,
                out.as_mut_ptr().cast(),
                4,
                &[src.as_ptr().cast()],
                &[4],
                3,
            )
        };
        assert_eq!(out, [1, 9, -9]);
    }
}
