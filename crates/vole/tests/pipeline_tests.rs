// Pipeline tests — Entry-point equivalence, teardown, argument checking

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use vole::prelude::*;
use vole::{DimLayout, TypeVars};

fn scalar_i64() -> Type {
    Type::of::<i64>()
}

fn compile_scalar(f: &Callable, nsrc: usize, request: KernelRequest) -> Pipeline {
    let tp = scalar_i64();
    let src = vec![ArgDesc::new(&tp, &[]); nsrc];
    f.compile(
        &EvalContext::default(),
        ArgDesc::new(&tp, &[]),
        &src,
        request,
        &Kwds::new(),
    )
    .unwrap()
}

// Strided equals repeated single

fn add_strided(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut p = compile_scalar(&ops::add(), 2, KernelRequest::Strided);
    let mut out = vec![0i64; a.len()];
    unsafe {
        p.strided(
            out.as_mut_ptr().cast(),
            8,
            &[a.as_ptr().cast(), b.as_ptr().cast()],
            &[8, 8],
            a.len(),
        )
        .unwrap();
    }
    out
}

fn add_single(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut p = compile_scalar(&ops::add(), 2, KernelRequest::Single);
    let mut out = vec![0i64; a.len()];
    for i in 0..a.len() {
        unsafe {
            p.single(
                (&mut out[i] as *mut i64).cast(),
                &[(&a[i] as *const i64).cast(), (&b[i] as *const i64).cast()],
            )
            .unwrap();
        }
    }
    out
}

const ROW: usize = 4;

fn row_type() -> Type {
    Type::fixed(ROW, scalar_i64())
}

fn row_meta() -> [DimLayout; 1] {
    [DimLayout::Fixed {
        size: ROW,
        stride: 8,
    }]
}

/// Sum each row of `values` (rows of ROW elements) with one pipeline.
fn row_sums(values: &[i64], request: KernelRequest) -> Vec<i64> {
    let (tp, dst_tp) = (row_type(), scalar_i64());
    let meta = row_meta();
    let mut p = ops::sum()
        .compile(
            &EvalContext::default(),
            ArgDesc::new(&dst_tp, &[]),
            &[ArgDesc::new(&tp, &meta)],
            request,
            &Kwds::new(),
        )
        .unwrap();
    let rows = values.len() / ROW;
    let mut out = vec![-1i64; rows];
    unsafe {
        if request.is_strided() {
            p.strided(
                out.as_mut_ptr().cast(),
                8,
                &[values.as_ptr().cast()],
                &[(ROW * 8) as isize],
                rows,
            )
            .unwrap();
        } else {
            for (r, cell) in out.iter_mut().enumerate() {
                let row = values.as_ptr().add(r * ROW);
                p.single((cell as *mut i64).cast(), &[row.cast()]).unwrap();
            }
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_strided_matches_single_for_leaf(
        pairs in prop::collection::vec((-1000i64..1000, -1000i64..1000), 0..64),
    ) {
        let (a, b): (Vec<i64>, Vec<i64>) = pairs.into_iter().unzip();
        prop_assert_eq!(add_strided(&a, &b), add_single(&a, &b));
    }

    #[test]
    fn prop_strided_matches_single_for_reduction(
        rows in prop::collection::vec(prop::collection::vec(-1000i64..1000, ROW), 0..16),
    ) {
        let values: Vec<i64> = rows.concat();
        let expected: Vec<i64> = rows.iter().map(|r| r.iter().sum()).collect();
        prop_assert_eq!(row_sums(&values, KernelRequest::Strided), expected.clone());
        prop_assert_eq!(row_sums(&values, KernelRequest::Single), expected);
    }
}

// Teardown of a partially built arena

type DropLog = Arc<Mutex<Vec<&'static str>>>;

struct DropTracker {
    tag: &'static str,
    log: DropLog,
}

impl Drop for DropTracker {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(self.tag);
    }
}

impl Kernel for DropTracker {
    fn name(&self) -> &'static str {
        self.tag
    }

    unsafe fn single(&mut self, _children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        dst.cast::<i64>()
            .write_unaligned(src[0].cast::<i64>().read_unaligned());
    }
}

/// Emplaces a tracker, then optionally fails.
struct Tracked {
    tag: &'static str,
    fail: bool,
    log: DropLog,
    sig: Signature,
}

impl Operation for Tracked {
    fn name(&self) -> &'static str {
        self.tag
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
            DropTracker {
                tag: self.tag,
                log: self.log.clone(),
            },
        )?;
        if self.fail {
            return Err(Error::msg(format!("{} refused to build", self.tag)));
        }
        Ok(())
    }
}

fn tracked(tag: &'static str, fail: bool, log: &DropLog) -> Callable {
    Callable::new(Tracked {
        tag,
        fail,
        log: log.clone(),
        sig: Signature::new(scalar_i64(), vec![scalar_i64()]),
    })
}

#[test]
fn test_failed_instantiation_drops_in_reverse() {
    let log: DropLog = Arc::default();
    let inner = compose(tracked("a", false, &log), tracked("b", false, &log), scalar_i64());
    let f = compose(inner, tracked("c", true, &log), scalar_i64());
    let tp = scalar_i64();
    let err = f
        .compile(
            &EvalContext::default(),
            ArgDesc::new(&tp, &[]),
            &[ArgDesc::new(&tp, &[])],
            KernelRequest::Single,
            &Kwds::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Msg(_)));
    assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
}

#[test]
fn test_pipeline_drop_runs_in_reverse() {
    let log: DropLog = Arc::default();
    let f = compose(tracked("a", false, &log), tracked("b", false, &log), scalar_i64());
    let mut p = compile_scalar(&f, 1, KernelRequest::Single);
    assert_eq!(p.kernel_names(), vec!["compose", "a", "b"]);

    let (src, mut dst) = (42i64, 0i64);
    unsafe {
        p.single((&mut dst as *mut i64).cast(), &[(&src as *const i64).cast()])
            .unwrap();
    }
    assert_eq!(dst, 42);
    assert!(log.lock().unwrap().is_empty());
    drop(p);
    assert_eq!(*log.lock().unwrap(), vec!["b", "a"]);
}

// Request kinds

#[test]
fn test_request_mismatch() {
    let (a, b, mut out) = (1i64, 2i64, 0i64);
    let src: [*const u8; 2] = [(&a as *const i64).cast(), (&b as *const i64).cast()];
    let dst = (&mut out as *mut i64).cast::<u8>();

    let mut single = compile_scalar(&ops::add(), 2, KernelRequest::Single);
    let err = unsafe { single.strided(dst, 0, &src, &[0, 0], 1) }.unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedRequest {
            request: KernelRequest::Strided,
            ..
        }
    ));

    let mut strided = compile_scalar(&ops::add(), 2, KernelRequest::Strided);
    let err = unsafe { strided.single(dst, &src) }.unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedRequest {
            request: KernelRequest::Single,
            ..
        }
    ));
    assert_eq!(out, 0);

    let mut call = compile_scalar(&ops::add(), 2, KernelRequest::Call);
    let err = unsafe { call.strided(dst, 0, &src, &[0, 0], 1) }.unwrap_err();
    assert!(matches!(
        err,
        Error::UnsupportedRequest {
            request: KernelRequest::Strided,
            ..
        }
    ));
    unsafe { call.single(dst, &src) }.unwrap();
    assert_eq!(out, 3);
}

#[test]
fn test_unrecognized_request_value() {
    assert_eq!(KernelRequest::try_from(2u32).unwrap(), KernelRequest::Strided);
    let err = KernelRequest::try_from(7u32).unwrap_err();
    assert!(matches!(err, Error::UnrecognizedRequest { value: 7 }));
}

#[test]
fn test_call_request_stays_at_root() {
    let f = elwise(ops::mul());
    let a = Array::from_slice(&[1i32, 2, 3], &[3]).unwrap();
    let mut dst = Array::from_slice(&[0i32; 3], &[3]).unwrap();
    let mut p = f
        .compile(
            &EvalContext::default(),
            ArgDesc::of(&dst),
            &[ArgDesc::of(&a), ArgDesc::of(&a)],
            KernelRequest::Call,
            &Kwds::new(),
        )
        .unwrap();
    assert_eq!(p.request(), KernelRequest::Call);
    let requests: Vec<KernelRequest> = (0..p.builder().len())
        .map(|i| p.builder().at(i).unwrap().request())
        .collect();
    assert_eq!(requests, vec![KernelRequest::Call, KernelRequest::Strided]);
    p.call(&mut dst, &[&a, &a]).unwrap();
    assert_eq!(dst.to_vec::<i32>().unwrap(), vec![1, 4, 9]);
}

// Argument checking

#[test]
fn test_call_checks_types_and_layouts() {
    let f = elwise(ops::add());
    let a = Array::from_slice(&[1i32, 2, 3, 4], &[2, 2]).unwrap();
    let mut dst = Array::from_slice(&[0i32; 4], &[2, 2]).unwrap();
    let mut p = f
        .compile(
            &EvalContext::default(),
            ArgDesc::of(&dst),
            &[ArgDesc::of(&a), ArgDesc::of(&a)],
            KernelRequest::Call,
            &Kwds::new(),
        )
        .unwrap();

    let transposed = a
        .clone()
        .with_layout(
            Type::from_dims(&[2, 2], DType::I32),
            Layout::new(vec![
                DimLayout::Fixed { size: 2, stride: 4 },
                DimLayout::Fixed { size: 2, stride: 8 },
            ]),
        )
        .unwrap();
    let err = p.call(&mut dst, &[&a, &transposed]).unwrap_err();
    assert!(matches!(err, Error::LayoutMismatch { .. }));

    let wide = Array::from_slice(&[1i64, 2, 3, 4], &[2, 2]).unwrap();
    let err = p.call(&mut dst, &[&wide, &a]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));

    let err = p.call(&mut dst, &[&a]).unwrap_err();
    assert!(matches!(err, Error::ArgCountMismatch { expected: 2, got: 1 }));

    p.call(&mut dst, &[&a, &a]).unwrap();
    assert_eq!(dst.to_vec::<i32>().unwrap(), vec![2, 4, 6, 8]);
}

#[test]
fn test_unknown_keyword() {
    let kwds = Kwds::new().with("axes", vec![0i64]);
    let err = ops::add()
        .call(
            &EvalContext::default(),
            &[&Array::scalar(1i32), &Array::scalar(2i32)],
            &kwds,
        )
        .unwrap_err();
    assert!(matches!(err, Error::UnknownKeyword { ref name } if name == "axes"));
}

#[test]
fn test_argument_count() {
    let err = ops::add()
        .call(&EvalContext::default(), &[&Array::scalar(1i32)], &Kwds::new())
        .unwrap_err();
    assert!(matches!(err, Error::ArgCountMismatch { expected: 2, got: 1 }));
}

#[test]
fn test_lossy_assignment_checked_only_when_asked() {
    let tp_f = Type::of::<f64>();
    let tp_i = Type::of::<i32>();
    let build = |ectx: &EvalContext| {
        assign().compile(
            ectx,
            ArgDesc::new(&tp_i, &[]),
            &[ArgDesc::new(&tp_f, &[])],
            KernelRequest::Single,
            &Kwds::new(),
        )
    };
    assert!(build(&EvalContext::default()).is_ok());
    let checked = EvalContext::default().with_errmode(AssignErrorMode::Inexact);
    let err = build(&checked).unwrap_err();
    assert!(matches!(
        err,
        Error::LossyAssignment {
            src: DType::F64,
            dst: DType::I32
        }
    ));
}
