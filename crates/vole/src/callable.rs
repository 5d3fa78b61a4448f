use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use vole_core::layout::check_meta;
use vole_core::{bail, Array, DimLayout, Error, KernelRequest, Result, Type, TypeVars};

use crate::builder::KernelBuilder;
use crate::config::EvalContext;
use crate::pipeline::Pipeline;

// Callable — The instantiation protocol
//
// An Operation is a recipe for building kernels. Given concrete destination
// and source descriptors it appends one or more nodes to a KernelBuilder,
// recursing into the operations it wraps:
//
//   compile(dst, src, request, kwds)
//     └── bind signature          → TypeVars, or TypeMismatch / ArgCountMismatch
//     └── op.instantiate(...)     → appends the op's node(s)
//           └── child.instantiate(...)   → appends the child's nodes after it
//
// Instantiation only ever appends. If any step fails, the caller drops the
// builder, which destroys every node already emplaced, newest first.
//
// Static data (wrapped callables, permutation vectors, buffer types) lives in
// the Operation value itself and is read-only during instantiation.

/// Type and layout of one argument, as seen by instantiation.
#[derive(Debug, Clone, Copy)]
pub struct ArgDesc<'a> {
    pub tp: &'a Type,
    pub meta: &'a [DimLayout],
}

impl<'a> ArgDesc<'a> {
    pub fn new(tp: &'a Type, meta: &'a [DimLayout]) -> Self {
        Self { tp, meta }
    }

    pub fn of(array: &'a Array) -> Self {
        Self {
            tp: array.tp(),
            meta: array.meta(),
        }
    }

    /// The descriptor of one element of the leading dimension.
    pub fn peel(&self) -> Result<ArgDesc<'a>> {
        let tp: &'a Type = self.tp;
        let element = tp
            .element()
            .ok_or_else(|| Error::msg(format!("cannot peel a dimension off {}", tp)))?;
        let meta = self
            .meta
            .get(1..)
            .ok_or_else(|| Error::msg(format!("layout for {} has no dimensions", tp)))?;
        Ok(ArgDesc { tp: element, meta })
    }
}

/// The declared signature of an operation: `(params...) -> ret`, plus the
/// keyword names it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub ret: Type,
    pub params: Vec<Type>,
    pub kwds: Vec<String>,
}

impl Signature {
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self {
            ret,
            params,
            kwds: Vec::new(),
        }
    }

    pub fn with_kwds<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            let name = name.as_ref();
            if !self.kwds.iter().any(|k| k == name) {
                self.kwds.push(name.to_string());
            }
        }
        self
    }

    pub fn nsrc(&self) -> usize {
        self.params.len()
    }

    /// Match concrete source types against the parameters.
    pub fn bind_src(&self, src: &[&Type], tp_vars: &mut TypeVars) -> Result<()> {
        if src.len() != self.params.len() {
            return Err(Error::ArgCountMismatch {
                expected: self.params.len(),
                got: src.len(),
            });
        }
        for (param, tp) in self.params.iter().zip(src) {
            if !param.matches(tp, tp_vars) {
                return Err(Error::type_mismatch(param, tp));
            }
        }
        Ok(())
    }

    /// Match a concrete destination type against the return type.
    pub fn bind_dst(&self, dst: &Type, tp_vars: &mut TypeVars) -> Result<()> {
        if self.ret.matches(dst, tp_vars) {
            Ok(())
        } else {
            Err(Error::type_mismatch(&self.ret, dst))
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        for (i, k) in self.kwds.iter().enumerate() {
            if i > 0 || !self.params.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "{}=?", k)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

/// One keyword argument value.
#[derive(Debug, Clone)]
pub enum Kwd {
    Bool(bool),
    Int(i64),
    Ints(Vec<i64>),
    Array(Array),
}

impl From<bool> for Kwd {
    fn from(v: bool) -> Self {
        Kwd::Bool(v)
    }
}

impl From<i64> for Kwd {
    fn from(v: i64) -> Self {
        Kwd::Int(v)
    }
}

impl From<Vec<i64>> for Kwd {
    fn from(v: Vec<i64>) -> Self {
        Kwd::Ints(v)
    }
}

impl From<Array> for Kwd {
    fn from(v: Array) -> Self {
        Kwd::Array(v)
    }
}

/// Keyword arguments passed alongside the positional arguments.
#[derive(Debug, Clone, Default)]
pub struct Kwds {
    values: BTreeMap<String, Kwd>,
}

impl Kwds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Kwd>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Kwd> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Kwd::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(invalid(name, "a bool", other)),
        }
    }

    /// An integer list. A single integer is accepted as a one-element list.
    pub fn get_ints(&self, name: &str) -> Result<Option<Vec<i64>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Kwd::Int(v)) => Ok(Some(vec![*v])),
            Some(Kwd::Ints(v)) => Ok(Some(v.clone())),
            Some(other) => Err(invalid(name, "an integer list", other)),
        }
    }

    pub fn get_array(&self, name: &str) -> Result<Option<&Array>> {
        match self.get(name) {
            None => Ok(None),
            Some(Kwd::Array(a)) => Ok(Some(a)),
            Some(other) => Err(invalid(name, "an array", other)),
        }
    }

    /// A copy without the named keywords.
    pub fn without(&self, names: &[&str]) -> Kwds {
        Kwds {
            values: self
                .values
                .iter()
                .filter(|(k, _)| !names.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

fn invalid(name: &str, expected: &str, got: &Kwd) -> Error {
    Error::InvalidKeyword {
        name: name.to_string(),
        reason: format!("expected {}, got {:?}", expected, got),
    }
}

/// A computation that knows how to build kernels for concrete argument
/// descriptors.
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;

    fn signature(&self) -> &Signature;

    /// The concrete destination type for the given sources.
    ///
    /// `tp_vars` holds the bindings from matching `src` against the
    /// signature's parameters.
    fn resolve_dst_type(&self, src: &[&Type], kwds: &Kwds, tp_vars: &TypeVars) -> Result<Type> {
        let _ = (src, kwds);
        self.signature().ret.substitute(tp_vars)
    }

    /// Append the kernel(s) realizing this operation to `ckb`.
    #[allow(clippy::too_many_arguments)]
    fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        kwds: &Kwds,
        tp_vars: &TypeVars,
    ) -> Result<()>;
}

/// A shareable handle to an operation.
#[derive(Clone)]
pub struct Callable(Arc<dyn Operation>);

impl Callable {
    pub fn new(op: impl Operation + 'static) -> Self {
        Callable(Arc::new(op))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn signature(&self) -> &Signature {
        self.0.signature()
    }

    /// Reject keywords the signature does not declare.
    pub fn check_kwds(&self, kwds: &Kwds) -> Result<()> {
        let sig = self.signature();
        for name in kwds.names() {
            if !sig.kwds.iter().any(|k| k == name) {
                return Err(Error::UnknownKeyword {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Bind the signature and compute the destination type.
    pub fn resolve_dst_type(&self, src: &[&Type], kwds: &Kwds) -> Result<Type> {
        let mut tp_vars = TypeVars::new();
        self.signature().bind_src(src, &mut tp_vars)?;
        self.0.resolve_dst_type(src, kwds, &tp_vars)
    }

    /// Bind the signature against concrete descriptors and append this
    /// operation's kernels. Used both at the root and by structural kernels
    /// instantiating their children.
    pub fn instantiate(
        &self,
        ckb: &mut KernelBuilder,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        kwds: &Kwds,
    ) -> Result<()> {
        let mut tp_vars = TypeVars::new();
        let src_tps: Vec<&Type> = src.iter().map(|s| s.tp).collect();
        let sig = self.signature();
        sig.bind_src(&src_tps, &mut tp_vars)?;
        sig.bind_dst(dst.tp, &mut tp_vars)?;
        self.0
            .instantiate(ckb, ectx, dst, src, request, kwds, &tp_vars)
    }

    /// Build a pipeline for concrete argument descriptors.
    pub fn compile(
        &self,
        ectx: &EvalContext,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
        request: KernelRequest,
        kwds: &Kwds,
    ) -> Result<Pipeline> {
        self.check_kwds(kwds)?;
        if dst.tp.is_symbolic() {
            bail!(
                "destination type {} is symbolic; resolve it before compiling",
                dst.tp
            );
        }
        check_meta(dst.tp, dst.meta)?;
        for s in src {
            check_meta(s.tp, s.meta)?;
        }

        let mut ckb = KernelBuilder::new();
        if let Err(err) = self.instantiate(&mut ckb, ectx, dst, src, request, kwds) {
            debug!(
                op = self.name(),
                nodes = ckb.len(),
                %err,
                "discarding partially built pipeline"
            );
            return Err(err);
        }
        debug!(op = self.name(), %request, nodes = ckb.len(), "compiled pipeline");
        Ok(Pipeline::new(self.name(), ckb, request, dst, src))
    }

    /// Resolve the destination, allocate it, build a pipeline and run it once.
    pub fn call(&self, ectx: &EvalContext, src: &[&Array], kwds: &Kwds) -> Result<Array> {
        self.check_kwds(kwds)?;
        let src_tps: Vec<&Type> = src.iter().map(|a| a.tp()).collect();
        let dst_tp = self.resolve_dst_type(&src_tps, kwds)?;
        let mut dst = ectx.allocator.allocate(&dst_tp)?;
        let descs: Vec<ArgDesc<'_>> = src.iter().map(|a| ArgDesc::of(a)).collect();
        let mut pipeline =
            self.compile(ectx, ArgDesc::of(&dst), &descs, KernelRequest::Call, kwds)?;
        pipeline.call(&mut dst, src)?;
        Ok(dst)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({}: {})", self.name(), self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::DType;

    #[test]
    fn test_bind_src_binds_and_checks() {
        let sig = Signature::new(
            Type::typevar("T"),
            vec![Type::typevar("T"), Type::typevar("T")],
        );
        let mut vars = TypeVars::new();
        let f64_tp = Type::scalar(DType::F64);
        sig.bind_src(&[&f64_tp, &f64_tp], &mut vars).unwrap();
        assert_eq!(vars.get("T"), Some(&f64_tp));

        let mut vars = TypeVars::new();
        let i32_tp = Type::scalar(DType::I32);
        let err = sig.bind_src(&[&f64_tp, &i32_tp], &mut vars).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_bind_src_counts_arguments() {
        let sig = Signature::new(Type::Void, vec![Type::typevar("T")]);
        let err = sig.bind_src(&[], &mut TypeVars::new()).unwrap_err();
        assert!(matches!(err, Error::ArgCountMismatch { expected: 1, got: 0 }));
    }

    #[test]
    fn test_signature_display() {
        let sig = Signature::new(
            Type::typevar("R"),
            vec![Type::fixed(3, Type::typevar("T"))],
        )
        .with_kwds(&["axes", "keepdims"]);
        assert_eq!(sig.to_string(), "(3 * T, axes=?, keepdims=?) -> R");
    }

    #[test]
    fn test_kwds_typed_getters() {
        let kwds = Kwds::new()
            .with("axes", 1i64)
            .with("keepdims", true)
            .with("identity", Array::scalar(0i32));
        assert_eq!(kwds.get_ints("axes").unwrap(), Some(vec![1]));
        assert_eq!(kwds.get_bool("keepdims").unwrap(), Some(true));
        assert!(kwds.get_array("identity").unwrap().is_some());
        assert!(kwds.get_bool("axes").is_err());
        assert_eq!(kwds.get_bool("missing").unwrap(), None);

        let rest = kwds.without(&["axes", "identity"]);
        assert_eq!(rest.names().collect::<Vec<_>>(), vec!["keepdims"]);
    }

    #[test]
    fn test_peel() {
        let a = Array::from_slice(&[1i32, 2, 3, 4, 5, 6], &[2, 3]).unwrap();
        let desc = ArgDesc::of(&a);
        let inner = desc.peel().unwrap();
        assert_eq!(inner.tp, &Type::from_dims(&[3], DType::I32));
        assert_eq!(inner.meta.len(), 1);
        let scalar = inner.peel().unwrap();
        assert!(scalar.peel().is_err());
    }
}
