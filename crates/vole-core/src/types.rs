use std::collections::BTreeMap;
use std::fmt;

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::layout::VarDimData;

// Type — The element/dimension structure of one array argument
//
// A type is a chain of dimensions ending in a scalar:
//
//   3 * var * float64
//   │   │     └── Scalar(F64)
//   │   └── Var: each element is a (pointer, length) pair to a ragged run
//   └── Fixed: exactly 3 elements at a byte stride recorded in the layout
//
// Types say WHAT is stored; layouts (arrmeta) say WHERE. The engine consumes
// types only through the small oracle below: dimension peeling, matching a
// candidate against a pattern while binding type variables, and substitution
// of bound variables into a symbolic type.

/// Kind of a dimension, used to key the reduction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimKind {
    Fixed,
    Var,
}

impl fmt::Display for DimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimKind::Fixed => write!(f, "fixed"),
            DimKind::Var => write!(f, "var"),
        }
    }
}

/// Bindings of type variables produced by matching.
pub type TypeVars = BTreeMap<String, Type>;

/// Type descriptor for one array argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (destination of kernels that write through their sources).
    Void,
    Scalar(DType),
    Fixed { size: usize, element: Box<Type> },
    Var(Box<Type>),
    /// Symbolic placeholder resolved by matching.
    TypeVar(String),
}

impl Type {
    pub fn scalar(dtype: DType) -> Self {
        Type::Scalar(dtype)
    }

    /// The scalar type for a Rust element type.
    pub fn of<T: WithDType>() -> Self {
        Type::Scalar(T::DTYPE)
    }

    pub fn fixed(size: usize, element: Type) -> Self {
        Type::Fixed {
            size,
            element: Box::new(element),
        }
    }

    pub fn var(element: Type) -> Self {
        Type::Var(Box::new(element))
    }

    pub fn typevar(name: impl Into<String>) -> Self {
        Type::TypeVar(name.into())
    }

    /// Nested fixed dimensions around a scalar, outermost first.
    ///
    /// `from_dims(&[2, 3], F32)` is `2 * 3 * float32`.
    pub fn from_dims(dims: &[usize], dtype: DType) -> Self {
        dims.iter()
            .rev()
            .fold(Type::Scalar(dtype), |acc, &size| Type::fixed(size, acc))
    }

    /// Number of array dimensions before the element.
    pub fn ndim(&self) -> usize {
        match self {
            Type::Fixed { element, .. } | Type::Var(element) => 1 + element.ndim(),
            _ => 0,
        }
    }

    pub fn dim_kind(&self) -> Option<DimKind> {
        match self {
            Type::Fixed { .. } => Some(DimKind::Fixed),
            Type::Var(_) => Some(DimKind::Var),
            _ => None,
        }
    }

    /// The element type of a dimension type.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Fixed { element, .. } | Type::Var(element) => Some(element),
            _ => None,
        }
    }

    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Type::Fixed { size, .. } => Some(*size),
            _ => None,
        }
    }

    /// Innermost scalar dtype, if the type bottoms out in one.
    pub fn dtype(&self) -> Option<DType> {
        match self {
            Type::Scalar(dt) => Some(*dt),
            Type::Fixed { element, .. } | Type::Var(element) => element.dtype(),
            _ => None,
        }
    }

    /// Peel `n` leading dimensions.
    pub fn type_at_dimension(&self, n: usize) -> Result<&Type> {
        let mut tp = self;
        for _ in 0..n {
            tp = tp.element().ok_or_else(|| {
                Error::msg(format!(
                    "type {} has fewer than {} dimensions",
                    self, n
                ))
            })?;
        }
        Ok(tp)
    }

    /// The same leading dimension around a different element type.
    pub fn with_element(&self, element: Type) -> Result<Type> {
        match self {
            Type::Fixed { size, .. } => Ok(Type::fixed(*size, element)),
            Type::Var(_) => Ok(Type::var(element)),
            other => Err(Error::msg(format!(
                "type {} is not a dimension type",
                other
            ))),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        match self {
            Type::TypeVar(_) => true,
            Type::Fixed { element, .. } | Type::Var(element) => element.is_symbolic(),
            _ => false,
        }
    }

    /// Bytes occupied by one value of this type in default (C-order) layout.
    pub fn data_size(&self) -> Result<usize> {
        match self {
            Type::Void => Ok(0),
            Type::Scalar(dt) => Ok(dt.size_in_bytes()),
            Type::Fixed { size, element } => Ok(size * element.data_size()?),
            Type::Var(_) => Ok(std::mem::size_of::<VarDimData>()),
            Type::TypeVar(name) => Err(Error::UnboundTypeVar { name: name.clone() }),
        }
    }

    /// Match `candidate` against this pattern, binding type variables.
    ///
    /// Bindings are only committed to `vars` when the whole match succeeds.
    /// A variable that is already bound matches only an identical type.
    pub fn matches(&self, candidate: &Type, vars: &mut TypeVars) -> bool {
        let mut scratch = vars.clone();
        if self.match_into(candidate, &mut scratch) {
            *vars = scratch;
            true
        } else {
            false
        }
    }

    fn match_into(&self, candidate: &Type, vars: &mut TypeVars) -> bool {
        match (self, candidate) {
            (Type::TypeVar(name), _) => match vars.get(name) {
                Some(bound) => bound == candidate,
                None => {
                    vars.insert(name.clone(), candidate.clone());
                    true
                }
            },
            (
                Type::Fixed { size, element },
                Type::Fixed {
                    size: csize,
                    element: celement,
                },
            ) => size == csize && element.match_into(celement, vars),
            (Type::Var(element), Type::Var(celement)) => element.match_into(celement, vars),
            (pattern, candidate) => pattern == candidate,
        }
    }

    /// Replace bound type variables, failing on any unbound one.
    pub fn substitute(&self, vars: &TypeVars) -> Result<Type> {
        match self {
            Type::TypeVar(name) => vars
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnboundTypeVar { name: name.clone() }),
            Type::Fixed { size, element } => Ok(Type::fixed(*size, element.substitute(vars)?)),
            Type::Var(element) => Ok(Type::var(element.substitute(vars)?)),
            other => Ok(other.clone()),
        }
    }
}

impl From<DType> for Type {
    fn from(dtype: DType) -> Self {
        Type::Scalar(dtype)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(dt) => write!(f, "{}", dt),
            Type::Fixed { size, element } => write!(f, "{} * {}", size, element),
            Type::Var(element) => write!(f, "var * {}", element),
            Type::TypeVar(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let tp = Type::fixed(3, Type::var(Type::scalar(DType::F64)));
        assert_eq!(tp.to_string(), "3 * var * float64");
        assert_eq!(Type::from_dims(&[2, 3], DType::I32).to_string(), "2 * 3 * int32");
    }

    #[test]
    fn test_ndim_and_peeling() {
        let tp = Type::from_dims(&[2, 3, 4], DType::F32);
        assert_eq!(tp.ndim(), 3);
        assert_eq!(tp.type_at_dimension(2).unwrap(), &Type::fixed(4, DType::F32.into()));
        assert_eq!(tp.type_at_dimension(3).unwrap(), &Type::scalar(DType::F32));
        assert!(tp.type_at_dimension(4).is_err());
        assert_eq!(tp.dtype(), Some(DType::F32));
    }

    #[test]
    fn test_data_size() {
        assert_eq!(Type::from_dims(&[2, 3], DType::F64).data_size().unwrap(), 48);
        assert_eq!(
            Type::var(Type::scalar(DType::U8)).data_size().unwrap(),
            std::mem::size_of::<VarDimData>()
        );
        assert!(Type::typevar("T").data_size().is_err());
    }

    #[test]
    fn test_match_binds_type_vars() {
        let pattern = Type::fixed(3, Type::typevar("T"));
        let mut vars = TypeVars::new();
        assert!(pattern.matches(&Type::from_dims(&[3], DType::I64), &mut vars));
        assert_eq!(vars.get("T"), Some(&Type::scalar(DType::I64)));

        // A bound variable only matches the same type again.
        assert!(!Type::typevar("T").matches(&Type::scalar(DType::F32), &mut vars));
        assert!(Type::typevar("T").matches(&Type::scalar(DType::I64), &mut vars));
    }

    #[test]
    fn test_failed_match_does_not_bind() {
        let pattern = Type::fixed(2, Type::typevar("T"));
        let mut vars = TypeVars::new();
        assert!(!pattern.matches(&Type::from_dims(&[3], DType::F64), &mut vars));
        assert!(vars.is_empty());
    }

    #[test]
    fn test_substitute() {
        let mut vars = TypeVars::new();
        vars.insert("T".into(), Type::scalar(DType::F32));
        let tp = Type::var(Type::typevar("T"));
        assert_eq!(tp.substitute(&vars).unwrap(), Type::var(DType::F32.into()));

        let err = Type::typevar("U").substitute(&vars).unwrap_err();
        assert!(matches!(err, Error::UnboundTypeVar { ref name } if name == "U"));
    }

    #[test]
    fn test_with_element() {
        let tp = Type::fixed(4, DType::F32.into());
        assert_eq!(
            tp.with_element(Type::scalar(DType::I32)).unwrap(),
            Type::fixed(4, DType::I32.into())
        );
        assert!(Type::scalar(DType::F32).with_element(Type::Void).is_err());
    }
}
