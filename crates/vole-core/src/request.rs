use std::fmt;

use crate::error::Error;

/// Which entry point a kernel is being constructed to serve.
///
/// - `Call` — the array-level form, invoked once with whole arrays.
/// - `Single` — one element per call, given destination and source addresses.
/// - `Strided` — a run of `count` elements at fixed byte strides.
///
/// A compiled pipeline answers only the entry point it was built for: a
/// `Strided` pipeline refuses single calls, and `Call` and `Single`
/// pipelines refuse strided ones. Where both forms exist, strided
/// application is observationally identical to `count` single calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelRequest {
    Call,
    Single,
    Strided,
}

impl KernelRequest {
    /// The request kind to pass down to child kernels.
    ///
    /// Children are always driven through data pointers, so the array-level
    /// `Call` form becomes `Single`.
    pub fn data_only(self) -> KernelRequest {
        match self {
            KernelRequest::Call => KernelRequest::Single,
            other => other,
        }
    }

    pub fn is_strided(self) -> bool {
        self == KernelRequest::Strided
    }
}

impl TryFrom<u32> for KernelRequest {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            0 => Ok(KernelRequest::Call),
            1 => Ok(KernelRequest::Single),
            2 => Ok(KernelRequest::Strided),
            value => Err(Error::UnrecognizedRequest { value }),
        }
    }
}

impl fmt::Display for KernelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KernelRequest::Call => "call",
            KernelRequest::Single => "single",
            KernelRequest::Strided => "strided",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_only() {
        assert_eq!(KernelRequest::Call.data_only(), KernelRequest::Single);
        assert_eq!(KernelRequest::Single.data_only(), KernelRequest::Single);
        assert_eq!(KernelRequest::Strided.data_only(), KernelRequest::Strided);
    }

    #[test]
    fn test_unrecognized_request_reports_value() {
        assert_eq!(KernelRequest::try_from(2).unwrap(), KernelRequest::Strided);
        let err = KernelRequest::try_from(7).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedRequest { value: 7 }));
        assert!(err.to_string().contains('7'));
    }
}
