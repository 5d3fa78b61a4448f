use vole_core::{Array, Error, KernelRequest, Layout, Result, Type};

use crate::builder::KernelBuilder;
use crate::callable::ArgDesc;

/// A compiled kernel tree together with the argument descriptors it was
/// built for.
///
/// Execution never consults types again: the raw entry points trust their
/// caller, while [`Pipeline::call`] checks arrays against the recorded types
/// and layouts before handing out addresses.
pub struct Pipeline {
    name: &'static str,
    ckb: KernelBuilder,
    request: KernelRequest,
    dst_tp: Type,
    dst_layout: Layout,
    src_tps: Vec<Type>,
    src_layouts: Vec<Layout>,
}

impl Pipeline {
    pub(crate) fn new(
        name: &'static str,
        ckb: KernelBuilder,
        request: KernelRequest,
        dst: ArgDesc<'_>,
        src: &[ArgDesc<'_>],
    ) -> Self {
        Self {
            name,
            ckb,
            request,
            dst_tp: dst.tp.clone(),
            dst_layout: Layout::new(dst.meta.to_vec()),
            src_tps: src.iter().map(|s| s.tp.clone()).collect(),
            src_layouts: src.iter().map(|s| Layout::new(s.meta.to_vec())).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn request(&self) -> KernelRequest {
        self.request
    }

    pub fn dst_type(&self) -> &Type {
        &self.dst_tp
    }

    pub fn src_types(&self) -> &[Type] {
        &self.src_tps
    }

    /// Kernel names in arena order, root first.
    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.ckb.kernel_names()
    }

    pub fn builder(&self) -> &KernelBuilder {
        &self.ckb
    }

    fn check_arity(&self, nsrc: usize) -> Result<()> {
        if nsrc != self.src_tps.len() {
            return Err(Error::ArgCountMismatch {
                expected: self.src_tps.len(),
                got: nsrc,
            });
        }
        Ok(())
    }

    fn unsupported(&self, request: KernelRequest) -> Error {
        Error::UnsupportedRequest {
            kernel: self.ckb.at(0).map(|s| s.name()).unwrap_or(self.name),
            request,
        }
    }

    /// Apply to one set of element addresses.
    ///
    /// # Safety
    /// `dst` and each `src[i]` must address values of the pipeline's
    /// destination and source types, laid out as the pipeline's layouts.
    pub unsafe fn single(&mut self, dst: *mut u8, src: &[*const u8]) -> Result<()> {
        self.check_arity(src.len())?;
        if self.request.is_strided() {
            return Err(self.unsupported(KernelRequest::Single));
        }
        let unsupported = self.unsupported(KernelRequest::Single);
        let (root, children) = self.ckb.root().ok_or(unsupported)?;
        root.single(children, dst, src);
        Ok(())
    }

    /// Apply to a strided run of `count` elements.
    ///
    /// # Safety
    /// As for [`Pipeline::single`], for every element `i < count` at
    /// `dst + i * dst_stride` and `src[j] + i * src_stride[j]`.
    pub unsafe fn strided(
        &mut self,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) -> Result<()> {
        self.check_arity(src.len())?;
        self.check_arity(src_stride.len())?;
        if !self.request.is_strided() {
            return Err(self.unsupported(KernelRequest::Strided));
        }
        let unsupported = self.unsupported(KernelRequest::Strided);
        let (root, children) = self.ckb.root().ok_or(unsupported)?;
        root.strided(children, dst, dst_stride, src, src_stride, count);
        Ok(())
    }

    /// Run once over whole arrays after checking them against the
    /// descriptors the pipeline was compiled for.
    pub fn call(&mut self, dst: &mut Array, src: &[&Array]) -> Result<()> {
        self.check_arity(src.len())?;
        if dst.tp() != &self.dst_tp {
            return Err(Error::type_mismatch(&self.dst_tp, dst.tp()));
        }
        if dst.layout() != &self.dst_layout {
            return Err(Error::LayoutMismatch {
                arg: "dst".to_string(),
            });
        }
        for (i, a) in src.iter().enumerate() {
            if a.tp() != &self.src_tps[i] {
                return Err(Error::type_mismatch(&self.src_tps[i], a.tp()));
            }
            if a.layout() != &self.src_layouts[i] {
                return Err(Error::LayoutMismatch {
                    arg: format!("src{}", i),
                });
            }
        }

        let ptrs: Vec<*const u8> = src.iter().map(|a| a.data_ptr()).collect();
        let dst_ptr = dst.data_mut_ptr();
        // Types and layouts were checked above.
        unsafe {
            if self.request.is_strided() {
                let strides = vec![0isize; ptrs.len()];
                self.strided(dst_ptr, 0, &ptrs, &strides, 1)
            } else {
                self.single(dst_ptr, &ptrs)
            }
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("request", &self.request)
            .field("dst", &self.dst_tp.to_string())
            .field("kernels", &self.kernel_names())
            .finish()
    }
}
