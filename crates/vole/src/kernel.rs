use std::any::Any;

use vole_core::KernelRequest;

use crate::functional::reduction::{Phase, ReductionStep};

// Kernel — The dispatch header every arena node carries
//
// A compiled pipeline is a flat arena of kernel nodes. Each node is a
// `KernelSlot`: the request kind it was built for plus a boxed `Kernel`
// whose vtable provides the entry points:
//
//   single   — apply to one element:      dst, src[]
//   strided  — apply to a run of `count`: dst + i*dst_stride, src[j] + i*src_stride[j]
//   drop     — ordinary Rust Drop, run in reverse arena order
//
// CHILDREN ARE POSITIONAL:
//
// A node never holds pointers to its children. Children are the nodes that
// follow it in the arena, addressed by an offset relative to the parent:
//
//   arena:  [ compose | first ... | second ... ]
//              p        p+1         p+second_offset
//
// When a node runs, it receives a `Children` view over the arena slots after
// itself, and reaches child `r` with `children.single(r, ...)`. The first
// child always sits at offset 1; any further child offsets are recorded in
// the node during construction. Because the arena is index-stable, offsets
// recorded before later emplacements stay valid.

/// A kernel node: the executable part of one arena slot.
///
/// Implementations must make `strided` observationally identical to `count`
/// calls of `single` at stride-advanced addresses; the default `strided`
/// is exactly that loop.
pub trait Kernel: Any + Send {
    /// Short name used in logs, errors and `Pipeline::kernel_names`.
    fn name(&self) -> &'static str;

    /// Whether this kernel variant can serve `request`.
    fn supports(&self, request: KernelRequest) -> bool {
        let _ = request;
        true
    }

    /// Apply to a single element.
    ///
    /// # Safety
    /// `dst` and every `src` pointer must address live values laid out as
    /// the types and layouts this kernel was instantiated with.
    unsafe fn single(&mut self, children: Children<'_>, dst: *mut u8, src: &[*const u8]);

    /// Apply to a strided run of `count` elements.
    ///
    /// # Safety
    /// As for [`Kernel::single`], for every element of the run.
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
        for _ in 0..count {
            self.single(children.reborrow(), dst, &cur);
            dst = dst.wrapping_offset(dst_stride);
            for (p, s) in cur.iter_mut().zip(src_stride) {
                *p = p.wrapping_offset(*s);
            }
        }
    }

    /// The reduction state machine of this node, if it belongs to the
    /// reduction family.
    fn as_reduction(&mut self) -> Option<&mut dyn ReductionStep> {
        None
    }
}

/// One arena node: request kind plus the kernel serving it.
pub struct KernelSlot {
    request: KernelRequest,
    kernel: Box<dyn Kernel>,
}

impl KernelSlot {
    pub(crate) fn new(request: KernelRequest, kernel: Box<dyn Kernel>) -> Self {
        Self { request, kernel }
    }

    pub fn request(&self) -> KernelRequest {
        self.request
    }

    pub fn name(&self) -> &'static str {
        self.kernel.name()
    }

    pub fn is_reduction(&mut self) -> bool {
        self.kernel.as_reduction().is_some()
    }

    pub(crate) fn kernel_mut(&mut self) -> &mut dyn Kernel {
        self.kernel.as_mut()
    }

    /// # Safety
    /// See [`Kernel::single`].
    pub unsafe fn single(&mut self, children: Children<'_>, dst: *mut u8, src: &[*const u8]) {
        self.kernel.single(children, dst, src)
    }

    /// # Safety
    /// See [`Kernel::strided`].
    pub unsafe fn strided(
        &mut self,
        children: Children<'_>,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) {
        debug_assert!(
            self.request.is_strided(),
            "strided call on '{}' built for {}",
            self.kernel.name(),
            self.request
        );
        self.kernel
            .strided(children, dst, dst_stride, src, src_stride, count)
    }

    /// # Safety
    /// See [`ReductionStep::reduce`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn reduce(
        &mut self,
        children: Children<'_>,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        let name = self.kernel.name();
        match self.kernel.as_reduction() {
            Some(step) => step.reduce(children, phase, dst, dst_stride, src, src_stride, count),
            // Reduction parents verify their child at construction time.
            None => unreachable!("reduction call on non-reduction kernel '{}'", name),
        }
    }
}

/// The arena slots following a node, addressed by relative offset.
pub struct Children<'a> {
    slots: &'a mut [KernelSlot],
}

impl<'a> Children<'a> {
    pub(crate) fn new(slots: &'a mut [KernelSlot]) -> Self {
        Self { slots }
    }

    /// A shorter-lived view over the same slots, for repeated child calls.
    pub fn reborrow(&mut self) -> Children<'_> {
        Children {
            slots: &mut *self.slots,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Resolve the child at `offset` (>= 1) and the view over its own children.
    fn split(&mut self, offset: usize) -> (&mut KernelSlot, Children<'_>) {
        let (head, tail) = self.slots.split_at_mut(offset);
        (&mut head[offset - 1], Children { slots: tail })
    }

    /// # Safety
    /// See [`Kernel::single`].
    pub unsafe fn single(&mut self, offset: usize, dst: *mut u8, src: &[*const u8]) {
        let (child, rest) = self.split(offset);
        child.single(rest, dst, src)
    }

    /// # Safety
    /// See [`Kernel::strided`].
    pub unsafe fn strided(
        &mut self,
        offset: usize,
        dst: *mut u8,
        dst_stride: isize,
        src: &[*const u8],
        src_stride: &[isize],
        count: usize,
    ) {
        let (child, rest) = self.split(offset);
        child.strided(rest, dst, dst_stride, src, src_stride, count)
    }

    /// # Safety
    /// See [`ReductionStep::reduce`].
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn reduce(
        &mut self,
        offset: usize,
        phase: Phase,
        dst: *mut u8,
        dst_stride: isize,
        src: *const u8,
        src_stride: isize,
        count: usize,
    ) {
        let (child, rest) = self.split(offset);
        child.reduce(rest, phase, dst, dst_stride, src, src_stride, count)
    }
}
