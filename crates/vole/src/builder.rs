//! Kernel arena — an append-only, index-stable sequence of kernel nodes.
//!
//! Instantiation lays a pipeline out as a flat sequence: a parent is
//! emplaced first, then each child subtree after it. Offsets returned by
//! [`KernelBuilder::emplace`] are slot indices, so they never move when the
//! arena grows; a component may record an offset, emplace more nodes, and
//! come back to patch the node at that offset with [`KernelBuilder::at_mut`].
//!
//! Nodes are dropped in reverse arena order, so every child is destroyed
//! before its parent, both when a finished pipeline is discarded and when
//! construction fails half-way.

use std::any::Any;

use tracing::{debug, trace};
use vole_core::{bail, Error, KernelRequest, Result};

use crate::kernel::{Children, Kernel, KernelSlot};

/// The arena a pipeline is built into.
#[derive(Default)]
pub struct KernelBuilder {
    slots: Vec<KernelSlot>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Append a kernel node built for `request` and return its offset.
    ///
    /// Fails without appending if the kernel cannot serve `request`.
    pub fn emplace<K: Kernel>(&mut self, request: KernelRequest, kernel: K) -> Result<usize> {
        if !kernel.supports(request) {
            return Err(Error::UnsupportedRequest {
                kernel: kernel.name(),
                request,
            });
        }
        let offset = self.slots.len();
        trace!(offset, kernel = kernel.name(), %request, "emplace kernel");
        self.slots.push(KernelSlot::new(request, Box::new(kernel)));
        Ok(offset)
    }

    /// The append position: where the next emplaced node will land.
    pub fn current_size(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn at(&self, offset: usize) -> Option<&KernelSlot> {
        self.slots.get(offset)
    }

    /// The node at `offset`, downcast to its concrete kernel type.
    pub fn at_mut<K: Kernel>(&mut self, offset: usize) -> Result<&mut K> {
        let slot = self.slots.get_mut(offset).ok_or_else(|| {
            Error::msg(format!("no kernel at arena offset {}", offset))
        })?;
        let found = slot.name();
        let any: &mut dyn Any = slot.kernel_mut();
        any.downcast_mut::<K>()
            .ok_or(Error::KernelDowncast { offset, found })
    }

    /// Check that the node at `offset` belongs to the reduction family.
    pub fn ensure_reduction(&mut self, offset: usize) -> Result<()> {
        let Some(slot) = self.slots.get_mut(offset) else {
            bail!("no kernel at arena offset {}", offset);
        };
        if !slot.is_reduction() {
            bail!(
                "kernel '{}' at offset {} is not a reduction kernel",
                slot.name(),
                offset
            );
        }
        Ok(())
    }

    /// Names of the nodes in arena order.
    pub fn kernel_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.name()).collect()
    }

    /// Drop every node at or after `offset`, last first.
    pub fn truncate(&mut self, offset: usize) {
        while self.slots.len() > offset {
            self.slots.pop();
        }
    }

    /// The root node and the view over all nodes after it.
    pub(crate) fn root(&mut self) -> Option<(&mut KernelSlot, Children<'_>)> {
        let (head, tail) = self.slots.split_first_mut()?;
        Some((head, Children::new(tail)))
    }
}

impl Drop for KernelBuilder {
    fn drop(&mut self) {
        if !self.slots.is_empty() && !std::thread::panicking() {
            debug!(nodes = self.slots.len(), "releasing kernel arena");
        }
        // Vec drops front to back; children must go before their parents.
        self.truncate(0);
    }
}
