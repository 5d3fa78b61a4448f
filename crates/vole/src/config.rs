use std::fmt;
use std::sync::Arc;

use vole_core::{BufferAllocator, HeapAllocator};

/// Chunk length Compose uses for its intermediate buffer when none is configured.
pub const DEFAULT_BUFFER_CHUNK_SIZE: usize = 128;

/// How assignment kernels treat dtype conversions that may lose information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignErrorMode {
    /// Convert everything; out-of-range values saturate.
    #[default]
    NoCheck,
    /// Refuse to build an assignment whose source dtype is not exactly
    /// representable in the destination dtype.
    Inexact,
}

/// Evaluation context threaded through every instantiation.
///
/// Nothing in the engine reads a global default; callers pass this down
/// explicitly and structural kernels forward it to their children.
#[derive(Clone)]
pub struct EvalContext {
    /// Elements per chunk in Compose's strided path.
    pub buffer_chunk_size: usize,
    pub errmode: AssignErrorMode,
    /// Allocation capability for scratch buffers and materialized values.
    pub allocator: Arc<dyn BufferAllocator>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self {
            buffer_chunk_size: DEFAULT_BUFFER_CHUNK_SIZE,
            errmode: AssignErrorMode::NoCheck,
            allocator: Arc::new(HeapAllocator),
        }
    }
}

impl EvalContext {
    /// Set the Compose chunk length. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.buffer_chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_errmode(mut self, errmode: AssignErrorMode) -> Self {
        self.errmode = errmode;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn BufferAllocator>) -> Self {
        self.allocator = allocator;
        self
    }
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("buffer_chunk_size", &self.buffer_chunk_size)
            .field("errmode", &self.errmode)
            .field("allocator", &self.allocator)
            .finish()
    }
}
