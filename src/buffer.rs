//! Aligned, reusable storage for packed panels.
//!
//! Packing buffers are large (up to `mc*kc` and `kc*nc` doubles) and needed
//! on every GEMM call, so an [`Engine`](crate::Engine) keeps a small pool of
//! them. Allocation is fallible: failure surfaces as
//! [`GemmError::AllocationFailure`](crate::GemmError::AllocationFailure)
//! instead of aborting the process.

use crate::error::{allocation_failure, Result};
use log::trace;
use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;
use std::sync::Mutex;

/// Byte alignment of packed panels: one cache line, which also satisfies
/// every vector width the kernels use.
pub const PANEL_ALIGNMENT: usize = 64;

/// Buffers kept for reuse once released.
const MAX_POOLED: usize = 4;

/// A zero-initialized, `PANEL_ALIGNMENT`-aligned heap block of `f64`s.
pub struct AlignedBuffer {
    ptr: NonNull<f64>,
    len: usize,
    /// Layout used for allocation; `None` for the empty buffer, which owns no
    /// memory.
    layout: Option<Layout>,
    _marker: PhantomData<f64>,
}

// SAFETY: the buffer uniquely owns its allocation, like a `Vec<f64>`.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `len` zeroed doubles.
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(AlignedBuffer {
                ptr: NonNull::dangling(),
                len: 0,
                layout: None,
                _marker: PhantomData,
            });
        }

        let size = len.checked_mul(std::mem::size_of::<f64>()).ok_or_else(|| {
            allocation_failure(usize::MAX, PANEL_ALIGNMENT, format!("{len} doubles overflow usize"))
        })?;
        let layout = Layout::from_size_align(size, PANEL_ALIGNMENT)
            .map_err(|e| allocation_failure(size, PANEL_ALIGNMENT, e.to_string()))?;

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<f64>()).ok_or_else(|| {
            allocation_failure(size, PANEL_ALIGNMENT, "allocator returned null")
        })?;

        Ok(AlignedBuffer {
            ptr,
            len,
            layout: Some(layout),
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[f64] {
        // SAFETY: `ptr` is valid for `len` initialized doubles (or dangling
        // with `len == 0`).
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: allocated in `zeroed` with exactly this layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), layout) }
        }
    }
}

/// A pool of packing buffers shared by the calls of one engine.
#[derive(Default)]
pub struct PanelPool {
    free: Mutex<Vec<AlignedBuffer>>,
}

impl PanelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a zeroed buffer of at least `len` doubles.
    ///
    /// Reuses the smallest pooled buffer that is large enough, otherwise
    /// allocates a new one.
    pub fn acquire(&self, len: usize) -> Result<PooledBuffer<'_>> {
        let reused = {
            let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
            let best = free
                .iter()
                .enumerate()
                .filter(|(_, b)| b.len() >= len)
                .min_by_key(|(_, b)| b.len())
                .map(|(i, _)| i);
            best.map(|i| free.swap_remove(i))
        };

        let buffer = match reused {
            Some(buffer) => buffer,
            None => {
                trace!("allocating packing buffer of {len} doubles");
                AlignedBuffer::zeroed(len)?
            }
        };
        Ok(PooledBuffer {
            pool: self,
            buffer: Some(buffer),
            len,
        })
    }

    /// Buffers currently waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn release(&self, mut buffer: AlignedBuffer) {
        buffer.as_mut_slice().fill(0.0);
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        if free.len() < MAX_POOLED {
            free.push(buffer);
        }
    }
}

/// A buffer on loan from a [`PanelPool`]; returned zeroed when dropped.
///
/// Dereferences to exactly the requested number of doubles.
pub struct PooledBuffer<'a> {
    pool: &'a PanelPool,
    buffer: Option<AlignedBuffer>,
    len: usize,
}

impl Deref for PooledBuffer<'_> {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        match &self.buffer {
            Some(buffer) => &buffer.as_slice()[..self.len],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [f64] {
        match &mut self.buffer {
            Some(buffer) => &mut buffer.as_mut_slice()[..self.len],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}
