//! Kernel-device seam
//!
//! The engine's only view of the kernel driver: DMA-capable buffer objects,
//! framebuffer objects for scanout, present/readback commands and fences.
//! All calls are synchronous; the device completes or fails each one before
//! returning.

use alloc::sync::Arc;

use crate::region::{Rect, Region};
use crate::Result;

/// A DMA-capable buffer object allocated from the kernel
pub trait DmaBuf: Send + Sync {
    /// Kernel handle for this buffer
    fn handle(&self) -> u32;

    /// Size in bytes
    fn size(&self) -> usize;

    /// Map the buffer for CPU access
    fn map(&self) -> Result<*mut u8>;

    /// Unmap a previous `map`
    fn unmap(&self);
}

/// Parameters for a scanout framebuffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bpp: u32,
    pub pitch: u32,
}

/// Kernel device entry points used by the engine
pub trait Device: Send + Sync {
    /// Allocate a DMA-capable buffer of `size` bytes
    fn dmabuf_alloc(&self, size: usize) -> Result<Arc<dyn DmaBuf>>;

    /// Register a framebuffer object backed by `buffer_handle`; returns the
    /// framebuffer handle
    fn framebuffer_add(&self, info: &FramebufferInfo, buffer_handle: u32) -> Result<u32>;

    /// Remove a framebuffer object
    fn framebuffer_remove(&self, fb: u32) -> Result<()>;

    /// Notify the device that `rects` of a framebuffer changed
    fn framebuffer_dirty(&self, fb: u32, rects: &[Rect]) -> Result<()>;

    /// Present `region` (surface coordinates) from a surface to the screen,
    /// translated by (`dst_x`, `dst_y`)
    fn present(&self, dst_x: i32, dst_y: i32, region: &Region, surface_handle: u32) -> Result<()>;

    /// Read presented screen content in `region` back into the bound
    /// scanout buffers; must not cross a CRTC boundary
    fn present_readback(&self, region: &Region) -> Result<()>;

    /// Direct descriptor DMA between a buffer object and a surface
    fn dma(
        &self,
        region: &Region,
        buf: &dyn DmaBuf,
        pitch: u32,
        surface_handle: u32,
        to_surface: bool,
    ) -> Result<()>;

    /// Insert a fence after the commands submitted so far; returns its
    /// sequence number
    fn fence_insert(&self) -> Result<u64>;

    /// Wait for a fence with a bounded timeout
    fn fence_wait(&self, seq: u64, timeout_ns: u64) -> Result<()>;
}
