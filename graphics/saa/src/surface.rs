//! Acceleration-library seam
//!
//! The engine defers all rendering and surface-to-surface work to an external
//! acceleration library reached through these traits. Surfaces are opaque:
//! the engine only ever asks for a stable (handle, stride) pair to hand to
//! the kernel device, or routes DMA and blits through the library itself.

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::region::Rect;
use crate::Result;

bitflags! {
    /// Surface creation / redefinition flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceFlags: u32 {
        /// Surface can be a render target
        const RENDER_TARGET = 1 << 0;
        /// Surface may be bound to a scanout framebuffer
        const SCANOUT = 1 << 1;
        /// Surface is shareable across contexts
        const SHARED = 1 << 2;
    }
}

/// A GPU surface owned by the acceleration library
pub trait Surface: Send + Sync {
    /// Get the device-visible (handle, stride) pair for this surface
    fn handle(&self) -> Result<(u32, u32)>;

    /// Redefine the surface dimensions in place, preserving the contents of
    /// the overlapping rectangle
    fn redefine(&self, width: u32, height: u32, depth: u32, add: SurfaceFlags) -> Result<()>;
}

/// Acceleration library entry points used by the engine
pub trait Accel: Send + Sync {
    /// Interface version as (major, minor); a major mismatch disables
    /// acceleration
    fn version(&self) -> (u32, u32);

    /// Create a surface
    fn surface_create(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        flags: SurfaceFlags,
    ) -> Result<Arc<dyn Surface>>;

    /// Synchronous DMA between mapped memory and a surface over a rectangle
    /// list. `data` points at the start of the pixmap's pixel block and
    /// `pitch` is its stride in bytes.
    ///
    /// # Safety contract
    ///
    /// `data` must stay valid and unaliased for the duration of the call and
    /// cover `pitch * height` bytes for every rectangle passed.
    fn surface_dma(
        &self,
        surface: &dyn Surface,
        data: *mut u8,
        pitch: u32,
        to_surface: bool,
        rects: &[Rect],
    ) -> Result<()>;

    /// Prepare a surface-to-surface copy; paired with `copy`/`copy_done`
    fn copy_prepare(&self, dst: &dyn Surface, src: &dyn Surface) -> Result<()>;

    /// Queue one rectangle of the prepared copy
    fn copy(&self, dst_x: i32, dst_y: i32, src_x: i32, src_y: i32, width: u32, height: u32);

    /// Finish the prepared copy and submit it
    fn copy_done(&self) -> Result<()>;
}
