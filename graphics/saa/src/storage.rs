//! Storage-backing management
//!
//! A pixmap's pixel data can live in plain host memory, a DMA-mappable
//! buffer object, or a GPU surface. Backings materialize lazily; creating a
//! new authoritative backing migrates content across and releases whatever
//! the backing flags no longer claim.

use alloc::sync::Arc;
use alloc::vec;

use crate::pixmap::{BackingFlags, Pixmap};
use crate::surface::SurfaceFlags;
use crate::{Error, Result, Saa};

/// Row-wise copy of the overlapping top-left rectangle between two pixel
/// blocks of possibly different pitch and height
pub(crate) fn copy_stride(
    dst: &mut [u8],
    src: &[u8],
    dst_pitch: u32,
    src_pitch: u32,
    dst_height: u32,
    src_height: u32,
) {
    let height = dst_height.min(src_height) as usize;
    let pitch = dst_pitch.min(src_pitch) as usize;

    for row in 0..height {
        let doff = row * dst_pitch as usize;
        let soff = row * src_pitch as usize;
        dst[doff..doff + pitch].copy_from_slice(&src[soff..soff + pitch]);
    }
}

impl Saa {
    /// Materialize a system-side backing the CPU can touch.
    ///
    /// Fails with `NoBacking` when neither system memory nor a DMA buffer is
    /// authoritative; the caller must not assume a mappable block afterwards.
    pub fn ensure_sysmem(&self, pixmap: &Arc<Pixmap>) -> Result<()> {
        {
            let mut state = pixmap.state.lock();

            if !state
                .backing
                .intersects(BackingFlags::SYSMEM | BackingFlags::DMABUF)
            {
                return Err(Error::NoBacking);
            }

            if state.backing.contains(BackingFlags::SYSMEM) {
                if state.sysmem.is_none() {
                    let size = state.info.byte_size();
                    state.sysmem = Some(vec![0u8; size]);
                }
                return Ok(());
            }
        }

        self.ensure_dmabuf(pixmap)
    }

    /// Materialize the DMA-mappable buffer backing, migrating host-memory
    /// content into it on first creation. A pixmap that only has surface
    /// content instead gets dirty tracking activated, so the content flows
    /// through the synchronization engine on demand.
    pub fn ensure_dmabuf(&self, pixmap: &Arc<Pixmap>) -> Result<()> {
        let mut state = pixmap.state.lock();

        if state.dmabuf.is_some() {
            return Ok(());
        }

        let size = state.info.byte_size();
        let buf = self.device.dmabuf_alloc(size)?;

        if let Some(sysmem) = &state.sysmem {
            let addr = buf.map()?;
            let dst = unsafe { core::slice::from_raw_parts_mut(addr, size) };
            let n = size.min(sysmem.len());
            dst[..n].copy_from_slice(&sysmem[..n]);
            buf.unmap();
        } else if state.surface.is_some() {
            state.add_damage();
        }

        state.backing |= BackingFlags::DMABUF;
        state.backing &= !BackingFlags::SYSMEM;
        state.dmabuf = Some(buf);
        state.free_unused_storage();

        Ok(())
    }

    /// Materialize the GPU surface backing. System-side flags stay set: the
    /// surface joins the backing set, it does not replace it until a caller
    /// reassigns authority.
    pub fn ensure_surface(&self, pixmap: &Arc<Pixmap>, flags: SurfaceFlags) -> Result<()> {
        let accel = self.accel.as_ref().ok_or(Error::NoAccel)?;
        let mut state = pixmap.state.lock();

        if state.surface.is_some() {
            return Ok(());
        }

        let surface = accel.surface_create(
            state.info.width,
            state.info.height,
            state.info.depth,
            SurfaceFlags::RENDER_TARGET | flags,
        )?;

        // Tracking is seeded before the surface is installed: the existing
        // system-side content is authoritative, the fresh surface is stale.
        if state.sysmem.is_some() || state.dmabuf.is_some() {
            state.add_damage();
        }
        state.surface = Some(surface);
        state.backing |= BackingFlags::SURFACE;
        state.free_unused_storage();

        Ok(())
    }

    /// Reallocate every live backing for the current header geometry,
    /// preserving the overlapping top-left rectangle
    pub(crate) fn resize(&self, pixmap: &Arc<Pixmap>, old_pitch: u32, old_height: u32) -> Result<()> {
        let mut state = pixmap.state.lock();
        let info = state.info;
        let size = info.byte_size();

        if let Some(old) = state.sysmem.take() {
            let mut fresh = vec![0u8; size];
            copy_stride(
                &mut fresh,
                &old,
                info.pitch,
                old_pitch,
                info.height,
                old_height,
            );
            state.sysmem = Some(fresh);
        }

        if let Some(old) = state.dmabuf.take() {
            let fresh = match self.device.dmabuf_alloc(size) {
                Ok(buf) => buf,
                Err(err) => {
                    // Leave the old buffer in place; the caller reports the
                    // failed resize.
                    state.dmabuf = Some(old);
                    return Err(err);
                }
            };

            let new_addr = fresh.map();
            let old_addr = old.map();
            match (&new_addr, &old_addr) {
                (Ok(dst), Ok(src)) => {
                    let dst =
                        unsafe { core::slice::from_raw_parts_mut(*dst, size) };
                    let src = unsafe {
                        core::slice::from_raw_parts(
                            *src,
                            old_pitch as usize * old_height as usize,
                        )
                    };
                    copy_stride(dst, src, info.pitch, old_pitch, info.height, old_height);
                }
                _ => log::error!("Failed pixmap resize copy."),
            }
            if old_addr.is_ok() {
                old.unmap();
            }
            if new_addr.is_ok() {
                fresh.unmap();
            }
            state.dmabuf = Some(fresh);
        }

        if let Some(surface) = state.surface.clone() {
            surface.redefine(info.width, info.height, info.depth, SurfaceFlags::empty())?;
        }

        Ok(())
    }
}
