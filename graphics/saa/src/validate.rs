//! Access validation and transfer engine
//!
//! Before any CPU map, GPU copy, or present, the engine computes which
//! regions are stale in the backing that access needs, moves exactly those
//! regions, and subtracts them from the stale set. Dirty bits are only ever
//! subtracted after the device call that made them clean succeeded.

use alloc::sync::Arc;

use crate::pixmap::Pixmap;
use crate::region::Region;
use crate::surface::SurfaceFlags;
use crate::{Error, Result, Saa};

/// The kind of access a caller is about to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    CpuRead,
    CpuWrite,
    Gpu,
}

impl Saa {
    /// Make sure all presented content covered by `region` has been read
    /// back into a DMA-mappable backing.
    ///
    /// Readback cannot cross a CRTC boundary, so the working set is clipped
    /// against every scanout box and read back piecewise; each successful
    /// piece is subtracted from `dirty_hw` immediately.
    pub(crate) fn present_readback(
        &self,
        pixmap: &Arc<Pixmap>,
        region: Option<&Region>,
    ) -> Result<()> {
        {
            let state = pixmap.state.lock();
            if !state.damage || state.dirty_hw.is_empty() || state.present.is_none() {
                return Ok(());
            }
        }

        // Let any batched present work land visually before capturing it.
        self.flush_scanouts();

        let mut intersection = {
            let state = pixmap.state.lock();
            let Some(present) = &state.present else {
                return Ok(());
            };
            let mut intersection = state.dirty_hw.intersection(&present.dirty_present);
            if let Some(region) = region {
                intersection = intersection.intersection(region);
            }
            intersection
        };

        if intersection.is_empty() {
            return Ok(());
        }

        // Make really sure there is a buffer to read back into.
        self.ensure_dmabuf(pixmap)?;

        let mut state = pixmap.state.lock();
        let boxes = state.scanouts.clone();
        for (_, bounds) in boxes {
            let piece = intersection.intersect_rect(bounds);
            if piece.is_empty() {
                continue;
            }
            self.device.present_readback(&piece).map_err(|_| Error::Readback)?;
            intersection.subtract(&piece);
            state.dirty_hw.subtract(&piece);
        }

        Ok(())
    }

    /// Move `region` between the system-side backing and the GPU surface.
    ///
    /// Pixmaps missing either side have nothing to reconcile and succeed
    /// trivially. DMA-backed pixmaps take the direct descriptor path when
    /// the engine was configured for it; everything else maps the backing
    /// and routes through the acceleration library.
    fn transfer(&self, pixmap: &Arc<Pixmap>, region: &Region, to_surface: bool) -> Result<()> {
        if region.is_empty() {
            return Ok(());
        }

        let mut state = pixmap.state.lock();

        let Some(surface) = state.surface.clone() else {
            return Ok(());
        };
        if state.dmabuf.is_none() && state.sysmem.is_none() {
            return Ok(());
        }

        let pitch = state.info.pitch;
        let result = if state.dmabuf.is_some() && self.direct_dma {
            let buf = state.dmabuf.clone().ok_or(Error::NoBacking)?;
            surface
                .handle()
                .and_then(|(handle, _)| self.device.dma(region, buf.as_ref(), pitch, handle, to_surface))
        } else {
            let accel = self.accel.clone().ok_or(Error::NoAccel)?;

            if let Some(buf) = state.dmabuf.clone() {
                buf.map().and_then(|data| {
                    let ret =
                        accel.surface_dma(surface.as_ref(), data, pitch, to_surface, region.rects());
                    buf.unmap();
                    ret
                })
            } else if let Some(sysmem) = state.sysmem.as_mut() {
                accel.surface_dma(
                    surface.as_ref(),
                    sysmem.as_mut_ptr(),
                    pitch,
                    to_surface,
                    region.rects(),
                )
            } else {
                Err(Error::NoBacking)
            }
        };

        result.map_err(|_| {
            log::error!(
                "DMA {} surface failed.",
                if to_surface { "to" } else { "from" }
            );
            Error::Dma
        })
    }

    /// Bring `region` (or everything) up to date in the system-side backing
    pub(crate) fn download_from_hw(
        &self,
        pixmap: &Arc<Pixmap>,
        region: Option<&Region>,
    ) -> Result<()> {
        self.present_readback(pixmap, region)?;

        let readback = {
            let state = pixmap.state.lock();
            if state.dirty_hw.is_empty() || state.surface.is_none() {
                return Ok(());
            }
            match region {
                Some(region) => region.intersection(&state.dirty_hw),
                None => state.dirty_hw.clone(),
            }
        };

        if readback.is_empty() {
            return Ok(());
        }

        self.ensure_sysmem(pixmap)?;
        self.transfer(pixmap, &readback, false)?;

        pixmap.state.lock().dirty_hw.subtract(&readback);
        Ok(())
    }

    /// Push `region`'s system-side content to the GPU surface. Callers own
    /// the dirty-set subtraction on success.
    pub(crate) fn upload_to_hw(&self, pixmap: &Arc<Pixmap>, region: &Region) -> Result<()> {
        self.transfer(pixmap, region, true)
    }

    /// Make sure the pixmap has a surface with valid contents over `region`
    pub(crate) fn validate_hw(
        &self,
        pixmap: &Arc<Pixmap>,
        region: Option<&Region>,
        add_flags: SurfaceFlags,
    ) -> Result<()> {
        if self.accel.is_none() {
            return Err(Error::NoAccel);
        }

        let existing = {
            let state = pixmap.state.lock();
            state.surface.clone().map(|s| (s, state.info))
        };
        match existing {
            Some((surface, info)) => surface.redefine(
                info.width,
                info.height,
                info.depth,
                SurfaceFlags::RENDER_TARGET | add_flags,
            )?,
            None => self.ensure_surface(pixmap, add_flags)?,
        }

        self.present_readback(pixmap, region)?;

        let upload = {
            let state = pixmap.state.lock();
            if !state.damage {
                return Ok(());
            }
            let mut upload = state.dirty_shadow.clone();
            if let Some(present) = &state.present {
                upload.union(&present.dirty_present);
            }
            match region {
                Some(region) => upload.intersection(region),
                None => upload,
            }
        };

        if upload.is_empty() {
            return Ok(());
        }

        self.upload_to_hw(pixmap, &upload)?;

        let mut state = pixmap.state.lock();
        state.dirty_shadow.subtract(&upload);
        if let Some(present) = &mut state.present {
            present.dirty_present.subtract(&upload);
        }
        Ok(())
    }

    /// Validate `region` (or the whole pixmap) for the given access. After a
    /// successful return the stale set for that access direction no longer
    /// intersects the region.
    pub fn validate_for_access(
        &self,
        pixmap: &Arc<Pixmap>,
        region: Option<&Region>,
        access: AccessKind,
    ) -> Result<()> {
        match access {
            AccessKind::CpuRead | AccessKind::CpuWrite => self.download_from_hw(pixmap, region),
            AccessKind::Gpu => self.validate_hw(pixmap, region, SurfaceFlags::empty()),
        }
    }

    /// Validate for CPU access and expose a mappable pointer to the pixel
    /// block. Pair with `unmap`.
    pub fn map(&self, pixmap: &Arc<Pixmap>, access: AccessKind) -> Result<*mut u8> {
        if access == AccessKind::Gpu {
            return Err(Error::InvalidParameter);
        }

        self.validate_for_access(pixmap, None, access)?;
        self.ensure_sysmem(pixmap)?;

        let mut state = pixmap.state.lock();
        if let Some(sysmem) = state.sysmem.as_mut() {
            Ok(sysmem.as_mut_ptr())
        } else if let Some(buf) = state.dmabuf.clone() {
            buf.map()
        } else {
            Err(Error::NoBacking)
        }
    }

    /// Release a `map`
    pub fn unmap(&self, pixmap: &Arc<Pixmap>) {
        let state = pixmap.state.lock();
        if let Some(buf) = &state.dmabuf {
            buf.unmap();
        }
    }
}
