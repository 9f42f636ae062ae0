//! Copy strategy election and present-copy batching
//!
//! A pixmap-to-pixmap copy takes one of three routes: a present-copy that
//! turns the copy into screen presentation of already-rendered surface
//! content, a surface-to-surface blit through the acceleration library, or
//! a CPU fallback performed by the caller. Present-copies batch: rectangles
//! sharing one translation offset accumulate into a single device present.

use alloc::sync::Arc;

use crate::pixmap::{BackingFlags, Pixmap, PixmapState};
use crate::region::{Rect, Region};
use crate::surface::SurfaceFlags;
use crate::Saa;

/// The route elected for the current copy sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStrategy {
    /// Accumulate as presentation of source-surface content
    Present,
    /// Surface-to-surface blit
    Blit,
    /// The caller performs a pixel-level copy
    Fallback,
}

/// Transient state of one copy-prepare/copy/copy-done sequence
pub(crate) struct CopyState {
    pub mode: Option<CopyStrategy>,
    /// Destination of the present batch
    pub dst: Option<Arc<Pixmap>>,
    /// Source-surface handle the batch presents from
    pub src_handle: u32,
    /// Batch offset; all accumulated rectangles share it
    pub diff: Option<(i32, i32)>,
    /// Accumulated source rectangles
    pub region: Region,
}

impl CopyState {
    pub fn new() -> Self {
        Self {
            mode: None,
            dst: None,
            src_handle: 0,
            diff: None,
            region: Region::new(),
        }
    }
}

/// Whether the source has dirty surface content over `region`, and whether
/// its surface content there is fully valid
fn check_hw_contents(state: &PixmapState, region: &Region) -> (bool, bool) {
    if state.surface.is_none() {
        return (false, false);
    }
    let has_dirty_hw = state.dirty_hw.overlaps(region);
    let has_valid_hw = state.dirty_shadow.intersection(region).is_empty();
    (has_dirty_hw, has_valid_hw)
}

impl Saa {
    /// Elect a strategy for copying `src_region` from `src` into `dst`.
    ///
    /// Present-copy is tried first whenever the destination is an active
    /// scanout target; blitting is only considered otherwise, so a pixmap
    /// about to be replaced as a front buffer is never promoted to a surface
    /// just to receive a copy. Internal failures degrade to `Fallback`.
    pub fn copy_prepare(
        &self,
        src: &Arc<Pixmap>,
        dst: &Arc<Pixmap>,
        src_region: &Region,
    ) -> CopyStrategy {
        self.copy_state.lock().mode = None;

        if self.accel.is_none() {
            return CopyStrategy::Fallback;
        }

        let (has_dirty_hw, has_valid_hw, src_surface_backed, src_surface) = {
            let state = src.state.lock();
            let (dirty, valid) = check_hw_contents(&state, src_region);
            (
                dirty,
                valid,
                state.backing.contains(BackingFlags::SURFACE),
                state.surface.clone(),
            )
        };
        let dst_is_present_target = dst.state.lock().is_present_target();

        if dst_is_present_target && src_surface_backed {
            if !has_dirty_hw && !has_valid_hw {
                return CopyStrategy::Fallback;
            }
            if Arc::ptr_eq(src, dst) {
                return CopyStrategy::Fallback;
            }
            let Some(surface) = src_surface else {
                return CopyStrategy::Fallback;
            };
            let Ok((handle, _)) = surface.handle() else {
                return CopyStrategy::Fallback;
            };

            {
                let mut cs = self.copy_state.lock();
                cs.dst = Some(dst.clone());
                cs.src_handle = handle;
                cs.diff = None;
                cs.region.clear();
            }
            self.flush_scanouts();

            if self.validate_hw(src, Some(src_region), SurfaceFlags::empty()).is_err() {
                return CopyStrategy::Fallback;
            }

            self.copy_state.lock().mode = Some(CopyStrategy::Present);
            return CopyStrategy::Present;
        }

        if src_surface.is_some() && !Arc::ptr_eq(src, dst) {
            // Blit when the source is partially only on the surface, or
            // entirely valid there and the destination already has one.
            let dst_has_surface = dst.state.lock().surface.is_some();
            if !has_dirty_hw && !(has_valid_hw && dst_has_surface) {
                return CopyStrategy::Fallback;
            }
            if self.validate_hw(src, Some(src_region), SurfaceFlags::empty()).is_err() {
                return CopyStrategy::Fallback;
            }
            if self.ensure_surface(dst, SurfaceFlags::RENDER_TARGET).is_err() {
                return CopyStrategy::Fallback;
            }

            let (dst_surface, src_surface) = {
                let d = dst.state.lock().surface.clone();
                let s = src.state.lock().surface.clone();
                (d, s)
            };
            if let (Some(accel), Some(d), Some(s)) = (&self.accel, dst_surface, src_surface) {
                if accel.copy_prepare(d.as_ref(), s.as_ref()).is_ok() {
                    self.copy_state.lock().mode = Some(CopyStrategy::Blit);
                    return CopyStrategy::Blit;
                }
            }
        }

        CopyStrategy::Fallback
    }

    /// Queue one rectangle of the prepared copy
    pub fn copy(&self, src_x: i32, src_y: i32, dst_x: i32, dst_y: i32, width: u32, height: u32) {
        let mut cs = self.copy_state.lock();
        match cs.mode {
            Some(CopyStrategy::Present) => {
                let diff = (dst_x - src_x, dst_y - src_y);

                // The device present takes one offset per call; a new offset
                // finalizes the batch accumulated so far.
                if cs.diff.is_some() && cs.diff != Some(diff) {
                    self.present_done(&mut cs);
                }
                if cs.diff.is_none() {
                    cs.diff = Some(diff);
                }
                cs.region.union_rect(Rect::from_extent(src_x, src_y, width, height));
            }
            Some(CopyStrategy::Blit) => {
                if let Some(accel) = &self.accel {
                    accel.copy(dst_x, dst_y, src_x, src_y, width, height);
                }
            }
            _ => {}
        }
    }

    /// Finish the copy sequence, flushing any batched present
    pub fn copy_done(&self) {
        let mut cs = self.copy_state.lock();
        match cs.mode.take() {
            Some(CopyStrategy::Present) => {
                self.present_done(&mut cs);
                cs.dst = None;
            }
            Some(CopyStrategy::Blit) => {
                drop(cs);
                if let Some(accel) = &self.accel {
                    if accel.copy_done().is_err() {
                        log::error!("Blit submit failed.");
                    }
                }
            }
            Some(CopyStrategy::Fallback) | None => {}
        }
    }

    /// Issue the accumulated batch as one present and fold the translated
    /// region into the destination's presented damage
    fn present_done(&self, cs: &mut CopyState) {
        let Some((dx, dy)) = cs.diff.take() else {
            return;
        };
        let mut region = core::mem::take(&mut cs.region);

        if self.device.present(dx, dy, &region, cs.src_handle).is_err() {
            log::error!("Present failed.");
        }

        region.translate(dx, dy);
        if let Some(dst) = &cs.dst {
            let mut state = dst.state.lock();
            if let Some(present) = &mut state.present {
                present.present_damage.union(&region);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::engine_with_accel;
    use crate::AccessKind;

    fn full(saa: &Saa, w: u32, h: u32) -> (Arc<Pixmap>, Region) {
        let pixmap = saa.create_pixmap(w, h, 24, 32).unwrap();
        (pixmap, Region::from_rect(Rect::new(0, 0, w as i32, h as i32)))
    }

    #[test]
    fn test_fallback_without_surface_content() {
        let (saa, _dev, _accel) = engine_with_accel();
        let (src, region) = full(&saa, 32, 32);
        let (dst, _) = full(&saa, 32, 32);

        assert_eq!(saa.copy_prepare(&src, &dst, &region), CopyStrategy::Fallback);
    }

    #[test]
    fn test_blit_needs_dst_surface_when_src_fully_valid() {
        let (saa, _dev, _accel) = engine_with_accel();
        let (src, region) = full(&saa, 32, 32);
        let (dst, _) = full(&saa, 32, 32);

        // Fully valid on the surface, nothing dirty: without a destination
        // surface the copy must not promote, so it falls back.
        saa.ensure_sysmem(&src).unwrap();
        saa.ensure_surface(&src, SurfaceFlags::empty()).unwrap();
        saa.validate_for_access(&src, None, AccessKind::Gpu).unwrap();
        assert_eq!(saa.copy_prepare(&src, &dst, &region), CopyStrategy::Fallback);

        saa.ensure_surface(&dst, SurfaceFlags::empty()).unwrap();
        assert_eq!(saa.copy_prepare(&src, &dst, &region), CopyStrategy::Blit);
    }

    #[test]
    fn test_blit_on_dirty_surface_content() {
        let (saa, _dev, _accel) = engine_with_accel();
        let (src, region) = full(&saa, 32, 32);
        let (dst, _) = full(&saa, 32, 32);

        saa.ensure_sysmem(&src).unwrap();
        saa.ensure_surface(&src, SurfaceFlags::empty()).unwrap();
        saa.damage(&src, true, &region);

        // Destination has no surface, but dirty surface content alone
        // justifies the blit.
        assert_eq!(saa.copy_prepare(&src, &dst, &region), CopyStrategy::Blit);
    }

    #[test]
    fn test_self_copy_falls_back() {
        let (saa, _dev, _accel) = engine_with_accel();
        let (src, region) = full(&saa, 32, 32);

        saa.ensure_sysmem(&src).unwrap();
        saa.ensure_surface(&src, SurfaceFlags::empty()).unwrap();
        saa.damage(&src, true, &region);

        assert_eq!(saa.copy_prepare(&src, &src, &region), CopyStrategy::Fallback);
    }
}
