//! Scanout binding
//!
//! A CRTC displaying a pixmap takes a scanout reference through a
//! `ScanoutBox`. The first reference materializes the DMA backing, the
//! presentation tracking and the kernel framebuffer; the last release reads
//! presented content back, tears the framebuffer down and drops the
//! co-owning pixmap reference.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem;
use core::sync::atomic::Ordering;

use crate::device::FramebufferInfo;
use crate::pixmap::Pixmap;
use crate::region::{Rect, Region};
use crate::{Error, Result, Saa, FENCE_TIMEOUT_NS, PRESENT_FENCE_DEPTH};

/// Identity of one scanout binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanoutId(pub u32);

/// One CRTC slot's binding to a scanout pixmap
pub struct ScanoutBox {
    /// Screen-space bounds this CRTC scans out
    pub bounds: Rect,
    id: Option<ScanoutId>,
    pixmap: Option<Arc<Pixmap>>,
}

impl ScanoutBox {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            id: None,
            pixmap: None,
        }
    }

    /// The pixmap this box currently references
    pub fn pixmap(&self) -> Option<&Arc<Pixmap>> {
        self.pixmap.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.pixmap.is_some()
    }
}

impl Saa {
    /// Take a scanout reference on `pixmap` for `sbox`.
    ///
    /// The first reference creates the scanout resources; any failure rolls
    /// them back and leaves the box unbound. Returns the framebuffer handle.
    pub fn scanout_ref(&self, sbox: &mut ScanoutBox, pixmap: &Arc<Pixmap>) -> Result<u32> {
        let first = pixmap.state.lock().scanouts.is_empty();

        if first {
            if let Err(err) = self.scanout_bind_first(pixmap) {
                let mut state = pixmap.state.lock();
                state.remove_present();
                state.remove_damage();
                sbox.pixmap = None;
                return Err(err);
            }
        }

        let id = match sbox.id {
            Some(id) => id,
            None => {
                let id = ScanoutId(self.next_scanout.fetch_add(1, Ordering::SeqCst));
                sbox.id = Some(id);
                id
            }
        };

        let mut state = pixmap.state.lock();
        state.scanouts.push((id, sbox.bounds));
        let fb = state.fb.ok_or(Error::Framebuffer)?;
        drop(state);

        sbox.pixmap = Some(pixmap.clone());
        Ok(fb)
    }

    fn scanout_bind_first(&self, pixmap: &Arc<Pixmap>) -> Result<()> {
        self.ensure_dmabuf(pixmap)?;

        let (info, buffer_handle) = {
            let mut state = pixmap.state.lock();
            state.add_present();
            let buf = state.dmabuf.clone().ok_or(Error::NoBacking)?;
            (state.info, buf.handle())
        };

        let fb = self
            .device
            .framebuffer_add(
                &FramebufferInfo {
                    width: info.width,
                    height: info.height,
                    depth: info.depth,
                    bpp: info.bpp,
                    pitch: info.pitch,
                },
                buffer_handle,
            )
            .map_err(|_| Error::Framebuffer)?;

        pixmap.state.lock().fb = Some(fb);
        Ok(())
    }

    /// Release a scanout reference. The last release captures any GPU-only
    /// content with an unbounded readback before the framebuffer goes away.
    pub fn scanout_unref(&self, sbox: &mut ScanoutBox) {
        let Some(pixmap) = sbox.pixmap.take() else {
            return;
        };
        let Some(id) = sbox.id else {
            return;
        };

        let last = {
            let mut state = pixmap.state.lock();
            let last = state.scanouts.len() == 1
                && state.scanouts.iter().any(|(sid, _)| *sid == id);
            if last {
                if let Some(present) = state.present.as_mut() {
                    present.pending_update.clear();
                }
            } else {
                state.scanouts.retain(|(sid, _)| *sid != id);
            }
            last
        };

        if !last {
            return;
        }

        // Read back while the box is still listed so the readback can be
        // clipped to its bounds; content only on the GPU must survive the
        // teardown.
        let _ = self.present_readback(&pixmap, None);

        let fb = {
            let mut state = pixmap.state.lock();
            state.scanouts.retain(|(sid, _)| *sid != id);
            state.fb.take()
        };
        if let Some(fb) = fb {
            if self.device.framebuffer_remove(fb).is_err() {
                log::error!("Failed to remove framebuffer.");
            }
        }

        let mut state = pixmap.state.lock();
        state.remove_present();
        state.remove_damage();
    }

    /// Queue a full refresh of a scanout pixmap on the next flush
    pub fn scanout_refresh(&self, pixmap: &Arc<Pixmap>) {
        let mut state = pixmap.state.lock();
        let extent = state.info.extent();
        let dirty_hw = state.dirty_hw.clone();

        if let Some(present) = state.present.as_mut() {
            let mut pending_present = dirty_hw.clone();
            pending_present.subtract(&present.dirty_present);
            present.pending_present = pending_present;

            let mut pending_update = Region::from_rect(extent);
            pending_update.subtract(&dirty_hw);
            present.pending_update = pending_update;
        }
    }

    /// Flush queued scanout work: dirty-framebuffer notifications for
    /// system-side updates and presents for surface-side content. Presents
    /// are paced through a small fence ring.
    pub fn flush_scanouts(&self) {
        let pixmaps: Vec<Arc<Pixmap>> = self.pixmaps.read().values().cloned().collect();
        let mut presented = false;

        for pixmap in pixmaps {
            let (fb, update, queued, surface) = {
                let mut state = pixmap.state.lock();
                let Some(fb) = state.fb else {
                    continue;
                };
                let Some(present) = state.present.as_mut() else {
                    continue;
                };
                let update = mem::take(&mut present.pending_update);
                let queued = mem::take(&mut present.pending_present);
                (fb, update, queued, state.surface.clone())
            };

            if !update.is_empty() && self.device.framebuffer_dirty(fb, update.rects()).is_err() {
                log::error!("Failed to send framebuffer dirty rectangles.");
            }

            if !queued.is_empty() {
                match surface.map(|s| s.handle()) {
                    Some(Ok((handle, _))) => {
                        if self.device.present(0, 0, &queued, handle).is_err() {
                            log::error!("Present failed.");
                        } else {
                            presented = true;
                        }
                    }
                    Some(Err(_)) => log::error!("Could not get present surface handle."),
                    None => log::error!("No surface to present from."),
                }
            }
        }

        if presented {
            self.throttle_presents();
        }
    }

    fn throttle_presents(&self) {
        let Ok(seq) = self.device.fence_insert() else {
            return;
        };

        let mut ring = self.fence_ring.lock();
        ring.push_back(seq);
        while ring.len() > PRESENT_FENCE_DEPTH {
            if let Some(oldest) = ring.pop_front() {
                if self.device.fence_wait(oldest, FENCE_TIMEOUT_NS).is_err() {
                    log::warn!("Present fence wait timed out.");
                }
            }
        }
    }
}
