//! Engine context and pixmap lifecycle
//!
//! One `Saa` exists per screen. It owns the pixmap side table, the transient
//! copy state and the deferred-upload queue, and it is the object the host's
//! dispatch layer delegates drawing callbacks into.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock};

use crate::copy::CopyState;
use crate::device::Device;
use crate::pixmap::{BackingFlags, Pixmap, PixmapId, PixmapInfo};
use crate::surface::Accel;
use crate::{Error, Result, ACCEL_VERSION_MAJOR};

/// Engine configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct SaaOptions {
    /// Use direct buffer-descriptor DMA when a pixmap is DMA-backed instead
    /// of routing transfers through the acceleration library
    pub direct_dma: bool,
}

/// Per-screen engine context
pub struct Saa {
    pub(crate) device: Arc<dyn Device>,
    pub(crate) accel: Option<Arc<dyn Accel>>,
    pub(crate) pixmaps: RwLock<BTreeMap<PixmapId, Arc<Pixmap>>>,
    pub(crate) copy_state: Mutex<CopyState>,
    /// Pixmaps whose shadow content still needs uploading for direct
    /// rendering consumers
    pub(crate) sync_queue: Mutex<Vec<Arc<Pixmap>>>,
    pub(crate) fence_ring: Mutex<alloc::collections::VecDeque<u64>>,
    pub(crate) direct_dma: bool,
    next_pixmap: AtomicU32,
    pub(crate) next_scanout: AtomicU32,
}

impl Saa {
    /// Create the engine for one screen.
    ///
    /// A missing or major-version-incompatible acceleration library is not
    /// fatal: the engine degrades to system-memory operation and every
    /// surface-dependent path reports `Error::NoAccel` or falls back.
    pub fn new(device: Arc<dyn Device>, accel: Option<Arc<dyn Accel>>, options: SaaOptions) -> Self {
        let accel = accel.filter(|a| {
            let (major, minor) = a.version();
            if major != ACCEL_VERSION_MAJOR {
                log::warn!(
                    "Incompatible acceleration interface {}.{}, disabling 3D",
                    major,
                    minor
                );
                false
            } else {
                true
            }
        });

        Self {
            device,
            accel,
            pixmaps: RwLock::new(BTreeMap::new()),
            copy_state: Mutex::new(CopyState::new()),
            sync_queue: Mutex::new(Vec::new()),
            fence_ring: Mutex::new(alloc::collections::VecDeque::new()),
            direct_dma: options.direct_dma,
            next_pixmap: AtomicU32::new(1),
            next_scanout: AtomicU32::new(1),
        }
    }

    /// Whether surface-backed operation is available
    pub fn has_accel(&self) -> bool {
        self.accel.is_some()
    }

    /// Stride in bytes for a row of `width` pixels at `bpp`, rounded up to
    /// whole 32-bit words as the windowing system computes it
    pub fn pitch_for(width: u32, bpp: u32) -> u32 {
        ((width * bpp + 31) >> 5) * 4
    }

    /// Track a new pixmap. Storage is lazy; system memory starts as the
    /// authoritative backing.
    pub fn create_pixmap(&self, width: u32, height: u32, depth: u32, bpp: u32) -> Result<Arc<Pixmap>> {
        if width == 0 || height == 0 || depth == 0 || bpp == 0 {
            return Err(Error::InvalidParameter);
        }

        let info = PixmapInfo {
            width,
            height,
            depth,
            bpp,
            pitch: Self::pitch_for(width, bpp),
        };

        let id = PixmapId(self.next_pixmap.fetch_add(1, Ordering::SeqCst));
        let pixmap = Arc::new(Pixmap::new(id, info));
        self.pixmaps.write().insert(id, pixmap.clone());
        Ok(pixmap)
    }

    /// Look up a tracked pixmap by id
    pub fn pixmap(&self, id: PixmapId) -> Option<Arc<Pixmap>> {
        self.pixmaps.read().get(&id).cloned()
    }

    /// Untrack a pixmap and free its storage. Scanout boxes still holding a
    /// reference keep the record alive until they are unbound.
    pub fn destroy_pixmap(&self, pixmap: &Arc<Pixmap>) {
        {
            let mut state = pixmap.state.lock();
            state.backing = BackingFlags::empty();
            state.free_unused_storage();
            state.remove_present();
            state.damage = false;
            state.dirty_hw.clear();
            state.dirty_shadow.clear();

            if state.dri2_fronts != 0 {
                log::error!("Incorrect dri2 front count.");
            }
            state.sync_queued = false;
        }

        self.sync_queue
            .lock()
            .retain(|p| !Arc::ptr_eq(p, pixmap));
        self.pixmaps.write().remove(&pixmap.id);
    }

    /// Apply a header modification: new geometry, with zero meaning "keep
    /// the current value". Existing backings are resized and the overlapping
    /// top-left rectangle is preserved.
    ///
    /// Externally-owned pixel storage is not supported: the record drops all
    /// backings and the caller must treat the pixmap as untracked.
    pub fn modify_header(
        &self,
        pixmap: &Arc<Pixmap>,
        width: u32,
        height: u32,
        depth: u32,
        bpp: u32,
        external_data: bool,
    ) -> Result<()> {
        if external_data {
            let mut state = pixmap.state.lock();
            state.backing = BackingFlags::empty();
            state.free_unused_storage();
            return Err(Error::InvalidParameter);
        }

        let (old_pitch, old_height) = {
            let mut state = pixmap.state.lock();
            let old = state.info;

            let width = if width == 0 { old.width } else { width };
            let height = if height == 0 { old.height } else { height };
            let depth = if depth == 0 { old.depth } else { depth };
            let bpp = if bpp == 0 { old.bpp } else { bpp };

            state.info = PixmapInfo {
                width,
                height,
                depth,
                bpp,
                pitch: Self::pitch_for(width, bpp),
            };

            if state.backing.is_empty() {
                state.backing = BackingFlags::SYSMEM;
            }

            (old.pitch, old.height)
        };

        // Resize copy errors only cost pixels outside the overlap; they show
        // up as rendering artefacts, not failures.
        if self.resize(pixmap, old_pitch, old_height).is_err() {
            log::error!("Failed pixmap resize copy.");
        }

        let mut state = pixmap.state.lock();
        state.add_damage();
        state.free_unused_storage();
        Ok(())
    }

    /// Take a direct-rendering front-buffer reference
    pub fn dri2_front_ref(&self, pixmap: &Arc<Pixmap>) {
        pixmap.state.lock().dri2_fronts += 1;
    }

    /// Drop a direct-rendering front-buffer reference
    pub fn dri2_front_unref(&self, pixmap: &Arc<Pixmap>) {
        let mut state = pixmap.state.lock();
        if state.dri2_fronts == 0 {
            log::error!("Incorrect dri2 front count.");
            return;
        }
        state.dri2_fronts -= 1;
    }

    /// Called when a drawing operation on `pixmap` completes. Direct
    /// rendering front buffers are brought up to date on the surface
    /// immediately; on transfer failure the pixmap is queued for
    /// `flush_queued`.
    pub fn operation_complete(&self, pixmap: &Arc<Pixmap>) {
        let upload = {
            let state = pixmap.state.lock();
            if state.surface.is_none() || state.dri2_fronts == 0 {
                return;
            }
            state.dirty_shadow.clone()
        };
        if upload.is_empty() {
            return;
        }

        if self.upload_to_hw(pixmap, &upload).is_ok() {
            pixmap.state.lock().dirty_shadow.subtract(&upload);
        } else {
            let mut state = pixmap.state.lock();
            if !state.sync_queued {
                state.sync_queued = true;
                drop(state);
                self.sync_queue.lock().push(pixmap.clone());
            }
        }
    }

    /// Drain the deferred-upload queue, clearing shadow dirt for every
    /// pixmap whose upload succeeds
    pub fn flush_queued(&self) {
        let queued: Vec<Arc<Pixmap>> = self.sync_queue.lock().clone();

        for pixmap in queued {
            let upload = pixmap.state.lock().dirty_shadow.clone();
            if self.upload_to_hw(&pixmap, &upload).is_ok() {
                let mut state = pixmap.state.lock();
                state.dirty_shadow.subtract(&upload);
                state.sync_queued = false;
                drop(state);
                self.sync_queue.lock().retain(|p| !Arc::ptr_eq(p, &pixmap));
            }
        }
    }
}
