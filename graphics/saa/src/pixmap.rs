//! Pixmap extension records
//!
//! Each windowing-system pixmap the engine tracks gets one extension record
//! holding its storage backings and dirty-region state. Records live in a
//! side table keyed by pixmap id and are shared as `Arc<Pixmap>`; a record
//! outlives its table entry while scanout boxes still co-own it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use spin::Mutex;

use crate::device::DmaBuf;
use crate::region::{Rect, Region};
use crate::scanout::ScanoutId;
use crate::surface::Surface;

bitflags! {
    /// Which storage kinds are authoritative for a pixmap
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BackingFlags: u32 {
        /// Plain host memory
        const SYSMEM = 1 << 0;
        /// DMA-mappable buffer object
        const DMABUF = 1 << 1;
        /// GPU surface
        const SURFACE = 1 << 2;
    }
}

/// Pixmap identity in the side table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PixmapId(pub u32);

/// Pixmap geometry header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixmapInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub bpp: u32,
    /// Stride in bytes
    pub pitch: u32,
}

impl PixmapInfo {
    /// Full-extent rectangle
    pub fn extent(&self) -> Rect {
        Rect::from_extent(0, 0, self.width, self.height)
    }

    /// Size in bytes of a full system-side pixel block
    pub fn byte_size(&self) -> usize {
        self.pitch as usize * self.height as usize
    }
}

/// Presentation tracking, allocated only while the pixmap is a scanout target
#[derive(Debug, Default)]
pub struct PresentState {
    /// Content drawn to the GPU surface but not yet presented
    pub dirty_present: Region,
    /// Content presented by a present-copy, not yet folded into tracking
    pub present_damage: Region,
    /// Content queued for a dirty-framebuffer notification on next flush
    pub pending_update: Region,
    /// Content queued for a present on next flush
    pub pending_present: Region,
}

/// Mutable per-pixmap state
pub struct PixmapState {
    pub info: PixmapInfo,
    pub backing: BackingFlags,
    /// Host-memory pixel block, allocated lazily
    pub sysmem: Option<Vec<u8>>,
    /// DMA buffer object
    pub dmabuf: Option<Arc<dyn DmaBuf>>,
    /// GPU surface
    pub surface: Option<Arc<dyn Surface>>,
    /// Whether dirty tracking is active
    pub damage: bool,
    /// Valid in system-side backings, stale in the GPU surface
    pub dirty_shadow: Region,
    /// Valid in the GPU surface, stale in system-side backings
    pub dirty_hw: Region,
    /// Present tracking, scanout targets only
    pub present: Option<PresentState>,
    /// Scanout boxes referencing this pixmap, with their screen bounds
    pub scanouts: Vec<(ScanoutId, Rect)>,
    /// Kernel framebuffer object while bound for scanout
    pub fb: Option<u32>,
    /// Outstanding direct-rendering front-buffer references
    pub dri2_fronts: u32,
    /// Queued on the engine's deferred-upload list
    pub sync_queued: bool,
}

impl PixmapState {
    pub fn new(info: PixmapInfo) -> Self {
        Self {
            info,
            backing: BackingFlags::SYSMEM,
            sysmem: None,
            dmabuf: None,
            surface: None,
            damage: false,
            dirty_shadow: Region::new(),
            dirty_hw: Region::new(),
            present: None,
            scanouts: Vec::new(),
            fb: None,
            dri2_fronts: 0,
            sync_queued: false,
        }
    }

    /// Release any storage whose backing flag is clear
    pub fn free_unused_storage(&mut self) {
        if !self.backing.contains(BackingFlags::SYSMEM) && self.sysmem.is_some() {
            self.sysmem = None;
        }
        if !self.backing.contains(BackingFlags::SURFACE) && self.surface.is_some() {
            self.surface = None;
        }
        if !self.backing.contains(BackingFlags::DMABUF) && self.dmabuf.is_some() {
            self.dmabuf = None;
        }
    }

    /// Activate dirty tracking. The side that currently holds the content
    /// starts with the whole extent stale on the other side.
    pub fn add_damage(&mut self) {
        if self.damage {
            return;
        }
        self.damage = true;

        let extent = self.info.extent();
        if self.surface.is_some() {
            self.dirty_hw = Region::from_rect(extent);
        } else {
            self.dirty_shadow = Region::from_rect(extent);
        }
    }

    /// Deactivate dirty tracking unless both a surface and a DMA backing
    /// still need reconciling
    pub fn remove_damage(&mut self) {
        if !self.damage || (self.surface.is_some() && self.dmabuf.is_some()) {
            return;
        }
        self.damage = false;
        self.dirty_hw.clear();
        self.dirty_shadow.clear();
    }

    /// Allocate presentation tracking; implies dirty tracking
    pub fn add_present(&mut self) {
        if self.present.is_none() {
            self.present = Some(PresentState::default());
        }
        self.add_damage();
    }

    /// Tear down presentation tracking
    pub fn remove_present(&mut self) {
        self.present = None;
    }

    /// Whether present-copy destinations may target this pixmap
    pub fn is_present_target(&self) -> bool {
        self.present.is_some()
    }
}

/// A tracked pixmap: identity plus interior-mutable state
pub struct Pixmap {
    pub id: PixmapId,
    pub state: Mutex<PixmapState>,
}

impl Pixmap {
    pub fn new(id: PixmapId, info: PixmapInfo) -> Self {
        Self {
            id,
            state: Mutex::new(PixmapState::new(info)),
        }
    }
}
