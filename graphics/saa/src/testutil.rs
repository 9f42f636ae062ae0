//! Test doubles for the device and acceleration seams

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::device::{Device, DmaBuf, FramebufferInfo};
use crate::region::{Rect, Region};
use crate::surface::{Accel, Surface, SurfaceFlags};
use crate::{Result, Saa, SaaOptions, ACCEL_VERSION_MAJOR};

pub(crate) struct TestDmaBuf {
    handle: u32,
    data: spin::RwLock<Vec<u8>>,
}

impl DmaBuf for TestDmaBuf {
    fn handle(&self) -> u32 {
        self.handle
    }

    fn size(&self) -> usize {
        self.data.read().len()
    }

    fn map(&self) -> Result<*mut u8> {
        Ok(self.data.write().as_mut_ptr())
    }

    fn unmap(&self) {}
}

#[derive(Default)]
pub(crate) struct TestDevice {
    dma: AtomicU32,
    presents: AtomicU32,
    readbacks: AtomicU32,
    fb_adds: AtomicU32,
    fb_removes: AtomicU32,
    next_fb: AtomicU32,
    next_buf: AtomicU32,
    fence: AtomicU64,
}

impl TestDevice {
    pub fn dma_count(&self) -> u32 {
        self.dma.load(Ordering::SeqCst)
    }

    pub fn present_count(&self) -> u32 {
        self.presents.load(Ordering::SeqCst)
    }

    pub fn readback_count(&self) -> u32 {
        self.readbacks.load(Ordering::SeqCst)
    }

    pub fn fb_adds(&self) -> u32 {
        self.fb_adds.load(Ordering::SeqCst)
    }

    pub fn fb_removes(&self) -> u32 {
        self.fb_removes.load(Ordering::SeqCst)
    }
}

impl Device for TestDevice {
    fn dmabuf_alloc(&self, size: usize) -> Result<Arc<dyn DmaBuf>> {
        Ok(Arc::new(TestDmaBuf {
            handle: self.next_buf.fetch_add(1, Ordering::SeqCst) + 1,
            data: spin::RwLock::new(vec![0u8; size]),
        }))
    }

    fn framebuffer_add(&self, _info: &FramebufferInfo, _buffer_handle: u32) -> Result<u32> {
        self.fb_adds.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_fb.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn framebuffer_remove(&self, _fb: u32) -> Result<()> {
        self.fb_removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn framebuffer_dirty(&self, _fb: u32, _rects: &[Rect]) -> Result<()> {
        Ok(())
    }

    fn present(&self, _dst_x: i32, _dst_y: i32, _region: &Region, _handle: u32) -> Result<()> {
        self.presents.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn present_readback(&self, _region: &Region) -> Result<()> {
        self.readbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dma(
        &self,
        _region: &Region,
        _buf: &dyn DmaBuf,
        _pitch: u32,
        _surface_handle: u32,
        _to_surface: bool,
    ) -> Result<()> {
        self.dma.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fence_insert(&self) -> Result<u64> {
        Ok(self.fence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn fence_wait(&self, _seq: u64, _timeout_ns: u64) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct TestSurface {
    handle: u32,
    stride: AtomicU32,
}

impl Surface for TestSurface {
    fn handle(&self) -> Result<(u32, u32)> {
        Ok((self.handle, self.stride.load(Ordering::SeqCst)))
    }

    fn redefine(&self, width: u32, _height: u32, _depth: u32, _add: SurfaceFlags) -> Result<()> {
        self.stride.store(width * 4, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct TestAccel {
    dma: AtomicU32,
    next: AtomicU32,
}

impl TestAccel {
    pub fn dma_count(&self) -> u32 {
        self.dma.load(Ordering::SeqCst)
    }
}

impl Accel for TestAccel {
    fn version(&self) -> (u32, u32) {
        (ACCEL_VERSION_MAJOR, 0)
    }

    fn surface_create(
        &self,
        width: u32,
        _height: u32,
        _depth: u32,
        _flags: SurfaceFlags,
    ) -> Result<Arc<dyn Surface>> {
        Ok(Arc::new(TestSurface {
            handle: self.next.fetch_add(1, Ordering::SeqCst) + 1,
            stride: AtomicU32::new(width * 4),
        }))
    }

    fn surface_dma(
        &self,
        _surface: &dyn Surface,
        _data: *mut u8,
        _pitch: u32,
        _to_surface: bool,
        _rects: &[Rect],
    ) -> Result<()> {
        self.dma.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn copy_prepare(&self, _dst: &dyn Surface, _src: &dyn Surface) -> Result<()> {
        Ok(())
    }

    fn copy(&self, _dst_x: i32, _dst_y: i32, _src_x: i32, _src_y: i32, _w: u32, _h: u32) {}

    fn copy_done(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn engine_with_accel() -> (Saa, Arc<TestDevice>, Arc<TestAccel>) {
    let device = Arc::new(TestDevice::default());
    let accel = Arc::new(TestAccel::default());
    let saa = Saa::new(device.clone(), Some(accel.clone()), SaaOptions::default());
    (saa, device, accel)
}

pub(crate) fn engine_without_accel() -> (Saa, Arc<TestDevice>) {
    let device = Arc::new(TestDevice::default());
    let saa = Saa::new(device.clone(), None, SaaOptions::default());
    (saa, device)
}
