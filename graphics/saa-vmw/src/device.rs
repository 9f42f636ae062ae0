//! Virtual device implementation
//!
//! `VmwDevice` models the paravirtual device behind both engine seams: the
//! kernel interface (buffers, framebuffers, present, readback, fences) and
//! the acceleration library (surfaces, DMA, blits). Every submitted command
//! lands in a log so callers can audit device round trips.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use saa::{
    Accel, Device, DmaBuf, Error, FramebufferInfo, Rect, Region, Result, Surface, SurfaceFlags,
    ACCEL_VERSION_MAJOR,
};

use crate::protocol::{Command, CommandType};
use crate::resource::{VmwDmaBuf, VmwSurface};

/// The device models 32-bit pixels throughout
pub(crate) const BYTES_PER_PIXEL: u32 = 4;

/// Row-wise copy of the overlapping rectangle between two pixel blocks
pub(crate) fn copy_overlap(
    dst: &mut [u8],
    src: &[u8],
    dst_stride: u32,
    src_stride: u32,
    dst_height: u32,
    src_height: u32,
) {
    let height = dst_height.min(src_height) as usize;
    let row = dst_stride.min(src_stride) as usize;
    for y in 0..height {
        let d = y * dst_stride as usize;
        let s = y * src_stride as usize;
        dst[d..d + row].copy_from_slice(&src[s..s + row]);
    }
}

/// One surface's pixel storage
pub(crate) struct SurfaceImage {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub stride: u32,
    pub data: Vec<u8>,
}

impl SurfaceImage {
    fn extent(&self) -> Rect {
        Rect::from_extent(0, 0, self.width, self.height)
    }
}

/// The emulated display
struct ScreenImage {
    width: u32,
    height: u32,
    pitch: u32,
    data: Vec<u8>,
}

/// A registered framebuffer object and the buffer backing it
struct FbEntry {
    info: FramebufferInfo,
    buffer: u32,
}

/// Shared device state, reachable from surfaces handed to the engine
pub(crate) struct VmwState {
    screen: Mutex<ScreenImage>,
    pub(crate) surfaces: RwLock<BTreeMap<u32, SurfaceImage>>,
    fbs: RwLock<BTreeMap<u32, FbEntry>>,
    buffers: RwLock<BTreeMap<u32, Arc<VmwDmaBuf>>>,
    commands: Mutex<Vec<Command>>,
    blit: Mutex<Option<(u32, u32)>>,
    next_surface: AtomicU32,
    next_buffer: AtomicU32,
    next_fb: AtomicU32,
    fence: AtomicU64,
}

/// The paravirtual display device
pub struct VmwDevice {
    state: Arc<VmwState>,
}

impl VmwDevice {
    /// Create a device scanning out a `width` x `height` screen
    pub fn new(width: u32, height: u32) -> Self {
        log::debug!("SVGA device model: {}x{} screen", width, height);

        let pitch = width * BYTES_PER_PIXEL;
        Self {
            state: Arc::new(VmwState {
                screen: Mutex::new(ScreenImage {
                    width,
                    height,
                    pitch,
                    data: vec![0u8; pitch as usize * height as usize],
                }),
                surfaces: RwLock::new(BTreeMap::new()),
                fbs: RwLock::new(BTreeMap::new()),
                buffers: RwLock::new(BTreeMap::new()),
                commands: Mutex::new(Vec::new()),
                blit: Mutex::new(None),
                next_surface: AtomicU32::new(1),
                next_buffer: AtomicU32::new(1),
                next_fb: AtomicU32::new(1),
                fence: AtomicU64::new(0),
            }),
        }
    }

    fn log(&self, command: Command) {
        self.state.commands.lock().push(command);
    }

    /// Snapshot of the submitted-command log
    pub fn commands(&self) -> Vec<Command> {
        self.state.commands.lock().clone()
    }

    /// Number of logged commands of one type
    pub fn command_count(&self, ty: CommandType) -> usize {
        self.state
            .commands
            .lock()
            .iter()
            .filter(|c| c.command_type() == ty)
            .count()
    }

    /// Drop the command log
    pub fn clear_commands(&self) {
        self.state.commands.lock().clear();
    }

    /// Read one screen pixel as a little-endian 32-bit value
    pub fn screen_pixel(&self, x: u32, y: u32) -> u32 {
        let screen = self.state.screen.lock();
        let off = (y * screen.pitch + x * BYTES_PER_PIXEL) as usize;
        u32::from_le_bytes([
            screen.data[off],
            screen.data[off + 1],
            screen.data[off + 2],
            screen.data[off + 3],
        ])
    }

    /// Copy rows between a mapped pixel block and a surface
    fn dma_rects(
        &self,
        surface: u32,
        data: *mut u8,
        data_len: usize,
        pitch: u32,
        to_surface: bool,
        rects: &[Rect],
    ) -> Result<()> {
        let mut surfaces = self.state.surfaces.write();
        let image = surfaces.get_mut(&surface).ok_or(Error::Surface)?;
        let extent = image.extent();

        for rect in rects {
            let clipped = rect.intersection(&extent);
            if clipped.is_empty() {
                continue;
            }
            let row = clipped.width() as usize * BYTES_PER_PIXEL as usize;
            for y in clipped.y1..clipped.y2 {
                let s_off = y as usize * image.stride as usize
                    + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                let m_off =
                    y as usize * pitch as usize + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                if m_off + row > data_len {
                    return Err(Error::Dma);
                }
                unsafe {
                    if to_surface {
                        core::ptr::copy_nonoverlapping(
                            data.add(m_off) as *const u8,
                            image.data.as_mut_ptr().add(s_off),
                            row,
                        );
                    } else {
                        core::ptr::copy_nonoverlapping(
                            image.data.as_ptr().add(s_off),
                            data.add(m_off),
                            row,
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

impl Device for VmwDevice {
    fn dmabuf_alloc(&self, size: usize) -> Result<Arc<dyn DmaBuf>> {
        let handle = self.state.next_buffer.fetch_add(1, Ordering::SeqCst);
        let buf = Arc::new(VmwDmaBuf::new(handle, size));
        self.state.buffers.write().insert(handle, buf.clone());
        Ok(buf)
    }

    fn framebuffer_add(&self, info: &FramebufferInfo, buffer_handle: u32) -> Result<u32> {
        if !self.state.buffers.read().contains_key(&buffer_handle) {
            return Err(Error::Framebuffer);
        }

        let fb = self.state.next_fb.fetch_add(1, Ordering::SeqCst);
        self.state.fbs.write().insert(
            fb,
            FbEntry {
                info: *info,
                buffer: buffer_handle,
            },
        );
        self.log(Command::DefineFramebuffer {
            fb,
            buffer: buffer_handle,
        });
        Ok(fb)
    }

    fn framebuffer_remove(&self, fb: u32) -> Result<()> {
        if self.state.fbs.write().remove(&fb).is_none() {
            return Err(Error::Framebuffer);
        }
        self.log(Command::DestroyFramebuffer { fb });
        Ok(())
    }

    fn framebuffer_dirty(&self, fb: u32, rects: &[Rect]) -> Result<()> {
        {
            let fbs = self.state.fbs.read();
            let entry = fbs.get(&fb).ok_or(Error::Framebuffer)?;
            let buffers = self.state.buffers.read();
            let buf = buffers.get(&entry.buffer).ok_or(Error::Framebuffer)?;
            let data = buf.data.read();
            let mut screen = self.state.screen.lock();

            let bounds = Rect::from_extent(0, 0, entry.info.width, entry.info.height)
                .intersection(&Rect::from_extent(0, 0, screen.width, screen.height));

            for rect in rects {
                let clipped = rect.intersection(&bounds);
                if clipped.is_empty() {
                    continue;
                }
                let row = clipped.width() as usize * BYTES_PER_PIXEL as usize;
                for y in clipped.y1..clipped.y2 {
                    let b_off = y as usize * entry.info.pitch as usize
                        + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                    let s_off = y as usize * screen.pitch as usize
                        + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                    if b_off + row > data.len() {
                        return Err(Error::Framebuffer);
                    }
                    screen.data[s_off..s_off + row].copy_from_slice(&data[b_off..b_off + row]);
                }
            }
        }

        self.log(Command::Update {
            fb,
            rects: rects.len(),
        });
        Ok(())
    }

    fn present(&self, dst_x: i32, dst_y: i32, region: &Region, surface_handle: u32) -> Result<()> {
        {
            let surfaces = self.state.surfaces.read();
            let image = surfaces.get(&surface_handle).ok_or(Error::Present)?;
            let mut screen = self.state.screen.lock();
            let screen_extent = Rect::from_extent(0, 0, screen.width, screen.height);

            for rect in region.rects() {
                let src = rect.intersection(&image.extent());
                if src.is_empty() {
                    continue;
                }
                let dst = src.translated(dst_x, dst_y).intersection(&screen_extent);
                if dst.is_empty() {
                    continue;
                }
                let src = dst.translated(-dst_x, -dst_y);
                let row = src.width() as usize * BYTES_PER_PIXEL as usize;
                for y in src.y1..src.y2 {
                    let s_off = y as usize * image.stride as usize
                        + src.x1 as usize * BYTES_PER_PIXEL as usize;
                    let d_off = (y + dst_y) as usize * screen.pitch as usize
                        + (src.x1 + dst_x) as usize * BYTES_PER_PIXEL as usize;
                    screen.data[d_off..d_off + row]
                        .copy_from_slice(&image.data[s_off..s_off + row]);
                }
            }
        }

        self.log(Command::Present {
            surface: surface_handle,
            dst_x,
            dst_y,
            rects: region.rects().len(),
        });
        Ok(())
    }

    fn present_readback(&self, region: &Region) -> Result<()> {
        {
            let fbs = self.state.fbs.read();
            let buffers = self.state.buffers.read();
            let screen = self.state.screen.lock();
            let screen_extent = Rect::from_extent(0, 0, screen.width, screen.height);

            for entry in fbs.values() {
                let Some(buf) = buffers.get(&entry.buffer) else {
                    continue;
                };
                let mut data = buf.data.write();
                let bounds = Rect::from_extent(0, 0, entry.info.width, entry.info.height)
                    .intersection(&screen_extent);

                for rect in region.rects() {
                    let clipped = rect.intersection(&bounds);
                    if clipped.is_empty() {
                        continue;
                    }
                    let row = clipped.width() as usize * BYTES_PER_PIXEL as usize;
                    for y in clipped.y1..clipped.y2 {
                        let b_off = y as usize * entry.info.pitch as usize
                            + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                        let s_off = y as usize * screen.pitch as usize
                            + clipped.x1 as usize * BYTES_PER_PIXEL as usize;
                        if b_off + row > data.len() {
                            return Err(Error::Readback);
                        }
                        data[b_off..b_off + row]
                            .copy_from_slice(&screen.data[s_off..s_off + row]);
                    }
                }
            }
        }

        self.log(Command::PresentReadback {
            rects: region.rects().len(),
        });
        Ok(())
    }

    fn dma(
        &self,
        region: &Region,
        buf: &dyn DmaBuf,
        pitch: u32,
        surface_handle: u32,
        to_surface: bool,
    ) -> Result<()> {
        let data = buf.map()?;
        let ret = self.dma_rects(
            surface_handle,
            data,
            buf.size(),
            pitch,
            to_surface,
            region.rects(),
        );
        buf.unmap();
        ret?;

        self.log(Command::SurfaceDma {
            surface: surface_handle,
            to_surface,
            rects: region.rects().len(),
        });
        Ok(())
    }

    fn fence_insert(&self) -> Result<u64> {
        let seq = self.state.fence.fetch_add(1, Ordering::SeqCst) + 1;
        self.log(Command::Fence { seq });
        Ok(seq)
    }

    fn fence_wait(&self, seq: u64, _timeout_ns: u64) -> Result<()> {
        // Submission is synchronous; every inserted fence has signaled.
        if seq <= self.state.fence.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }
}

impl Accel for VmwDevice {
    fn version(&self) -> (u32, u32) {
        (ACCEL_VERSION_MAJOR, 2)
    }

    fn surface_create(
        &self,
        width: u32,
        height: u32,
        depth: u32,
        _flags: SurfaceFlags,
    ) -> Result<Arc<dyn Surface>> {
        let id = self.state.next_surface.fetch_add(1, Ordering::SeqCst);
        let stride = width * BYTES_PER_PIXEL;
        self.state.surfaces.write().insert(
            id,
            SurfaceImage {
                width,
                height,
                depth,
                stride,
                data: vec![0u8; stride as usize * height as usize],
            },
        );
        Ok(Arc::new(VmwSurface::new(id, self.state.clone())))
    }

    fn surface_dma(
        &self,
        surface: &dyn Surface,
        data: *mut u8,
        pitch: u32,
        to_surface: bool,
        rects: &[Rect],
    ) -> Result<()> {
        let (handle, _) = surface.handle()?;
        self.dma_rects(handle, data, usize::MAX, pitch, to_surface, rects)?;

        self.log(Command::SurfaceDma {
            surface: handle,
            to_surface,
            rects: rects.len(),
        });
        Ok(())
    }

    fn copy_prepare(&self, dst: &dyn Surface, src: &dyn Surface) -> Result<()> {
        let (dst, _) = dst.handle()?;
        let (src, _) = src.handle()?;

        let surfaces = self.state.surfaces.read();
        if !surfaces.contains_key(&dst) || !surfaces.contains_key(&src) {
            return Err(Error::Surface);
        }
        drop(surfaces);

        *self.state.blit.lock() = Some((dst, src));
        Ok(())
    }

    fn copy(&self, dst_x: i32, dst_y: i32, src_x: i32, src_y: i32, width: u32, height: u32) {
        let Some((dst_id, src_id)) = *self.state.blit.lock() else {
            return;
        };

        {
            let mut surfaces = self.state.surfaces.write();

            // Lift the source block out first; the map cannot hand out two
            // entries at once.
            let block = {
                let Some(src_img) = surfaces.get(&src_id) else {
                    return;
                };
                let src_rect = Rect::from_extent(src_x, src_y, width, height)
                    .intersection(&src_img.extent());
                if src_rect.is_empty() {
                    return;
                }
                let row = src_rect.width() as usize * BYTES_PER_PIXEL as usize;
                let mut block = Vec::with_capacity(row * src_rect.height() as usize);
                for y in src_rect.y1..src_rect.y2 {
                    let off = y as usize * src_img.stride as usize
                        + src_rect.x1 as usize * BYTES_PER_PIXEL as usize;
                    block.extend_from_slice(&src_img.data[off..off + row]);
                }
                (src_rect, row, block)
            };

            let (src_rect, row, block) = block;
            let Some(dst_img) = surfaces.get_mut(&dst_id) else {
                return;
            };
            let dst_rect = Rect::from_extent(
                dst_x + (src_rect.x1 - src_x),
                dst_y + (src_rect.y1 - src_y),
                src_rect.width(),
                src_rect.height(),
            )
            .intersection(&dst_img.extent());

            let copy_row = (dst_rect.width() as usize * BYTES_PER_PIXEL as usize).min(row);
            for (i, y) in (dst_rect.y1..dst_rect.y2).enumerate() {
                if i >= src_rect.height() as usize {
                    break;
                }
                let off = y as usize * dst_img.stride as usize
                    + dst_rect.x1 as usize * BYTES_PER_PIXEL as usize;
                dst_img.data[off..off + copy_row]
                    .copy_from_slice(&block[i * row..i * row + copy_row]);
            }
        }

        self.log(Command::SurfaceCopy {
            dst: dst_id,
            src: src_id,
        });
    }

    fn copy_done(&self) -> Result<()> {
        *self.state.blit.lock() = None;
        Ok(())
    }
}
