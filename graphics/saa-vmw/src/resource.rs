//! Device resources: DMA buffers and surfaces
//!
//! Buffers and surfaces are plain byte stores inside the virtual device.
//! Surface pixel data lives in the device's central store keyed by handle,
//! the way the kernel tracks resources; the `VmwSurface` object is just the
//! engine-facing view of one entry.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use saa::{DmaBuf, Error, Result, Surface, SurfaceFlags};

use crate::device::{copy_overlap, VmwState, BYTES_PER_PIXEL};

/// A DMA-capable buffer object
pub struct VmwDmaBuf {
    handle: u32,
    pub(crate) data: spin::RwLock<Vec<u8>>,
}

impl VmwDmaBuf {
    pub(crate) fn new(handle: u32, size: usize) -> Self {
        Self {
            handle,
            data: spin::RwLock::new(vec![0u8; size]),
        }
    }
}

impl DmaBuf for VmwDmaBuf {
    fn handle(&self) -> u32 {
        self.handle
    }

    fn size(&self) -> usize {
        self.data.read().len()
    }

    fn map(&self) -> Result<*mut u8> {
        Ok(self.data.write().as_mut_ptr())
    }

    fn unmap(&self) {
        // Data stays allocated
    }
}

/// Engine-facing view of one surface in the device store
pub struct VmwSurface {
    id: u32,
    state: Arc<VmwState>,
}

impl VmwSurface {
    pub(crate) fn new(id: u32, state: Arc<VmwState>) -> Self {
        Self { id, state }
    }
}

impl Surface for VmwSurface {
    fn handle(&self) -> Result<(u32, u32)> {
        let surfaces = self.state.surfaces.read();
        let image = surfaces.get(&self.id).ok_or(Error::Surface)?;
        Ok((self.id, image.stride))
    }

    fn redefine(&self, width: u32, height: u32, depth: u32, _add: SurfaceFlags) -> Result<()> {
        let mut surfaces = self.state.surfaces.write();
        let image = surfaces.get_mut(&self.id).ok_or(Error::Surface)?;

        if image.width == width && image.height == height && image.depth == depth {
            return Ok(());
        }

        let stride = width * BYTES_PER_PIXEL;
        let mut data = vec![0u8; stride as usize * height as usize];
        copy_overlap(
            &mut data,
            &image.data,
            stride,
            image.stride,
            height,
            image.height,
        );

        image.width = width;
        image.height = height;
        image.depth = depth;
        image.stride = stride;
        image.data = data;
        Ok(())
    }
}
