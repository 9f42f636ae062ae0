//! Engine-through-backend integration tests
//!
//! These drive the SAA engine against the in-memory device model and audit
//! both the resulting dirty state and the submitted-command log.

use std::sync::Arc;

use saa::{AccessKind, Rect, Region, Saa, SaaOptions, ScanoutBox, SurfaceFlags};
use saa_vmw::{CommandType, VmwDevice};

fn engine() -> (Saa, Arc<VmwDevice>) {
    let device = Arc::new(VmwDevice::new(1024, 768));
    let saa = Saa::new(device.clone(), Some(device.clone()), SaaOptions::default());
    (saa, device)
}

fn full(width: u32, height: u32) -> Region {
    Region::from_rect(Rect::from_extent(0, 0, width, height))
}

fn pattern_byte(row: usize, col: usize) -> u8 {
    ((row * 31 + col * 7) % 251) as u8
}

unsafe fn write_pattern(ptr: *mut u8, pitch: usize, width_bytes: usize, height: usize) {
    for row in 0..height {
        for col in 0..width_bytes {
            *ptr.add(row * pitch + col) = pattern_byte(row, col);
        }
    }
}

unsafe fn check_pattern(ptr: *const u8, pitch: usize, width_bytes: usize, height: usize) {
    for row in 0..height {
        for col in 0..width_bytes {
            assert_eq!(
                *ptr.add(row * pitch + col),
                pattern_byte(row, col),
                "mismatch at row {} byte {}",
                row,
                col
            );
        }
    }
}

#[test]
fn cpu_validate_clears_requested_hw_dirt() {
    let (saa, _dev) = engine();
    let pixmap = saa.create_pixmap(64, 64, 24, 32).unwrap();
    saa.ensure_sysmem(&pixmap).unwrap();
    saa.ensure_surface(&pixmap, SurfaceFlags::empty()).unwrap();
    saa.damage(&pixmap, true, &full(64, 64));

    let request = Region::from_rect(Rect::new(0, 0, 32, 32));
    saa.validate_for_access(&pixmap, Some(&request), AccessKind::CpuRead)
        .unwrap();

    let state = pixmap.state.lock();
    assert!(state.dirty_hw.intersection(&request).is_empty());
    assert!(state.dirty_hw.overlaps_rect(&Rect::new(32, 32, 64, 64)));
    assert!(state.dirty_hw.intersection(&state.dirty_shadow).is_empty());
}

#[test]
fn gpu_validate_clears_requested_shadow_dirt() {
    let (saa, _dev) = engine();
    let pixmap = saa.create_pixmap(64, 64, 24, 32).unwrap();
    saa.ensure_sysmem(&pixmap).unwrap();
    saa.ensure_surface(&pixmap, SurfaceFlags::empty()).unwrap();
    saa.damage(&pixmap, false, &full(64, 64));

    let request = Region::from_rect(Rect::new(16, 0, 48, 64));
    saa.validate_for_access(&pixmap, Some(&request), AccessKind::Gpu)
        .unwrap();

    let state = pixmap.state.lock();
    assert!(state.dirty_shadow.intersection(&request).is_empty());
    assert!(state.dirty_shadow.overlaps_rect(&Rect::new(0, 0, 16, 64)));
    assert!(state.dirty_hw.intersection(&state.dirty_shadow).is_empty());
}

#[test]
fn content_round_trips_through_surface() {
    let (saa, _dev) = engine();
    let pixmap = saa.create_pixmap(64, 64, 24, 32).unwrap();
    let pitch = 64 * 4;

    let ptr = saa.map(&pixmap, AccessKind::CpuWrite).unwrap();
    unsafe { write_pattern(ptr, pitch, pitch, 64) };
    saa.unmap(&pixmap);
    saa.damage(&pixmap, false, &full(64, 64));

    // Upload, then deliberately lose the system-side copy.
    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    saa.damage(&pixmap, true, &full(64, 64));
    {
        let mut state = pixmap.state.lock();
        if let Some(sysmem) = state.sysmem.as_mut() {
            sysmem.iter_mut().for_each(|b| *b = 0);
        }
    }

    saa.validate_for_access(&pixmap, None, AccessKind::CpuRead).unwrap();

    let ptr = saa.map(&pixmap, AccessKind::CpuRead).unwrap();
    unsafe { check_pattern(ptr, pitch, pitch, 64) };
    saa.unmap(&pixmap);
}

#[test]
fn revalidation_costs_no_transfers() {
    let (saa, dev) = engine();
    let pixmap = saa.create_pixmap(64, 64, 24, 32).unwrap();
    saa.ensure_sysmem(&pixmap).unwrap();
    saa.ensure_surface(&pixmap, SurfaceFlags::empty()).unwrap();
    saa.damage(&pixmap, false, &full(64, 64));

    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    let transfers = dev.command_count(CommandType::SurfaceDma);
    assert!(transfers > 0);

    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    assert_eq!(dev.command_count(CommandType::SurfaceDma), transfers);
}

#[test]
fn resize_preserves_overlap() {
    let (saa, _dev) = engine();
    let pixmap = saa.create_pixmap(100, 100, 24, 32).unwrap();

    let ptr = saa.map(&pixmap, AccessKind::CpuWrite).unwrap();
    unsafe { write_pattern(ptr, 400, 400, 100) };
    saa.unmap(&pixmap);
    saa.damage(&pixmap, false, &full(100, 100));

    saa.modify_header(&pixmap, 50, 50, 0, 0, false).unwrap();
    saa.modify_header(&pixmap, 200, 200, 0, 0, false).unwrap();

    {
        let state = pixmap.state.lock();
        assert_eq!(state.info.width, 200);
        assert_eq!(state.info.pitch, 800);
    }

    let ptr = saa.map(&pixmap, AccessKind::CpuRead).unwrap();
    // The 50x50 overlap survived both hops; the exposed border must at
    // least be readable, initialized memory.
    unsafe {
        check_pattern(ptr, 800, 200, 50);
        let _ = *ptr.add(199 * 800 + 799);
    }
    saa.unmap(&pixmap);
}

#[test]
fn scanout_refs_share_one_framebuffer() {
    let (saa, dev) = engine();
    let pixmap = saa.create_pixmap(640, 480, 24, 32).unwrap();

    let mut box_a = ScanoutBox::new(Rect::new(0, 0, 640, 480));
    let mut box_b = ScanoutBox::new(Rect::new(0, 0, 640, 480));

    let fb_a = saa.scanout_ref(&mut box_a, &pixmap).unwrap();
    let fb_b = saa.scanout_ref(&mut box_b, &pixmap).unwrap();
    assert_eq!(fb_a, fb_b);
    assert_eq!(dev.command_count(CommandType::DefineFramebuffer), 1);

    saa.scanout_unref(&mut box_a);
    assert_eq!(dev.command_count(CommandType::DestroyFramebuffer), 0);
    saa.scanout_unref(&mut box_b);
    assert_eq!(dev.command_count(CommandType::DestroyFramebuffer), 1);
}

#[test]
fn present_copy_batches_share_one_present() {
    let (saa, dev) = engine();

    let dst = saa.create_pixmap(640, 480, 24, 32).unwrap();
    let mut sbox = ScanoutBox::new(Rect::new(0, 0, 640, 480));
    saa.scanout_ref(&mut sbox, &dst).unwrap();

    let src = saa.create_pixmap(640, 480, 24, 32).unwrap();
    saa.ensure_sysmem(&src).unwrap();
    saa.ensure_surface(&src, SurfaceFlags::empty()).unwrap();
    saa.damage(&src, true, &full(640, 480));

    dev.clear_commands();
    let strategy = saa.copy_prepare(&src, &dst, &full(640, 480));
    assert_eq!(strategy, saa::CopyStrategy::Present);

    // Two rectangles at one offset, then a third at another: the offset
    // switch flushes the first batch, copy_done flushes the second.
    saa.copy(0, 0, 10, 10, 50, 50);
    saa.copy(100, 0, 110, 10, 20, 20);
    saa.copy(0, 0, 30, 40, 10, 10);
    saa.copy_done();

    assert_eq!(dev.command_count(CommandType::Present), 2);

    let state = dst.state.lock();
    let present = state.present.as_ref().unwrap();
    assert!(present.present_damage.overlaps_rect(&Rect::new(10, 10, 60, 60)));
    assert!(present.present_damage.overlaps_rect(&Rect::new(30, 40, 40, 50)));
}

#[test]
fn presented_content_survives_readback() {
    let (saa, _dev) = engine();

    let dst = saa.create_pixmap(64, 64, 24, 32).unwrap();
    let mut sbox = ScanoutBox::new(Rect::new(0, 0, 64, 64));
    saa.scanout_ref(&mut sbox, &dst).unwrap();

    // Render a pattern on a source surface.
    let src = saa.create_pixmap(64, 64, 24, 32).unwrap();
    let pitch = 64 * 4;
    let ptr = saa.map(&src, AccessKind::CpuWrite).unwrap();
    unsafe { write_pattern(ptr, pitch, pitch, 64) };
    saa.unmap(&src);
    saa.damage(&src, false, &full(64, 64));
    saa.validate_for_access(&src, None, AccessKind::Gpu).unwrap();

    // Present-copy it onto the scanout pixmap at offset zero.
    let strategy = saa.copy_prepare(&src, &dst, &full(64, 64));
    assert_eq!(strategy, saa::CopyStrategy::Present);
    saa.copy(0, 0, 0, 0, 64, 64);
    saa.copy_done();
    saa.damage(&dst, true, &full(64, 64));

    // CPU access forces the presented content back through the device.
    saa.validate_for_access(&dst, None, AccessKind::CpuRead).unwrap();
    {
        let state = dst.state.lock();
        assert!(state.dirty_hw.is_empty());
    }

    let ptr = saa.map(&dst, AccessKind::CpuRead).unwrap();
    unsafe { check_pattern(ptr, pitch, pitch, 64) };
    saa.unmap(&dst);

    saa.scanout_unref(&mut sbox);
}

#[test]
fn direct_dma_round_trips_without_accel_transfers() {
    let device = Arc::new(VmwDevice::new(1024, 768));
    let saa = Saa::new(
        device.clone(),
        Some(device.clone()),
        SaaOptions { direct_dma: true },
    );

    let pixmap = saa.create_pixmap(32, 32, 24, 32).unwrap();
    let pitch = 32 * 4;

    // Promote to a DMA buffer so transfers take the descriptor fast path.
    saa.ensure_dmabuf(&pixmap).unwrap();
    saa.ensure_surface(&pixmap, SurfaceFlags::empty()).unwrap();

    let ptr = saa.map(&pixmap, AccessKind::CpuWrite).unwrap();
    unsafe { write_pattern(ptr, pitch, pitch, 32) };
    saa.unmap(&pixmap);
    saa.damage(&pixmap, false, &full(32, 32));

    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    saa.damage(&pixmap, true, &full(32, 32));

    {
        let state = pixmap.state.lock();
        let buf = state.dmabuf.as_ref().unwrap();
        let data = buf.map().unwrap();
        unsafe { core::ptr::write_bytes(data, 0, buf.size()) };
        buf.unmap();
    }

    saa.validate_for_access(&pixmap, None, AccessKind::CpuRead).unwrap();
    let ptr = saa.map(&pixmap, AccessKind::CpuRead).unwrap();
    unsafe { check_pattern(ptr, pitch, pitch, 32) };
    saa.unmap(&pixmap);

    assert!(dev_dma_count(&device) > 0);
}

fn dev_dma_count(device: &VmwDevice) -> usize {
    device.command_count(CommandType::SurfaceDma)
}

#[test]
fn dirty_sets_never_intersect() {
    let (saa, _dev) = engine();
    let pixmap = saa.create_pixmap(128, 128, 24, 32).unwrap();
    saa.ensure_sysmem(&pixmap).unwrap();
    saa.ensure_surface(&pixmap, SurfaceFlags::empty()).unwrap();

    let writes = [
        (false, Rect::new(0, 0, 128, 128)),
        (true, Rect::new(10, 10, 60, 60)),
        (false, Rect::new(40, 40, 90, 90)),
        (true, Rect::new(0, 100, 128, 128)),
        (false, Rect::new(120, 0, 128, 8)),
    ];

    for (hw, rect) in writes {
        saa.damage(&pixmap, hw, &Region::from_rect(rect));
        let state = pixmap.state.lock();
        assert!(state.dirty_hw.intersection(&state.dirty_shadow).is_empty());
    }

    saa.validate_for_access(&pixmap, None, AccessKind::Gpu).unwrap();
    let state = pixmap.state.lock();
    assert!(state.dirty_shadow.is_empty());
    assert!(state.dirty_hw.intersection(&state.dirty_shadow).is_empty());
}
