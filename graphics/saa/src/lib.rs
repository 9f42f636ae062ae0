//! Surface-Acceleration Abstraction (SAA)
//!
//! This crate tracks where a pixmap's pixel contents currently live — plain
//! system memory, a DMA-mappable buffer, or a GPU surface — and moves data
//! between those backings on demand so that every access sees valid content.
//!
//! # Architecture
//!
//! The SAA core sits between the display server's drawing dispatch and two
//! external collaborators it only knows through traits:
//!
//! ```text
//! ┌──────────────────────┐
//! │  Drawing dispatch /  │
//! │   CRTC management    │
//! └──────────┬───────────┘
//!            │ damage / validate / copy / scanout
//! ┌──────────▼───────────┐
//! │      SAA engine      │◄─── This crate
//! │ (dirty regions, DMA, │
//! │  present batching)   │
//! └────┬────────────┬────┘
//!      │            │
//! ┌────▼─────┐ ┌────▼─────┐
//! │  Accel   │ │  Device  │
//! │ library  │ │ (kernel) │
//! └──────────┘ └──────────┘
//! ```
//!
//! It provides:
//!
//! - Per-pixmap dirty-region tracking (hardware vs shadow vs presented)
//! - Lazy storage management across the three backing kinds
//! - Access validation with on-demand upload/download DMA
//! - Copy strategy election (present-copy, GPU blit, CPU fallback)
//! - Scanout reference counting and framebuffer lifetime
//!
//! # Usage
//!
//! ```ignore
//! use saa::{AccessKind, Region, Saa, SaaOptions};
//!
//! let saa = Saa::new(device, Some(accel), SaaOptions::default());
//! let pixmap = saa.create_pixmap(640, 480, 24, 32)?;
//!
//! saa.validate_for_access(&pixmap, Some(&region), AccessKind::Gpu)?;
//! saa.damage(&pixmap, true, &region);
//! ```

#![no_std]

extern crate alloc;

pub mod copy;
pub mod device;
pub mod dirty;
pub mod driver;
pub mod pixmap;
pub mod region;
pub mod scanout;
pub mod storage;
pub mod surface;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports
pub use copy::CopyStrategy;
pub use device::{Device, DmaBuf, FramebufferInfo};
pub use driver::{Saa, SaaOptions};
pub use pixmap::{BackingFlags, Pixmap, PixmapId, PixmapInfo};
pub use region::{Rect, Region};
pub use scanout::{ScanoutBox, ScanoutId};
pub use surface::{Accel, Surface, SurfaceFlags};
pub use validate::AccessKind;

/// SAA interface version
pub const SAA_VERSION: (u32, u32, u32) = (0, 1, 0);

/// Acceleration-library interface major version this crate is built against
pub const ACCEL_VERSION_MAJOR: u32 = 2;

/// Number of outstanding present fences before throttling
pub const PRESENT_FENCE_DEPTH: usize = 3;

/// Default timeout for throttling fence waits, in nanoseconds
pub const FENCE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Result type for SAA operations
pub type Result<T> = core::result::Result<T, Error>;

/// SAA error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Out of host or device memory
    OutOfMemory,
    /// No acceleration library available (disabled or version mismatch)
    NoAccel,
    /// The pixmap has no backing the operation could use
    NoBacking,
    /// Invalid parameter
    InvalidParameter,
    /// Surface-to-buffer or buffer-to-surface DMA failed
    Dma,
    /// Present command failed
    Present,
    /// Present readback failed
    Readback,
    /// Framebuffer add/remove/dirty failed
    Framebuffer,
    /// Surface create/redefine/handle failed
    Surface,
    /// Fence wait timed out
    Timeout,
    /// Operation failed
    OperationFailed,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::NoAccel => write!(f, "No acceleration library"),
            Error::NoBacking => write!(f, "No usable backing"),
            Error::InvalidParameter => write!(f, "Invalid parameter"),
            Error::Dma => write!(f, "DMA failed"),
            Error::Present => write!(f, "Present failed"),
            Error::Readback => write!(f, "Present readback failed"),
            Error::Framebuffer => write!(f, "Framebuffer operation failed"),
            Error::Surface => write!(f, "Surface operation failed"),
            Error::Timeout => write!(f, "Timeout"),
            Error::OperationFailed => write!(f, "Operation failed"),
        }
    }
}
