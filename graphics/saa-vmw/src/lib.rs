//! Paravirtual SVGA-style backend for the SAA engine
//!
//! This crate implements the SAA device and acceleration seams against an
//! in-memory model of a paravirtual display device.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │     SAA engine      │
//! │ (dirty regions, DMA │
//! │  present batching)  │
//! └──────────┬──────────┘
//!            │ Device + Accel traits
//! ┌──────────▼──────────┐
//! │    SVGA backend     │◄─── This crate
//! │ (surfaces, buffers, │
//! │  screen, fences)    │
//! └──────────┬──────────┘
//!            │ 2D command stream
//! ┌──────────▼──────────┐
//! │  Virtual display    │
//! │     hardware        │
//! └─────────────────────┘
//! ```
//!
//! The same device object serves both seams, the way the acceleration
//! library and the mode-setting interface share one kernel device. Every
//! submitted command is logged; callers can audit exactly how many device
//! round trips an engine operation cost.
//!
//! # Usage
//!
//! ```ignore
//! use saa::{Saa, SaaOptions};
//! use saa_vmw::VmwDevice;
//!
//! let device = Arc::new(VmwDevice::new(1024, 768));
//! let saa = Saa::new(device.clone(), Some(device.clone()), SaaOptions::default());
//! ```

#![no_std]

extern crate alloc;

mod device;
mod protocol;
mod resource;

pub use device::VmwDevice;
pub use protocol::{Command, CommandType};
pub use resource::{VmwDmaBuf, VmwSurface};
