//! SVGA-style 2D command records
//!
//! The virtual device consumes a small 2D command set: screen updates,
//! surface-to-screen presents, readbacks, surface DMA and fences. The
//! backend keeps a log of every submitted command; tests inspect it to
//! assert how many device round trips an engine operation cost.

/// Command identifiers, SVGA 2D numbering style
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandType {
    /// Screen update from the bound framebuffer
    Update = 1,
    /// Surface-to-surface copy
    SurfaceCopy = 3,
    /// Framebuffer object definition
    DefineFramebuffer = 16,
    /// Framebuffer object teardown
    DestroyFramebuffer = 17,
    /// Surface DMA to or from guest memory
    SurfaceDma = 21,
    /// Present a surface region to the screen
    Present = 22,
    /// Read presented screen content back into bound buffers
    PresentReadback = 23,
    /// Fence marker
    Fence = 30,
}

/// One submitted command, as recorded in the device log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Update {
        fb: u32,
        rects: usize,
    },
    SurfaceCopy {
        dst: u32,
        src: u32,
    },
    DefineFramebuffer {
        fb: u32,
        buffer: u32,
    },
    DestroyFramebuffer {
        fb: u32,
    },
    SurfaceDma {
        surface: u32,
        to_surface: bool,
        rects: usize,
    },
    Present {
        surface: u32,
        dst_x: i32,
        dst_y: i32,
        rects: usize,
    },
    PresentReadback {
        rects: usize,
    },
    Fence {
        seq: u64,
    },
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Update { .. } => CommandType::Update,
            Command::SurfaceCopy { .. } => CommandType::SurfaceCopy,
            Command::DefineFramebuffer { .. } => CommandType::DefineFramebuffer,
            Command::DestroyFramebuffer { .. } => CommandType::DestroyFramebuffer,
            Command::SurfaceDma { .. } => CommandType::SurfaceDma,
            Command::Present { .. } => CommandType::Present,
            Command::PresentReadback { .. } => CommandType::PresentReadback,
            Command::Fence { .. } => CommandType::Fence,
        }
    }
}
