//! Presentation surface
//!
//! Frames are copied into a texture owned by the surface. The stream thread
//! creates the texture when a format is negotiated and writes into it through
//! a short-lived lock for every presented frame.

use tracing::{debug, trace};

use crate::error::{CaptureError, Result};
use crate::formats::PixelLayout;

/// Writable view of a locked texture
pub struct TextureLock<'a> {
    /// Texture memory, `stride * height` bytes
    pub pixels: &'a mut [u8],
    /// Row pitch in bytes
    pub stride: usize,
    /// Rows
    pub height: usize,
}

/// Destination for decoded frames
pub trait PresentationSurface: Send {
    /// Layouts this surface can hold, most capable first
    fn supported_layouts(&self) -> Vec<PixelLayout>;

    /// (Re)create the streaming texture
    fn create_texture(&mut self, layout: PixelLayout, width: u32, height: u32) -> Result<()>;

    /// Lock the texture for writing
    fn lock(&mut self) -> Result<TextureLock<'_>>;

    /// Release the lock taken by [`lock`](Self::lock)
    fn unlock(&mut self);

    /// Show the last unlocked contents
    fn present(&mut self);
}

/// Texture description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub layout: PixelLayout,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
}

/// CPU-memory surface
///
/// Keeps the most recent presented frame. Used by the CLI as a headless sink
/// and by tests.
#[derive(Debug, Default)]
pub struct MemorySurface {
    layouts: Vec<PixelLayout>,
    texture: Option<TextureInfo>,
    pixels: Vec<u8>,
    locked: bool,
    presented: u64,
    textures_created: u64,
}

impl MemorySurface {
    /// Surface accepting every known layout
    pub fn new() -> Self {
        Self::with_layouts(PixelLayout::ALL.to_vec())
    }

    /// Surface accepting only `layouts`
    pub fn with_layouts(layouts: Vec<PixelLayout>) -> Self {
        Self {
            layouts,
            ..Self::default()
        }
    }

    /// Current texture, if one was created
    pub fn texture(&self) -> Option<TextureInfo> {
        self.texture
    }

    /// Texture contents
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Frames presented so far
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Times the texture was (re)created
    pub fn textures_created(&self) -> u64 {
        self.textures_created
    }

    /// Whether a lock is held
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl PresentationSurface for MemorySurface {
    fn supported_layouts(&self) -> Vec<PixelLayout> {
        self.layouts.clone()
    }

    fn create_texture(&mut self, layout: PixelLayout, width: u32, height: u32) -> Result<()> {
        if !self.layouts.contains(&layout) {
            return Err(CaptureError::format(format!(
                "Surface cannot hold {} textures",
                layout
            )));
        }
        if width == 0 || height == 0 {
            return Err(CaptureError::format(format!(
                "Invalid texture size {}x{}",
                width, height
            )));
        }

        let stride = layout.stride_for(width) as usize;
        self.pixels = vec![0; stride * height as usize];
        self.texture = Some(TextureInfo {
            layout,
            width,
            height,
            stride,
        });
        self.locked = false;
        self.textures_created += 1;
        debug!("Created {} texture {}x{}", layout, width, height);
        Ok(())
    }

    fn lock(&mut self) -> Result<TextureLock<'_>> {
        let texture = self
            .texture
            .ok_or_else(|| CaptureError::buffer("No texture to lock"))?;
        if self.locked {
            return Err(CaptureError::buffer("Texture is already locked"));
        }
        self.locked = true;
        Ok(TextureLock {
            pixels: &mut self.pixels,
            stride: texture.stride,
            height: texture.height as usize,
        })
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn present(&mut self) {
        self.presented += 1;
        trace!("Presented frame {}", self.presented);
    }
}
