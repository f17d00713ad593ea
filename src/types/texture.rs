//! Texture types and descriptors.
//!
//! Scene layers use textures as random-access lookup tables, so the formats
//! here are the unfiltered integer and float formats a shader reads with
//! `texelFetch`, not the usual color formats.

use super::Extent3d;
use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 16-bit red channel, unsigned integer.
    R16Uint,
    /// 8-bit RG channels, unsigned integer.
    Rg8Uint,
    /// 16-bit RG channels, unsigned integer.
    Rg16Uint,
    /// 32-bit RG channels, unsigned integer.
    Rg32Uint,
    /// 8-bit RGB channels, unsigned integer.
    Rgb8Uint,
    /// 16-bit RGB channels, unsigned integer.
    Rgb16Uint,
    /// 32-bit RGB channels, unsigned integer.
    Rgb32Uint,
    /// 8-bit RGBA channels, unsigned integer.
    #[default]
    Rgba8Uint,
    /// 32-bit RGB channels, float.
    Rgb32Float,
    /// 32-bit RGBA channels, float.
    Rgba32Float,
}

impl TextureFormat {
    /// Number of channels per texel.
    pub fn components(&self) -> u32 {
        match self {
            Self::R16Uint => 1,
            Self::Rg8Uint | Self::Rg16Uint | Self::Rg32Uint => 2,
            Self::Rgb8Uint | Self::Rgb16Uint | Self::Rgb32Uint | Self::Rgb32Float => 3,
            Self::Rgba8Uint | Self::Rgba32Float => 4,
        }
    }

    /// Size in bytes of a single channel.
    pub fn component_size(&self) -> u32 {
        match self {
            Self::Rg8Uint | Self::Rgb8Uint | Self::Rgba8Uint => 1,
            Self::R16Uint | Self::Rg16Uint | Self::Rgb16Uint => 2,
            Self::Rg32Uint | Self::Rgb32Uint | Self::Rgb32Float | Self::Rgba32Float => 4,
        }
    }

    /// Returns the size in bytes per texel.
    pub fn block_size(&self) -> u32 {
        self.components() * self.component_size()
    }

    /// Returns true if the channels are floats.
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Rgb32Float | Self::Rgba32Float)
    }

    /// The format name as WebGL2 spells it.
    pub fn gl_name(&self) -> &'static str {
        match self {
            Self::R16Uint => "R16UI",
            Self::Rg8Uint => "RG8UI",
            Self::Rg16Uint => "RG16UI",
            Self::Rg32Uint => "RG32UI",
            Self::Rgb8Uint => "RGB8UI",
            Self::Rgb16Uint => "RGB16UI",
            Self::Rgb32Uint => "RGB32UI",
            Self::Rgba8Uint => "RGBA8UI",
            Self::Rgb32Float => "RGB32F",
            Self::Rgba32Float => "RGBA32F",
        }
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be copied from.
        const COPY_SRC = 1 << 0;
        /// Texture can be copied to.
        const COPY_DST = 1 << 1;
        /// Texture can be sampled in a shader.
        const TEXTURE_BINDING = 1 << 2;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Size of the texture.
    pub size: Extent3d,
    /// Texture format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a new 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bytes in one row of texels.
    pub fn bytes_per_row(&self) -> u32 {
        self.size.width * self.format.block_size()
    }

    /// Total size of the texture contents in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.size.texel_count() * self.format.block_size() as u64
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            format: TextureFormat::default(),
            usage: TextureUsage::empty(),
        }
    }
}

/// A rectangular region of a 2D texture, in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureRegion {
    /// Left column.
    pub x: u32,
    /// Top row.
    pub y: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

impl TextureRegion {
    /// Create a region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A single row span starting at `(x, y)`.
    pub fn row_span(x: u32, y: u32, width: u32) -> Self {
        Self::new(x, y, width, 1)
    }

    /// The region covering a whole texture.
    pub fn full(size: Extent3d) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Number of texels in the region.
    pub fn texel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
