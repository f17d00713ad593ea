//! GPU backend abstraction layer.
//!
//! Layers never talk to a GPU API directly. They go through a
//! [`GraphicsDevice`](crate::device::GraphicsDevice), which forwards to one of
//! the backends here.
//!
//! # Available Backends
//!
//! - `dummy` (always compiled): keeps texture and buffer contents in memory so
//!   uploads can be read back and compared in tests
//! - `wgpu-backend`: cross-platform backend using wgpu (WebGPU, WebGL2, Vulkan,
//!   Metal, DX12)

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub mod dummy;

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, TextureDescriptor, TextureRegion};

pub use dummy::DummyBackend;

use dummy::DummyStorage;

/// Handle to a GPU buffer resource.
#[derive(Clone)]
pub enum GpuBuffer {
    /// Dummy backend buffer (host memory)
    Dummy(Arc<DummyStorage>),
    /// wgpu backend buffer
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Buffer>),
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(storage) => f.debug_tuple("GpuBuffer::Dummy").field(storage).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(buffer) => f.debug_tuple("GpuBuffer::Wgpu").field(buffer).finish(),
        }
    }
}

/// Handle to a GPU texture resource.
#[derive(Clone)]
pub enum GpuTexture {
    /// Dummy backend texture (host memory)
    Dummy(Arc<DummyStorage>),
    /// wgpu backend texture
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        texture: Arc<wgpu::Texture>,
        view: Arc<wgpu::TextureView>,
    },
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(storage) => f.debug_tuple("GpuTexture::Dummy").field(storage).finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { texture, view } => f
                .debug_struct("GpuTexture::Wgpu")
                .field("texture", texture)
                .field("view", view)
                .finish(),
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Every call is synchronous from the caller's point of view. Backends may
/// queue the actual transfer, but a write is visible to the next draw.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture resource.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError>;

    /// Write data to a buffer.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
        -> Result<(), GraphicsError>;

    /// Write tightly packed texel data into a region of a texture.
    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), GraphicsError>;

    /// Read back the whole contents of a buffer.
    fn read_buffer(&self, buffer: &GpuBuffer) -> Result<Vec<u8>, GraphicsError>;

    /// Read back the whole contents of a texture, tightly packed.
    fn read_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
    ) -> Result<Vec<u8>, GraphicsError>;
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "wgpu-backend")]
    {
        match wgpu_backend::WgpuBackend::new() {
            Ok(backend) => {
                log::info!("Using wgpu backend");
                return Ok(Arc::new(backend));
            }
            Err(e) => {
                log::warn!("Failed to create wgpu backend: {}", e);
            }
        }
    }

    log::info!("Using dummy backend");
    Ok(Arc::new(dummy::DummyBackend::new()))
}

/// Check if a real GPU backend is available.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "wgpu-backend")
}
