//! Graphics device.
//!
//! The [`GraphicsDevice`] is the interface layers use to create and fill GPU
//! resources. It validates every request before forwarding it to the backend
//! and keeps running totals of uploads, which is how the cost of a layer's
//! update policy becomes visible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::dummy::DummyBackend;
use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureRegion};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum texture dimension.
    pub max_texture_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension: 1 << 16,
            max_buffer_size: 1 << 30, // 1 GB
        }
    }
}

/// Totals of the data sent to the GPU since the device was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UploadStats {
    /// Number of texture write calls.
    pub texture_writes: u64,
    /// Bytes written to textures.
    pub texture_bytes: u64,
    /// Number of buffer write calls.
    pub buffer_writes: u64,
    /// Bytes written to buffers.
    pub buffer_bytes: u64,
}

/// A graphics device for creating GPU resources.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. The statistics use atomics; everything
/// else is immutable after creation.
pub struct GraphicsDevice {
    backend: Arc<dyn GpuBackend>,
    capabilities: DeviceCapabilities,
    texture_writes: AtomicU64,
    texture_bytes: AtomicU64,
    buffer_writes: AtomicU64,
    buffer_bytes: AtomicU64,
}

impl GraphicsDevice {
    /// Create a device on top of a backend.
    pub fn new(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        Self::with_capabilities(backend, DeviceCapabilities::default())
    }

    /// Create a device with explicit limits.
    pub fn with_capabilities(
        backend: Arc<dyn GpuBackend>,
        capabilities: DeviceCapabilities,
    ) -> Arc<Self> {
        log::debug!(
            "GraphicsDevice: using {} (max texture dimension {})",
            backend.name(),
            capabilities.max_texture_dimension
        );
        Arc::new(Self {
            backend,
            capabilities,
            texture_writes: AtomicU64::new(0),
            texture_bytes: AtomicU64::new(0),
            buffer_writes: AtomicU64::new(0),
            buffer_bytes: AtomicU64::new(0),
        })
    }

    /// Create a device backed by host memory.
    pub fn dummy() -> Arc<Self> {
        Self::new(Arc::new(DummyBackend::new()))
    }

    /// Get the backend name.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get the device capabilities.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Snapshot of the upload totals.
    pub fn upload_stats(&self) -> UploadStats {
        UploadStats {
            texture_writes: self.texture_writes.load(Ordering::Relaxed),
            texture_bytes: self.texture_bytes.load(Ordering::Relaxed),
            buffer_writes: self.buffer_writes.load(Ordering::Relaxed),
            buffer_bytes: self.buffer_bytes.load(Ordering::Relaxed),
        }
    }

    /// Create a GPU texture.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is zero or exceeds device limits.
    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Texture, GraphicsError> {
        let max_dim = self.capabilities.max_texture_dimension;
        if descriptor.size.width > max_dim || descriptor.size.height > max_dim {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} dimension exceeds maximum {max_dim}",
                descriptor.label
            )));
        }

        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} dimensions cannot be zero",
                descriptor.label
            )));
        }

        let gpu = self.backend.create_texture(descriptor)?;

        log::trace!(
            "GraphicsDevice: created texture {:?}, size={}x{} {}",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format.gl_name()
        );

        Ok(Texture::new(descriptor.clone(), gpu))
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or exceeds device limits.
    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Buffer, GraphicsError> {
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let gpu = self.backend.create_buffer(descriptor)?;

        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );

        Ok(Buffer::new(descriptor.clone(), gpu))
    }

    /// Create a buffer and upload its initial contents.
    pub fn create_buffer_init(
        &self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<Buffer, GraphicsError> {
        let descriptor = BufferDescriptor {
            size: data.len() as u64,
            usage: descriptor.usage | BufferUsage::COPY_DST,
            ..descriptor.clone()
        };
        let buffer = self.create_buffer(&descriptor)?;
        self.write_buffer(&buffer, 0, data)?;
        Ok(buffer)
    }

    /// Write tightly packed texels into a region of a texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the region falls outside the texture or the data
    /// length does not match the region.
    pub fn write_texture(
        &self,
        texture: &Texture,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let descriptor = texture.descriptor();
        if region.x + region.width > descriptor.size.width
            || region.y + region.height > descriptor.size.height
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "region {region:?} outside texture {:?} ({}x{})",
                descriptor.label, descriptor.size.width, descriptor.size.height
            )));
        }

        let expected = region.texel_count() * descriptor.format.block_size() as u64;
        if data.len() as u64 != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture write of {} bytes, region needs {expected}",
                data.len()
            )));
        }

        self.backend
            .write_texture(texture.gpu(), descriptor, region, data)?;
        self.texture_writes.fetch_add(1, Ordering::Relaxed);
        self.texture_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Write data into a buffer at a byte offset.
    pub fn write_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        if offset + data.len() as u64 > buffer.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {offset} overflows buffer {:?} of {} bytes",
                data.len(),
                buffer.label(),
                buffer.size()
            )));
        }

        self.backend.write_buffer(buffer.gpu(), offset, data)?;
        self.buffer_writes.fetch_add(1, Ordering::Relaxed);
        self.buffer_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read back a texture's contents.
    ///
    /// Only backends that keep host copies support this.
    pub fn read_texture(&self, texture: &Texture) -> Result<Vec<u8>, GraphicsError> {
        self.backend.read_texture(texture.gpu(), texture.descriptor())
    }

    /// Read back a buffer's contents.
    pub fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, GraphicsError> {
        self.backend.read_buffer(buffer.gpu())
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("capabilities", &self.capabilities)
            .field("uploads", &self.upload_stats())
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
