//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. Every texture and buffer is a block of
//! host memory, so whatever a layer uploads can be read back byte for byte.

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, TextureDescriptor, TextureRegion};

use super::{GpuBackend, GpuBuffer, GpuTexture};

/// Host memory standing in for a GPU allocation.
pub struct DummyStorage {
    bytes: Mutex<Vec<u8>>,
}

impl DummyStorage {
    fn zeroed(size: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size]),
        }
    }

    /// Size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    /// Returns true if the allocation holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl std::fmt::Debug for DummyStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyStorage")
            .field("len", &self.len())
            .finish()
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend;

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        let size = usize::try_from(descriptor.size).map_err(|_| GraphicsError::OutOfMemory)?;
        Ok(GpuBuffer::Dummy(DummyStorage::zeroed(size).into()))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{} {})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format.gl_name()
        );
        let size =
            usize::try_from(descriptor.size_bytes()).map_err(|_| GraphicsError::OutOfMemory)?;
        Ok(GpuTexture::Dummy(DummyStorage::zeroed(size).into()))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        let GpuBuffer::Dummy(storage) = buffer else {
            return Err(GraphicsError::InvalidParameter(
                "buffer does not belong to the dummy backend".to_string(),
            ));
        };
        let mut bytes = storage.bytes.lock();
        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} overflows buffer of {} bytes",
                data.len(),
                offset,
                bytes.len()
            )));
        }
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        log::trace!(
            "DummyBackend: write_texture {:?} at ({}, {}) {}x{} len={}",
            descriptor.label,
            region.x,
            region.y,
            region.width,
            region.height,
            data.len()
        );
        let GpuTexture::Dummy(storage) = texture else {
            return Err(GraphicsError::InvalidParameter(
                "texture does not belong to the dummy backend".to_string(),
            ));
        };
        let block_size = descriptor.format.block_size() as usize;
        let texture_row = descriptor.bytes_per_row() as usize;
        let region_row = region.width as usize * block_size;
        let mut bytes = storage.bytes.lock();
        for (row, src) in data.chunks_exact(region_row).enumerate() {
            let start = (region.y as usize + row) * texture_row + region.x as usize * block_size;
            bytes[start..start + region_row].copy_from_slice(src);
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer) -> Result<Vec<u8>, GraphicsError> {
        match buffer {
            GpuBuffer::Dummy(storage) => Ok(storage.snapshot()),
            #[cfg(feature = "wgpu-backend")]
            GpuBuffer::Wgpu(_) => Err(GraphicsError::InvalidParameter(
                "buffer does not belong to the dummy backend".to_string(),
            )),
        }
    }

    fn read_texture(
        &self,
        texture: &GpuTexture,
        _descriptor: &TextureDescriptor,
    ) -> Result<Vec<u8>, GraphicsError> {
        match texture {
            GpuTexture::Dummy(storage) => Ok(storage.snapshot()),
            #[cfg(feature = "wgpu-backend")]
            GpuTexture::Wgpu { .. } => Err(GraphicsError::InvalidParameter(
                "texture does not belong to the dummy backend".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, TextureFormat, TextureUsage};

    #[test]
    fn test_texture_region_write() {
        let backend = DummyBackend::new();
        let desc =
            TextureDescriptor::new_2d(4, 2, TextureFormat::Rgba8Uint, TextureUsage::COPY_DST);
        let texture = backend.create_texture(&desc).unwrap();

        backend
            .write_texture(&texture, &desc, TextureRegion::row_span(2, 1, 1), &[1, 2, 3, 4])
            .unwrap();

        let bytes = backend.read_texture(&texture, &desc).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[24..28], &[1, 2, 3, 4]);
        assert!(bytes[..24].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_write_overflow() {
        let backend = DummyBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::VERTEX))
            .unwrap();
        assert!(backend.write_buffer(&buffer, 4, &[0; 4]).is_ok());
        assert!(backend.write_buffer(&buffer, 6, &[0; 4]).is_err());
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
