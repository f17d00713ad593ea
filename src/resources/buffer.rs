//! GPU buffer resource.

use crate::backend::GpuBuffer;
use crate::types::BufferDescriptor;

/// A GPU buffer resource.
///
/// Buffers are created by
/// [`GraphicsDevice::create_buffer`](crate::device::GraphicsDevice::create_buffer)
/// and owned by exactly one layer.
pub struct Buffer {
    descriptor: BufferDescriptor,
    gpu: GpuBuffer,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(descriptor: BufferDescriptor, gpu: GpuBuffer) -> Self {
        Self { descriptor, gpu }
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the backend handle.
    pub fn gpu(&self) -> &GpuBuffer {
        &self.gpu
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);
