//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for cross-platform GPU access, supporting
//! WebGPU and WebGL2 in the browser and Vulkan, Metal and DX12 natively.
//!
//! wgpu has no 3-channel texture formats. Textures described as `Rgb*` are
//! created with the matching 4-channel format and every uploaded texel is
//! widened with a zero fourth channel, so shaders still read the same values
//! from `.rgb`.

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureRegion, TextureUsage,
};

use super::{GpuBackend, GpuBuffer, GpuTexture};

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .finish()
    }
}

impl WgpuBackend {
    /// Create a new wgpu backend.
    pub fn new() -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("No compatible GPU adapter: {e}"))
        })?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        // Data textures can be up to 65536 rows tall, so ask for what the adapter has.
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Scene Layers Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GraphicsError::InitializationFailed(format!("Device creation failed: {e}")))?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: align_to_copy(descriptor.size),
            usage: convert_buffer_usage(descriptor.usage),
            mapped_at_creation: false,
        });

        Ok(GpuBuffer::Wgpu(Arc::new(buffer)))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GraphicsError> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.size.width,
                height: descriptor.size.height,
                depth_or_array_layers: descriptor.size.depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert_texture_format(descriptor.format),
            usage: convert_texture_usage(descriptor.usage),
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(GpuTexture::Wgpu {
            texture: Arc::new(texture),
            view: Arc::new(view),
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuBuffer::Wgpu(wgpu_buffer) = buffer else {
            return Err(GraphicsError::InvalidParameter(
                "buffer does not belong to the wgpu backend".to_string(),
            ));
        };
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(wgpu_buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align_to_copy(data.len() as u64) as usize, 0);
            self.queue.write_buffer(wgpu_buffer, offset, &padded);
        }
        Ok(())
    }

    fn write_texture(
        &self,
        texture: &GpuTexture,
        descriptor: &TextureDescriptor,
        region: TextureRegion,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let GpuTexture::Wgpu {
            texture: wgpu_texture,
            ..
        } = texture
        else {
            return Err(GraphicsError::InvalidParameter(
                "texture does not belong to the wgpu backend".to_string(),
            ));
        };

        let format = descriptor.format;
        let (data, block_size) = if format.components() == 3 {
            (
                expand_rgb_to_rgba(data, format.component_size() as usize),
                4 * format.component_size(),
            )
        } else {
            (data.to_vec(), format.block_size())
        };

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: wgpu_texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * block_size),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }

    fn read_buffer(&self, _buffer: &GpuBuffer) -> Result<Vec<u8>, GraphicsError> {
        Err(GraphicsError::FeatureNotSupported(
            "buffer readback on the wgpu backend".to_string(),
        ))
    }

    fn read_texture(
        &self,
        _texture: &GpuTexture,
        _descriptor: &TextureDescriptor,
    ) -> Result<Vec<u8>, GraphicsError> {
        Err(GraphicsError::FeatureNotSupported(
            "texture readback on the wgpu backend".to_string(),
        ))
    }
}

fn align_to_copy(size: u64) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    size.div_ceil(align) * align
}

/// Widen tightly packed 3-channel texels to 4 channels with a zero alpha.
fn expand_rgb_to_rgba(data: &[u8], component_size: usize) -> Vec<u8> {
    let texel = 3 * component_size;
    let mut out = Vec::with_capacity(data.len() / 3 * 4);
    for src in data.chunks_exact(texel) {
        out.extend_from_slice(src);
        out.extend(std::iter::repeat(0).take(component_size));
    }
    out
}

/// Convert TextureFormat to wgpu format.
pub fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R16Uint => wgpu::TextureFormat::R16Uint,
        TextureFormat::Rg8Uint => wgpu::TextureFormat::Rg8Uint,
        TextureFormat::Rg16Uint => wgpu::TextureFormat::Rg16Uint,
        TextureFormat::Rg32Uint => wgpu::TextureFormat::Rg32Uint,
        TextureFormat::Rgb8Uint | TextureFormat::Rgba8Uint => wgpu::TextureFormat::Rgba8Uint,
        TextureFormat::Rgb16Uint => wgpu::TextureFormat::Rgba16Uint,
        TextureFormat::Rgb32Uint => wgpu::TextureFormat::Rgba32Uint,
        TextureFormat::Rgb32Float | TextureFormat::Rgba32Float => {
            wgpu::TextureFormat::Rgba32Float
        }
    }
}

/// Convert TextureUsage flags to wgpu texture usages.
pub fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut result = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        result |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= wgpu::TextureUsages::COPY_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    result
}

/// Convert BufferUsage flags to wgpu buffer usages.
pub fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        result |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= wgpu::BufferUsages::COPY_DST;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_rgb16() {
        let data = [1u8, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0];
        let out = expand_rgb_to_rgba(&data, 2);
        assert_eq!(out, vec![1, 0, 2, 0, 3, 0, 0, 0, 4, 0, 5, 0, 6, 0, 0, 0]);
    }

    #[test]
    fn test_format_mapping() {
        assert_eq!(
            convert_texture_format(TextureFormat::Rgb16Uint),
            wgpu::TextureFormat::Rgba16Uint
        );
        assert_eq!(
            convert_texture_format(TextureFormat::R16Uint),
            wgpu::TextureFormat::R16Uint
        );
    }
}
