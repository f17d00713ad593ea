//! GPU textures of a built data-texture layer.
//!
//! A [`DataTextureSet`] is created once from a filled [`DataTextureBuffer`]
//! and never grows. Textures that change after build (attributes, instance
//! matrices, offsets) keep a host mirror so single texels can be patched and
//! the whole texture re-uploaded when batched writes are flushed.

use glam::{Mat4, Vec3};

use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, LayerError};
use crate::resources::Texture;
use crate::types::{TextureDescriptor, TextureFormat, TextureRegion, TextureUsage};

use super::bucket::{IndexWidth, PerWidth};
use super::config::{
    LayerConfig, SUB_MESHES_PER_ROW, TEXELS_PER_MATRIX, TEXELS_PER_SUB_MESH,
};
use super::texture_buffer::{DataTextureBuffer, SubMeshIndex, ATTRIBUTE_ROW_BYTES};

/// Whether a texel write goes to the GPU now or waits for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Upload the texels immediately.
    Immediate,
    /// Only update the mirror and mark the texture dirty.
    Deferred,
}

/// One data texture, optionally mirrored on the host.
pub struct DataTexture {
    texture: Texture,
    mirror: Option<Vec<u8>>,
    dirty: bool,
}

impl DataTexture {
    /// Create a texture of fixed `width` holding `num_texels` texels from `data`.
    ///
    /// The last row is zero-filled. With `mirrored` set the padded contents
    /// are kept on the host for later texel writes.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::EmptyTexture`] when `num_texels` is zero.
    pub fn new(
        device: &GraphicsDevice,
        label: &str,
        format: TextureFormat,
        width: u32,
        num_texels: u32,
        mut data: Vec<u8>,
        mirrored: bool,
    ) -> Result<Self, LayerError> {
        let height = num_texels.div_ceil(width);
        if height == 0 {
            return Err(LayerError::EmptyTexture {
                label: label.to_string(),
            });
        }

        let descriptor = TextureDescriptor::new_2d(
            width,
            height,
            format,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        )
        .with_label(label);
        data.resize(descriptor.size_bytes() as usize, 0);

        let texture = device.create_texture(&descriptor)?;
        device.write_texture(&texture, TextureRegion::full(descriptor.size), &data)?;

        log::trace!(
            "DataTexture: {label} {width}x{height} {} ({} bytes)",
            format.gl_name(),
            data.len()
        );

        Ok(Self {
            texture,
            mirror: mirrored.then_some(data),
            dirty: false,
        })
    }

    /// Create the texture only if there is something to store.
    pub fn new_optional(
        device: &GraphicsDevice,
        label: &str,
        format: TextureFormat,
        width: u32,
        num_texels: u32,
        data: Vec<u8>,
    ) -> Result<Option<Self>, LayerError> {
        if num_texels == 0 {
            return Ok(None);
        }
        Self::new(device, label, format, width, num_texels, data, false).map(Some)
    }

    /// The GPU texture.
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Width in texels.
    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    /// Height in rows.
    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Texel format.
    pub fn format(&self) -> TextureFormat {
        self.texture.format()
    }

    /// Size of the texture in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.texture.size_bytes()
    }

    /// Host copy of the contents, if mirrored.
    pub fn mirror(&self) -> Option<&[u8]> {
        self.mirror.as_deref()
    }

    /// The mirror holds writes the GPU has not seen.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read `len` bytes of the mirror starting at texel `(x, y)`.
    pub fn read_texels(&self, x: u32, y: u32, len: usize) -> Option<&[u8]> {
        let start = self.byte_offset(x, y);
        self.mirror.as_ref()?.get(start..start + len)
    }

    /// Write a run of texels within one row.
    ///
    /// An immediate write patches the mirror only after the upload succeeds.
    pub fn write_texels(
        &mut self,
        device: &GraphicsDevice,
        x: u32,
        y: u32,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), LayerError> {
        let start = self.byte_offset(x, y);
        let block_size = self.format().block_size() as usize;
        let Some(mirror) = self.mirror.as_mut() else {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} is not writable after build",
                self.texture.label()
            ))
            .into());
        };
        let Some(target) = mirror.get_mut(start..start + data.len()) else {
            return Err(GraphicsError::InvalidParameter(format!(
                "texel ({x}, {y}) outside texture {:?}",
                self.texture.label()
            ))
            .into());
        };
        match mode {
            WriteMode::Immediate => {
                let region = TextureRegion::row_span(x, y, (data.len() / block_size) as u32);
                device.write_texture(&self.texture, region, data)?;
            }
            WriteMode::Deferred => self.dirty = true,
        }
        target.copy_from_slice(data);
        Ok(())
    }

    /// Upload the whole mirror if it is dirty. Returns true if it uploaded.
    pub fn flush(&mut self, device: &GraphicsDevice) -> Result<bool, LayerError> {
        if !self.dirty {
            return Ok(false);
        }
        if let Some(mirror) = &self.mirror {
            device.write_texture(&self.texture, TextureRegion::full(self.texture.size()), mirror)?;
        }
        self.dirty = false;
        Ok(true)
    }

    fn byte_offset(&self, x: u32, y: u32) -> usize {
        let descriptor = self.texture.descriptor();
        y as usize * descriptor.bytes_per_row() as usize
            + x as usize * descriptor.format.block_size() as usize
    }
}

impl std::fmt::Debug for DataTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTexture")
            .field("texture", &self.texture)
            .field("mirrored", &self.mirror.is_some())
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Texel coordinates of a sub-mesh's first attribute texel.
pub fn attribute_texel(sub_mesh: SubMeshIndex) -> (u32, u32) {
    (
        (sub_mesh.0 % SUB_MESHES_PER_ROW) * TEXELS_PER_SUB_MESH,
        sub_mesh.0 / SUB_MESHES_PER_ROW,
    )
}

/// Texel coordinates of a sub-mesh's first matrix texel.
pub fn matrix_texel(sub_mesh: SubMeshIndex) -> (u32, u32) {
    (
        (sub_mesh.0 % SUB_MESHES_PER_ROW) * TEXELS_PER_MATRIX,
        sub_mesh.0 / SUB_MESHES_PER_ROW,
    )
}

/// Texel coordinates of a sub-mesh's offset texel.
pub fn offset_texel(sub_mesh: SubMeshIndex) -> (u32, u32) {
    (sub_mesh.0 % SUB_MESHES_PER_ROW, sub_mesh.0 / SUB_MESHES_PER_ROW)
}

/// Bytes of a matrix as four `Rgba32Float` texels, column-major.
pub fn matrix_bytes(matrix: &Mat4) -> [u8; 64] {
    bytemuck::cast(matrix.to_cols_array())
}

/// Bytes of an offset as one `Rgb32Float` texel.
pub fn offset_bytes(offset: Vec3) -> [u8; 12] {
    bytemuck::cast(offset.to_array())
}

/// All textures of a built data-texture layer.
#[derive(Debug)]
pub struct DataTextureSet {
    /// Per-sub-mesh attribute rows, `Rgba8Uint`.
    pub attributes: DataTexture,
    /// Quantized positions, `Rgb16Uint`.
    pub positions: DataTexture,
    /// Triangle indices, one texel per triangle.
    pub indices: PerWidth<Option<DataTexture>>,
    /// Edge indices, one texel per edge.
    pub edge_indices: PerWidth<Option<DataTexture>>,
    /// Sub-mesh id per block of triangle slots, `R16Uint`.
    pub triangle_sub_mesh_ids: PerWidth<Option<DataTexture>>,
    /// Sub-mesh id per block of edge slots, `R16Uint`.
    pub edge_sub_mesh_ids: PerWidth<Option<DataTexture>>,
    /// Positions decode matrices, `Rgba32Float`.
    pub decode_matrices: DataTexture,
    /// Instance matrices, `Rgba32Float`.
    pub instance_matrices: DataTexture,
    /// Offsets, `Rgb32Float`.
    pub offsets: DataTexture,
}

impl DataTextureSet {
    /// Upload every staging array of `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::EmptyTexture`] if the layer has no sub-meshes or
    /// no vertices, and device errors if a texture cannot be created.
    pub fn new(
        device: &GraphicsDevice,
        buffer: &DataTextureBuffer,
        config: &LayerConfig,
    ) -> Result<Self, LayerError> {
        let prefix = config.label.as_deref().unwrap_or("layer");
        let label = |name: &str| format!("{prefix}.{name}");
        let row_width = config.data_texture_width;
        let num_sub_meshes = buffer.num_sub_meshes();

        let attributes = DataTexture::new(
            device,
            &label("attributes"),
            TextureFormat::Rgba8Uint,
            SUB_MESHES_PER_ROW * TEXELS_PER_SUB_MESH,
            num_sub_meshes * TEXELS_PER_SUB_MESH,
            buffer.attributes.concat(),
            true,
        )?;

        let positions = DataTexture::new(
            device,
            &label("positions"),
            TextureFormat::Rgb16Uint,
            row_width,
            buffer.num_vertices(),
            bytemuck::cast_slice(&buffer.positions_compressed).to_vec(),
            false,
        )?;

        let stored_triangles = buffer.stored_triangles();
        let stored_edges = buffer.stored_edges();
        let indices = per_width_textures(|width| {
            DataTexture::new_optional(
                device,
                &label(&format!("indices{}", width.bits())),
                width.triangle_format(),
                row_width,
                *stored_triangles.get(width),
                width.encode(buffer.indices.get(width)),
            )
        })?;
        let edge_indices = per_width_textures(|width| {
            DataTexture::new_optional(
                device,
                &label(&format!("edgeIndices{}", width.bits())),
                width.edge_format(),
                row_width,
                *stored_edges.get(width),
                width.encode(buffer.edge_indices.get(width)),
            )
        })?;
        let triangle_sub_mesh_ids = per_width_textures(|width| {
            let ids = buffer.triangle_sub_mesh_ids.get(width);
            DataTexture::new_optional(
                device,
                &label(&format!("triangleIds{}", width.bits())),
                TextureFormat::R16Uint,
                row_width,
                ids.len() as u32,
                bytemuck::cast_slice(ids).to_vec(),
            )
        })?;
        let edge_sub_mesh_ids = per_width_textures(|width| {
            let ids = buffer.edge_sub_mesh_ids.get(width);
            DataTexture::new_optional(
                device,
                &label(&format!("edgeIds{}", width.bits())),
                TextureFormat::R16Uint,
                row_width,
                ids.len() as u32,
                bytemuck::cast_slice(ids).to_vec(),
            )
        })?;

        let matrix_texels = num_sub_meshes * TEXELS_PER_MATRIX;
        let matrix_row = SUB_MESHES_PER_ROW * TEXELS_PER_MATRIX;
        let decode_matrices = DataTexture::new(
            device,
            &label("decodeMatrices"),
            TextureFormat::Rgba32Float,
            matrix_row,
            matrix_texels,
            buffer.decode_matrices.iter().flat_map(matrix_bytes).collect(),
            false,
        )?;
        let instance_matrices = DataTexture::new(
            device,
            &label("instanceMatrices"),
            TextureFormat::Rgba32Float,
            matrix_row,
            matrix_texels,
            buffer.instance_matrices.iter().flat_map(matrix_bytes).collect(),
            true,
        )?;
        let offsets = DataTexture::new(
            device,
            &label("offsets"),
            TextureFormat::Rgb32Float,
            SUB_MESHES_PER_ROW,
            num_sub_meshes,
            buffer.offsets.iter().flat_map(|&o| offset_bytes(o)).collect(),
            true,
        )?;

        let set = Self {
            attributes,
            positions,
            indices,
            edge_indices,
            triangle_sub_mesh_ids,
            edge_sub_mesh_ids,
            decode_matrices,
            instance_matrices,
            offsets,
        };
        log::debug!(
            "DataTextureSet: {prefix} uploaded {num_sub_meshes} sub-meshes, {} vertices, {} bytes",
            buffer.num_vertices(),
            set.size_bytes()
        );
        Ok(set)
    }

    /// Every texture in the set.
    pub fn textures(&self) -> impl Iterator<Item = &DataTexture> {
        [
            Some(&self.attributes),
            Some(&self.positions),
            Some(&self.decode_matrices),
            Some(&self.instance_matrices),
            Some(&self.offsets),
        ]
        .into_iter()
        .chain(
            [
                &self.indices,
                &self.edge_indices,
                &self.triangle_sub_mesh_ids,
                &self.edge_sub_mesh_ids,
            ]
            .into_iter()
            .flat_map(|table| table.iter().map(|(_, texture)| texture.as_ref())),
        )
        .flatten()
    }

    /// Total GPU memory held by the set.
    pub fn size_bytes(&self) -> u64 {
        self.textures().map(DataTexture::size_bytes).sum()
    }

    /// Any mutable texture holds unflushed writes.
    pub fn is_dirty(&self) -> bool {
        self.attributes.is_dirty() || self.instance_matrices.is_dirty() || self.offsets.is_dirty()
    }

    /// Upload every dirty texture. Returns the number of uploads.
    pub fn flush(&mut self, device: &GraphicsDevice) -> Result<usize, LayerError> {
        let mut uploads = 0;
        for texture in [
            &mut self.attributes,
            &mut self.instance_matrices,
            &mut self.offsets,
        ] {
            if texture.flush(device)? {
                uploads += 1;
            }
        }
        Ok(uploads)
    }

    /// The attribute row of a sub-mesh, as mirrored on the host.
    pub fn attribute_row(&self, sub_mesh: SubMeshIndex) -> Option<&[u8]> {
        let (x, y) = attribute_texel(sub_mesh);
        self.attributes.read_texels(x, y, ATTRIBUTE_ROW_BYTES)
    }
}

fn per_width_textures(
    mut create: impl FnMut(IndexWidth) -> Result<Option<DataTexture>, LayerError>,
) -> Result<PerWidth<Option<DataTexture>>, LayerError> {
    Ok(PerWidth {
        bits8: create(IndexWidth::Bits8)?,
        bits16: create(IndexWidth::Bits16)?,
        bits32: create(IndexWidth::Bits32)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::bucket::GeometryBucket;
    use crate::layers::texture_buffer::SubMeshParams;

    fn filled_buffer(num_meshes: usize) -> DataTextureBuffer {
        let mut buffer = DataTextureBuffer::new();
        for _ in 0..num_meshes {
            let handle = buffer.append_bucket(&GeometryBucket {
                positions_compressed: vec![7; 12],
                indices: Some(vec![0, 1, 2, 0, 2, 3]),
                edge_indices: None,
            });
            buffer.append_sub_mesh(
                &handle,
                &SubMeshParams {
                    color: [255, 0, 0, 255],
                    pick_color: [0, 0, 0, 1],
                    solid: false,
                    decode_matrix: Mat4::IDENTITY,
                    instance_matrix: Mat4::IDENTITY,
                    offset: Vec3::ZERO,
                },
            )
            .unwrap();
        }
        buffer
    }

    #[test]
    fn test_texel_mapping() {
        assert_eq!(attribute_texel(SubMeshIndex(0)), (0, 0));
        assert_eq!(attribute_texel(SubMeshIndex(3)), (24, 0));
        assert_eq!(attribute_texel(SubMeshIndex(513)), (8, 1));
        assert_eq!(matrix_texel(SubMeshIndex(513)), (4, 1));
        assert_eq!(offset_texel(SubMeshIndex(1025)), (1, 2));
    }

    #[test]
    fn test_set_shapes() {
        let device = GraphicsDevice::dummy();
        let set = DataTextureSet::new(&device, &filled_buffer(3), &LayerConfig::default()).unwrap();

        assert_eq!(set.attributes.width(), 4096);
        assert_eq!(set.attributes.height(), 1);
        assert_eq!(set.positions.format(), TextureFormat::Rgb16Uint);
        assert!(set.indices.bits8.is_some());
        assert!(set.indices.bits16.is_none());
        assert!(set.edge_indices.bits8.is_none());
        assert_eq!(
            set.triangle_sub_mesh_ids.bits8.as_ref().map(|t| t.format()),
            Some(TextureFormat::R16Uint)
        );
        assert_eq!(set.decode_matrices.width(), 2048);
        assert_eq!(&set.attribute_row(SubMeshIndex(2)).unwrap()[0..4], &[255, 0, 0, 255]);
        assert!(set.size_bytes() > 0);
    }

    #[test]
    fn test_empty_buffer_fails_fast() {
        let device = GraphicsDevice::dummy();
        let err = DataTextureSet::new(&device, &DataTextureBuffer::new(), &LayerConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            LayerError::EmptyTexture {
                label: "layer.attributes".to_string()
            }
        );
    }

    #[test]
    fn test_deferred_write_then_flush() {
        let device = GraphicsDevice::dummy();
        let mut set =
            DataTextureSet::new(&device, &filled_buffer(1), &LayerConfig::default()).unwrap();
        let before = device.upload_stats().texture_writes;

        set.attributes
            .write_texels(&device, 2, 0, &[1, 0, 0, 11], WriteMode::Deferred)
            .unwrap();
        assert!(set.is_dirty());
        assert_eq!(device.upload_stats().texture_writes, before);

        assert_eq!(set.flush(&device).unwrap(), 1);
        assert!(!set.is_dirty());
        let uploaded = device.read_texture(set.attributes.texture()).unwrap();
        assert_eq!(&uploaded[8..12], &[1, 0, 0, 11]);
        assert_eq!(set.flush(&device).unwrap(), 0);
    }

    #[test]
    fn test_static_textures_reject_writes() {
        let device = GraphicsDevice::dummy();
        let mut set =
            DataTextureSet::new(&device, &filled_buffer(1), &LayerConfig::default()).unwrap();
        assert!(set
            .positions
            .write_texels(&device, 0, 0, &[0; 6], WriteMode::Immediate)
            .is_err());
    }
}
