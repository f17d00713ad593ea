//! CPU staging for a data-texture layer.
//!
//! Everything a layer will upload accumulates here while meshes are added.
//! Nothing touches the GPU until the buffer is handed to
//! [`DataTextureSet::new`](super::DataTextureSet::new).
//!
//! Triangles and edges are addressed two ways. *Storage* is where a bucket's
//! indices live in the index textures, written once per bucket even when many
//! meshes share it. *Slots* are what draw calls iterate over: every sub-mesh
//! gets its own aligned run of slots and one id-table entry per block of
//! [`INDEX_ALIGNMENT_BLOCK`] slots. The attribute row stores
//! `slot_base - storage_base` so a shader can get from one to the other.

use glam::{Mat4, Vec3};

use crate::error::LayerError;

use super::bucket::{align_to_block, pad_to_block, BucketHandle, GeometryBucket, PerWidth};
use super::config::INDEX_ALIGNMENT_BLOCK;

/// Bytes in one sub-mesh attribute row.
pub const ATTRIBUTE_ROW_BYTES: usize = 32;

/// Byte offsets within an attribute row.
pub mod row {
    /// Object color, RGBA.
    pub const COLOR: usize = 0;
    /// Pick color, RGBA.
    pub const PICK_COLOR: usize = 4;
    /// Color, silhouette, edges and pick pass codes.
    pub const PASSES: usize = 8;
    /// Clippable flag followed by three reserved bytes.
    pub const SECONDARY: usize = 12;
    /// Vertex base, big-endian.
    pub const VERTEX_BASE: usize = 16;
    /// Triangle slot-to-storage offset, big-endian.
    pub const INDEX_BASE: usize = 20;
    /// Edge slot-to-storage offset, big-endian.
    pub const EDGE_INDEX_BASE: usize = 24;
    /// Solid flag.
    pub const SOLID: usize = 28;
}

/// Dense index of a sub-mesh within a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubMeshIndex(pub u32);

impl SubMeshIndex {
    /// Index as `usize`.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-sub-mesh values written into the staging arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubMeshParams {
    /// Object color.
    pub color: [u8; 4],
    /// Pick color.
    pub pick_color: [u8; 4],
    /// Back faces are never visible.
    pub solid: bool,
    /// Positions decode matrix.
    pub decode_matrix: Mat4,
    /// Instance matrix.
    pub instance_matrix: Mat4,
    /// Offset.
    pub offset: Vec3,
}

/// Build the 32-byte attribute row of a sub-mesh.
///
/// Pass codes and the clippable byte start at zero (not rendered, not
/// clippable); they are written once flags are set.
pub fn attribute_row(
    params: &SubMeshParams,
    vertex_base: u32,
    index_base_offset: u32,
    edge_index_base_offset: u32,
) -> [u8; ATTRIBUTE_ROW_BYTES] {
    let mut bytes = [0; ATTRIBUTE_ROW_BYTES];
    bytes[row::COLOR..row::COLOR + 4].copy_from_slice(&params.color);
    bytes[row::PICK_COLOR..row::PICK_COLOR + 4].copy_from_slice(&params.pick_color);
    bytes[row::VERTEX_BASE..row::VERTEX_BASE + 4].copy_from_slice(&vertex_base.to_be_bytes());
    bytes[row::INDEX_BASE..row::INDEX_BASE + 4].copy_from_slice(&index_base_offset.to_be_bytes());
    bytes[row::EDGE_INDEX_BASE..row::EDGE_INDEX_BASE + 4]
        .copy_from_slice(&edge_index_base_offset.to_be_bytes());
    bytes[row::SOLID] = params.solid as u8;
    bytes
}

/// Staging arrays of a data-texture layer.
#[derive(Debug, Clone, Default)]
pub struct DataTextureBuffer {
    pub(crate) positions_compressed: Vec<u16>,
    pub(crate) indices: PerWidth<Vec<u32>>,
    pub(crate) edge_indices: PerWidth<Vec<u32>>,
    pub(crate) triangle_slots: PerWidth<u32>,
    pub(crate) edge_slots: PerWidth<u32>,
    pub(crate) triangle_sub_mesh_ids: PerWidth<Vec<u16>>,
    pub(crate) edge_sub_mesh_ids: PerWidth<Vec<u16>>,
    pub(crate) live_indices: PerWidth<u32>,
    pub(crate) live_edge_indices: PerWidth<u32>,
    pub(crate) attributes: Vec<[u8; ATTRIBUTE_ROW_BYTES]>,
    pub(crate) decode_matrices: Vec<Mat4>,
    pub(crate) instance_matrices: Vec<Mat4>,
    pub(crate) offsets: Vec<Vec3>,
}

impl DataTextureBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vertices.
    pub fn num_vertices(&self) -> u32 {
        (self.positions_compressed.len() / 3) as u32
    }

    /// Number of sub-meshes.
    pub fn num_sub_meshes(&self) -> u32 {
        self.attributes.len() as u32
    }

    /// Stored triangles per width, including padding.
    pub fn stored_triangles(&self) -> PerWidth<u32> {
        self.indices.map(|_, indices| (indices.len() / 3) as u32)
    }

    /// Stored edges per width, including padding.
    pub fn stored_edges(&self) -> PerWidth<u32> {
        self.edge_indices.map(|_, edges| (edges.len() / 2) as u32)
    }

    /// Triangle slots per width.
    pub fn triangle_slots(&self) -> PerWidth<u32> {
        self.triangle_slots
    }

    /// Edge slots per width.
    pub fn edge_slots(&self) -> PerWidth<u32> {
        self.edge_slots
    }

    /// Live triangle index components per width.
    pub fn live_indices(&self) -> PerWidth<u32> {
        self.live_indices
    }

    /// Live edge index components per width.
    pub fn live_edge_indices(&self) -> PerWidth<u32> {
        self.live_edge_indices
    }

    /// Append a bucket's positions and indices, returning where they landed.
    pub fn append_bucket(&mut self, bucket: &GeometryBucket) -> BucketHandle {
        let width = bucket.width();
        let vertex_base = self.num_vertices();
        self.positions_compressed
            .extend_from_slice(&bucket.positions_compressed);

        let indices = self.indices.get_mut(width);
        let index_base = (indices.len() / 3) as u32;
        if let Some(bucket_indices) = &bucket.indices {
            indices.extend_from_slice(bucket_indices);
            pad_to_block(indices, 3);
        }

        let edges = self.edge_indices.get_mut(width);
        let edge_index_base = (edges.len() / 2) as u32;
        if let Some(bucket_edges) = &bucket.edge_indices {
            edges.extend_from_slice(bucket_edges);
            pad_to_block(edges, 2);
        }

        BucketHandle {
            width,
            vertex_base,
            num_vertices: bucket.num_vertices() as u32,
            index_base,
            num_triangles: bucket.num_triangles() as u32,
            edge_index_base,
            num_edges: bucket.num_edges() as u32,
        }
    }

    /// Append a sub-mesh drawing a stored bucket.
    ///
    /// Allocates its triangle and edge slots, fills the id tables and pushes
    /// its attribute row and matrices.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::CapacityExceeded`] once the 16-bit id tables
    /// are full. The buffer is left untouched.
    pub fn append_sub_mesh(
        &mut self,
        bucket: &BucketHandle,
        params: &SubMeshParams,
    ) -> Result<SubMeshIndex, LayerError> {
        let sub_mesh = SubMeshIndex(self.num_sub_meshes());
        let id = u16::try_from(sub_mesh.0).map_err(|_| {
            LayerError::CapacityExceeded(format!(
                "sub-mesh {} does not fit a 16-bit id table",
                sub_mesh.0
            ))
        })?;
        let width = bucket.width;
        let blocks = |slots: u32| (slots / INDEX_ALIGNMENT_BLOCK) as usize;

        let triangle_slot_base = *self.triangle_slots.get(width);
        let triangle_slots = align_to_block(bucket.num_triangles);
        *self.triangle_slots.get_mut(width) += triangle_slots;
        self.triangle_sub_mesh_ids
            .get_mut(width)
            .extend(std::iter::repeat(id).take(blocks(triangle_slots)));
        *self.live_indices.get_mut(width) += bucket.num_triangles * 3;

        let edge_slot_base = *self.edge_slots.get(width);
        let edge_slots = align_to_block(bucket.num_edges);
        *self.edge_slots.get_mut(width) += edge_slots;
        self.edge_sub_mesh_ids
            .get_mut(width)
            .extend(std::iter::repeat(id).take(blocks(edge_slots)));
        *self.live_edge_indices.get_mut(width) += bucket.num_edges * 2;

        self.attributes.push(attribute_row(
            params,
            bucket.vertex_base,
            triangle_slot_base - bucket.index_base,
            edge_slot_base - bucket.edge_index_base,
        ));
        self.decode_matrices.push(params.decode_matrix);
        self.instance_matrices.push(params.instance_matrix);
        self.offsets.push(params.offset);
        Ok(sub_mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> GeometryBucket {
        GeometryBucket {
            positions_compressed: (0..12).collect(),
            indices: Some(vec![0, 1, 2, 0, 2, 3]),
            edge_indices: Some(vec![0, 1, 1, 2, 2, 3]),
        }
    }

    fn params() -> SubMeshParams {
        SubMeshParams {
            color: [1, 2, 3, 4],
            pick_color: [5, 6, 7, 8],
            solid: true,
            decode_matrix: Mat4::IDENTITY,
            instance_matrix: Mat4::IDENTITY,
            offset: Vec3::ZERO,
        }
    }

    #[test]
    fn test_attribute_row_layout() {
        let bytes = attribute_row(&params(), 0x01020304, 8, 0x100);
        assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[4..8], &[5, 6, 7, 8]);
        assert_eq!(&bytes[8..16], &[0; 8]);
        assert_eq!(&bytes[16..20], &[1, 2, 3, 4]);
        assert_eq!(&bytes[20..24], &[0, 0, 0, 8]);
        assert_eq!(&bytes[24..28], &[0, 0, 1, 0]);
        assert_eq!(&bytes[28..32], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_append_pads_storage() {
        let mut buffer = DataTextureBuffer::new();
        let handle = buffer.append_bucket(&quad());
        assert_eq!(handle.vertex_base, 0);
        assert_eq!(handle.index_base, 0);
        assert_eq!(buffer.indices.bits8.len(), 24);
        assert_eq!(buffer.edge_indices.bits8.len(), 16);
        assert!(buffer.indices.bits8[6..].iter().all(|&i| i == 0));

        let second = buffer.append_bucket(&quad());
        assert_eq!(second.vertex_base, 4);
        assert_eq!(second.index_base, 8);
        assert_eq!(second.edge_index_base, 8);
        assert_eq!(buffer.num_vertices(), 8);
    }

    #[test]
    fn test_shared_bucket_gets_own_slots() {
        let mut buffer = DataTextureBuffer::new();
        let handle = buffer.append_bucket(&quad());
        let first = buffer.append_sub_mesh(&handle, &params()).unwrap();
        let second = buffer.append_sub_mesh(&handle, &params()).unwrap();

        assert_eq!(first, SubMeshIndex(0));
        assert_eq!(second, SubMeshIndex(1));
        assert_eq!(buffer.triangle_slots().bits8, 16);
        assert_eq!(buffer.stored_triangles().bits8, 8);
        assert_eq!(buffer.triangle_sub_mesh_ids.bits8, vec![0, 1]);
        assert_eq!(buffer.live_indices().bits8, 12);
        assert_eq!(buffer.live_edge_indices().bits8, 12);

        // Second sub-mesh's slots start 8 triangles past the shared storage.
        let attributes = &buffer.attributes[1];
        assert_eq!(&attributes[row::INDEX_BASE..row::INDEX_BASE + 4], &[0, 0, 0, 8]);
        assert_eq!(&attributes[row::VERTEX_BASE..row::VERTEX_BASE + 4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_sub_mesh_ids_stop_at_u16() {
        let mut buffer = DataTextureBuffer::new();
        let handle = buffer.append_bucket(&quad());
        buffer
            .attributes
            .resize(u16::MAX as usize, [0; ATTRIBUTE_ROW_BYTES]);

        let last = buffer.append_sub_mesh(&handle, &params()).unwrap();
        assert_eq!(last, SubMeshIndex(65535));
        assert_eq!(buffer.triangle_sub_mesh_ids.bits8, vec![65535]);

        let err = buffer.append_sub_mesh(&handle, &params()).unwrap_err();
        assert!(matches!(err, LayerError::CapacityExceeded(_)));
        assert_eq!(buffer.num_sub_meshes(), 65536);
        assert_eq!(buffer.triangle_slots().bits8, 8);
        assert_eq!(buffer.triangle_sub_mesh_ids.bits8, vec![65535]);
    }
}
