//! Geometry buckets and index width selection.
//!
//! A bucket is a self-contained slice of a geometry: its own positions and
//! indices that only reference those positions. Splitting a large geometry
//! into buckets lets each bucket store its indices in the narrowest integer
//! type its vertex count allows.

use std::collections::HashMap;

use crate::types::TextureFormat;

use super::config::INDEX_ALIGNMENT_BLOCK;

/// Width of the integers an index array is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexWidth {
    /// `u8` indices, up to 256 vertices.
    Bits8,
    /// `u16` indices, up to 65536 vertices.
    Bits16,
    /// `u32` indices.
    Bits32,
}

impl IndexWidth {
    /// All widths, narrowest first.
    pub const ALL: [IndexWidth; 3] = [Self::Bits8, Self::Bits16, Self::Bits32];

    /// The narrowest width whose values can address `num_vertices` vertices.
    ///
    /// Both boundaries round down: exactly 256 vertices still fit 8 bits and
    /// exactly 65536 still fit 16 bits.
    pub fn for_vertex_count(num_vertices: usize) -> Self {
        if num_vertices <= 1 << 8 {
            Self::Bits8
        } else if num_vertices <= 1 << 16 {
            Self::Bits16
        } else {
            Self::Bits32
        }
    }

    /// Bits per index.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }

    /// Bytes per index.
    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Texture format holding one triangle (three indices) per texel.
    pub fn triangle_format(self) -> TextureFormat {
        match self {
            Self::Bits8 => TextureFormat::Rgb8Uint,
            Self::Bits16 => TextureFormat::Rgb16Uint,
            Self::Bits32 => TextureFormat::Rgb32Uint,
        }
    }

    /// Texture format holding one edge (two indices) per texel.
    pub fn edge_format(self) -> TextureFormat {
        match self {
            Self::Bits8 => TextureFormat::Rg8Uint,
            Self::Bits16 => TextureFormat::Rg16Uint,
            Self::Bits32 => TextureFormat::Rg32Uint,
        }
    }

    /// Narrow indices to this width, little-endian.
    ///
    /// Values must already fit; callers pick the width from the vertex count.
    pub fn encode(self, indices: &[u32]) -> Vec<u8> {
        match self {
            Self::Bits8 => indices.iter().map(|&i| i as u8).collect(),
            Self::Bits16 => indices
                .iter()
                .flat_map(|&i| (i as u16).to_le_bytes())
                .collect(),
            Self::Bits32 => bytemuck::cast_slice(indices).to_vec(),
        }
    }
}

impl std::fmt::Display for IndexWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// One value per index width.
///
/// Layers keep every index channel three times, once per width. This table
/// replaces three parallel fields with one generic container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PerWidth<T> {
    /// Value for 8-bit indices.
    pub bits8: T,
    /// Value for 16-bit indices.
    pub bits16: T,
    /// Value for 32-bit indices.
    pub bits32: T,
}

impl<T> PerWidth<T> {
    /// Build a table from a function of the width.
    pub fn from_fn(mut f: impl FnMut(IndexWidth) -> T) -> Self {
        Self {
            bits8: f(IndexWidth::Bits8),
            bits16: f(IndexWidth::Bits16),
            bits32: f(IndexWidth::Bits32),
        }
    }

    /// Value for a width.
    pub fn get(&self, width: IndexWidth) -> &T {
        match width {
            IndexWidth::Bits8 => &self.bits8,
            IndexWidth::Bits16 => &self.bits16,
            IndexWidth::Bits32 => &self.bits32,
        }
    }

    /// Mutable value for a width.
    pub fn get_mut(&mut self, width: IndexWidth) -> &mut T {
        match width {
            IndexWidth::Bits8 => &mut self.bits8,
            IndexWidth::Bits16 => &mut self.bits16,
            IndexWidth::Bits32 => &mut self.bits32,
        }
    }

    /// Iterate over `(width, value)` pairs, narrowest first.
    pub fn iter(&self) -> impl Iterator<Item = (IndexWidth, &T)> {
        IndexWidth::ALL.into_iter().map(move |width| (width, self.get(width)))
    }

    /// Apply a function to every value.
    pub fn map<U>(&self, mut f: impl FnMut(IndexWidth, &T) -> U) -> PerWidth<U> {
        PerWidth::from_fn(|width| f(width, self.get(width)))
    }
}

/// Round a primitive count up to a whole number of id-table blocks.
pub fn align_to_block(num_primitives: u32) -> u32 {
    num_primitives.div_ceil(INDEX_ALIGNMENT_BLOCK) * INDEX_ALIGNMENT_BLOCK
}

/// Pad a flat index array with zeros to a whole number of blocks of
/// `components`-index primitives.
pub fn pad_to_block(indices: &mut Vec<u32>, components: usize) {
    let block = INDEX_ALIGNMENT_BLOCK as usize * components;
    let padded = indices.len().div_ceil(block) * block;
    indices.resize(padded, 0);
}

/// A self-contained range of a geometry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeometryBucket {
    /// Quantized positions, three per vertex.
    pub positions_compressed: Vec<u16>,
    /// Triangle indices local to this bucket.
    pub indices: Option<Vec<u32>>,
    /// Edge indices local to this bucket.
    pub edge_indices: Option<Vec<u32>>,
}

impl GeometryBucket {
    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.positions_compressed.len() / 3
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.indices.as_ref().map_or(0, |indices| indices.len() / 3)
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edge_indices.as_ref().map_or(0, |edges| edges.len() / 2)
    }

    /// Index width this bucket is stored with.
    pub fn width(&self) -> IndexWidth {
        IndexWidth::for_vertex_count(self.num_vertices())
    }
}

/// Bucket under construction, remapping source vertices to local ones.
struct BucketBuilder<'a> {
    source: &'a [u16],
    remap: HashMap<u32, u32>,
    positions: Vec<u16>,
    indices: Vec<u32>,
    edge_indices: Vec<u32>,
}

impl<'a> BucketBuilder<'a> {
    fn new(source: &'a [u16]) -> Self {
        Self {
            source,
            remap: HashMap::new(),
            positions: Vec::new(),
            indices: Vec::new(),
            edge_indices: Vec::new(),
        }
    }

    fn num_vertices(&self) -> usize {
        self.positions.len() / 3
    }

    fn missing(&self, vertices: &[u32]) -> usize {
        let mut missing = 0;
        for (i, vertex) in vertices.iter().enumerate() {
            if !self.remap.contains_key(vertex) && !vertices[..i].contains(vertex) {
                missing += 1;
            }
        }
        missing
    }

    fn contains_all(&self, vertices: &[u32]) -> bool {
        vertices.iter().all(|vertex| self.remap.contains_key(vertex))
    }

    fn local(&mut self, vertex: u32) -> u32 {
        if let Some(&local) = self.remap.get(&vertex) {
            return local;
        }
        let local = self.num_vertices() as u32;
        let start = vertex as usize * 3;
        self.positions
            .extend_from_slice(&self.source[start..start + 3]);
        self.remap.insert(vertex, local);
        local
    }

    fn finish(self, has_indices: bool, has_edges: bool) -> GeometryBucket {
        GeometryBucket {
            positions_compressed: self.positions,
            indices: has_indices.then_some(self.indices),
            edge_indices: has_edges.then_some(self.edge_indices),
        }
    }
}

/// Split a triangle geometry into buckets of at most `max_vertices` vertices.
///
/// Triangles are assigned greedily in order. Each edge goes to the first
/// bucket that already holds both of its vertices, or to the last bucket.
/// Every index must be below `positions.len() / 3`.
pub fn split_into_buckets(
    positions: &[u16],
    indices: Option<&[u32]>,
    edge_indices: Option<&[u32]>,
    max_vertices: u32,
) -> Vec<GeometryBucket> {
    let max_vertices = max_vertices.max(3) as usize;
    let mut closed: Vec<BucketBuilder> = Vec::new();
    let mut current = BucketBuilder::new(positions);

    for triangle in indices.unwrap_or(&[]).chunks_exact(3) {
        if current.num_vertices() + current.missing(triangle) > max_vertices {
            closed.push(std::mem::replace(&mut current, BucketBuilder::new(positions)));
        }
        for &vertex in triangle {
            let local = current.local(vertex);
            current.indices.push(local);
        }
    }
    closed.push(current);

    for edge in edge_indices.unwrap_or(&[]).chunks_exact(2) {
        let target = closed
            .iter()
            .position(|bucket| bucket.contains_all(edge))
            .unwrap_or(closed.len() - 1);
        let needs_new = {
            let bucket = &closed[target];
            !bucket.contains_all(edge)
                && bucket.num_vertices() + bucket.missing(edge) > max_vertices
        };
        if needs_new {
            closed.push(BucketBuilder::new(positions));
        }
        let bucket_index = if needs_new { closed.len() - 1 } else { target };
        let bucket = &mut closed[bucket_index];
        for &vertex in edge {
            let local = bucket.local(vertex);
            bucket.edge_indices.push(local);
        }
    }

    let has_indices = indices.is_some();
    let has_edges = edge_indices.is_some();
    let buckets: Vec<GeometryBucket> = closed
        .into_iter()
        .map(|builder| builder.finish(has_indices, has_edges))
        .filter(|bucket| bucket.num_vertices() > 0)
        .collect();

    log::trace!(
        "split_into_buckets: {} vertices into {} buckets (max {})",
        positions.len() / 3,
        buckets.len(),
        max_vertices
    );
    buckets
}

/// Where a bucket's data landed in a layer's staging buffers.
///
/// Bases are in units of the stored element: vertices for `vertex_base`,
/// triangles for `index_base`, edges for `edge_index_base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketHandle {
    /// Index width of the bucket's triangle and edge storage.
    pub width: IndexWidth,
    /// First vertex in the position texture.
    pub vertex_base: u32,
    /// Number of vertices.
    pub num_vertices: u32,
    /// First triangle in the triangle-index texture of `width`.
    pub index_base: u32,
    /// Number of live triangles.
    pub num_triangles: u32,
    /// First edge in the edge-index texture of `width`.
    pub edge_index_base: u32,
    /// Number of live edges.
    pub num_edges: u32,
}

impl BucketHandle {
    /// Triangle slots including alignment padding.
    pub fn aligned_triangles(&self) -> u32 {
        align_to_block(self.num_triangles)
    }

    /// Edge slots including alignment padding.
    pub fn aligned_edges(&self) -> u32 {
        align_to_block(self.num_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_positions(num_vertices: usize) -> Vec<u16> {
        (0..num_vertices * 3).map(|i| i as u16).collect()
    }

    #[test]
    fn test_width_boundaries() {
        assert_eq!(IndexWidth::for_vertex_count(3), IndexWidth::Bits8);
        assert_eq!(IndexWidth::for_vertex_count(256), IndexWidth::Bits8);
        assert_eq!(IndexWidth::for_vertex_count(257), IndexWidth::Bits16);
        assert_eq!(IndexWidth::for_vertex_count(65536), IndexWidth::Bits16);
        assert_eq!(IndexWidth::for_vertex_count(65537), IndexWidth::Bits32);
    }

    #[test]
    fn test_encode() {
        assert_eq!(IndexWidth::Bits8.encode(&[1, 255]), vec![1, 255]);
        assert_eq!(IndexWidth::Bits16.encode(&[1, 0x0203]), vec![1, 0, 3, 2]);
        assert_eq!(IndexWidth::Bits32.encode(&[0x01020304]), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_formats() {
        assert_eq!(IndexWidth::Bits16.triangle_format(), TextureFormat::Rgb16Uint);
        assert_eq!(IndexWidth::Bits32.edge_format(), TextureFormat::Rg32Uint);
        assert_eq!(IndexWidth::Bits8.to_string(), "8-bit");
    }

    #[test]
    fn test_per_width() {
        let mut table = PerWidth::<u32>::default();
        *table.get_mut(IndexWidth::Bits16) += 5;
        assert_eq!(*table.get(IndexWidth::Bits16), 5);
        let doubled = table.map(|_, v| v * 2);
        assert_eq!(doubled.bits16, 10);
        let widths: Vec<_> = table.iter().map(|(w, _)| w).collect();
        assert_eq!(widths, IndexWidth::ALL.to_vec());
    }

    #[test]
    fn test_padding() {
        assert_eq!(align_to_block(0), 0);
        assert_eq!(align_to_block(1), 8);
        assert_eq!(align_to_block(8), 8);
        assert_eq!(align_to_block(9), 16);

        let mut indices = vec![1; 6];
        pad_to_block(&mut indices, 3);
        assert_eq!(indices.len(), 24);
        assert!(indices[6..].iter().all(|&i| i == 0));
    }

    #[test]
    fn test_single_bucket_when_small() {
        let positions = grid_positions(4);
        let indices = [0, 1, 2, 0, 2, 3];
        let edges = [0, 1, 1, 2];
        let buckets = split_into_buckets(&positions, Some(&indices), Some(&edges), 1 << 16);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].num_vertices(), 4);
        assert_eq!(buckets[0].indices.as_deref(), Some(&indices[..]));
        assert_eq!(buckets[0].num_edges(), 2);
    }

    #[test]
    fn test_split_remaps_indices() {
        // A strip of 6 triangles over 8 vertices, at most 4 vertices per bucket.
        let positions = grid_positions(8);
        let indices = [0, 1, 2, 1, 2, 3, 2, 3, 4, 3, 4, 5, 4, 5, 6, 5, 6, 7];
        let buckets = split_into_buckets(&positions, Some(&indices), None, 4);

        assert!(buckets.len() > 1);
        let mut triangles = 0;
        for bucket in &buckets {
            assert!(bucket.num_vertices() <= 4);
            let local = bucket.indices.as_ref().unwrap();
            assert!(local.iter().all(|&i| (i as usize) < bucket.num_vertices()));
            assert!(bucket.edge_indices.is_none());
            triangles += bucket.num_triangles();
        }
        assert_eq!(triangles, 6);

        // The first triangle of the second bucket keeps its source positions.
        let second = &buckets[1];
        let source_vertex = second.positions_compressed[0] as usize / 3;
        assert_eq!(
            second.positions_compressed[..3],
            positions[source_vertex * 3..source_vertex * 3 + 3]
        );
    }

    #[test]
    fn test_edges_follow_their_triangles() {
        let positions = grid_positions(6);
        let indices = [0, 1, 2, 3, 4, 5];
        let edges = [3, 4, 0, 1];
        let buckets = split_into_buckets(&positions, Some(&indices), Some(&edges), 3);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].edge_indices.as_deref(), Some(&[0, 1][..]));
        assert_eq!(buckets[1].edge_indices.as_deref(), Some(&[0, 1][..]));
    }
}
