//! Scene geometry and mesh placements consumed by layers.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::error::LayerError;

use super::bucket::{split_into_buckets, GeometryBucket};
use super::config::BucketingConfig;

/// Kind of primitive a geometry is drawn as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Primitive {
    /// Unconnected points.
    Points,
    /// Line segments, two indices each.
    Lines,
    /// Open triangle mesh.
    Triangles,
    /// Closed triangle mesh; back faces are never visible.
    Solid,
    /// Open triangle surface.
    Surface,
}

impl Primitive {
    /// Returns true for the three triangle kinds.
    pub fn is_triangles(self) -> bool {
        matches!(self, Self::Triangles | Self::Solid | Self::Surface)
    }

    /// Indices per primitive.
    pub fn index_components(self) -> usize {
        match self {
            Self::Points => 1,
            Self::Lines => 2,
            Self::Triangles | Self::Solid | Self::Surface => 3,
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Lines => "lines",
            Self::Triangles => "triangles",
            Self::Solid => "solid",
            Self::Surface => "surface",
        }
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Descriptor for creating a [`SceneGeometry`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryDescriptor {
    /// Unique id within the model.
    pub id: String,
    /// Primitive kind.
    pub primitive: Primitive,
    /// Positions quantized to `u16`, three per vertex.
    pub positions_compressed: Vec<u16>,
    /// Maps quantized positions back to model space.
    pub positions_decode_matrix: Mat4,
    /// Primitive indices.
    pub indices: Option<Vec<u32>>,
    /// Edge indices, two per edge.
    pub edge_indices: Option<Vec<u32>>,
    /// UVs quantized to `u16`, two per vertex.
    pub uvs_compressed: Option<Vec<u16>>,
}

impl GeometryDescriptor {
    /// Create a descriptor with no indices.
    pub fn new(
        id: impl Into<String>,
        primitive: Primitive,
        positions_compressed: Vec<u16>,
    ) -> Self {
        Self {
            id: id.into(),
            primitive,
            positions_compressed,
            positions_decode_matrix: Mat4::IDENTITY,
            indices: None,
            edge_indices: None,
            uvs_compressed: None,
        }
    }

    /// Set the positions decode matrix.
    pub fn with_decode_matrix(mut self, matrix: Mat4) -> Self {
        self.positions_decode_matrix = matrix;
        self
    }

    /// Set the primitive indices.
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = Some(indices);
        self
    }

    /// Set the edge indices.
    pub fn with_edge_indices(mut self, edge_indices: Vec<u32>) -> Self {
        self.edge_indices = Some(edge_indices);
        self
    }

    /// Set the quantized UVs.
    pub fn with_uvs(mut self, uvs_compressed: Vec<u16>) -> Self {
        self.uvs_compressed = Some(uvs_compressed);
        self
    }
}

/// Immutable geometry shared by any number of meshes.
///
/// Triangle geometries are split into [`GeometryBucket`]s when they are
/// created. Other primitives keep a single bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneGeometry {
    id: String,
    primitive: Primitive,
    positions_compressed: Vec<u16>,
    positions_decode_matrix: Mat4,
    indices: Option<Vec<u32>>,
    edge_indices: Option<Vec<u32>>,
    uvs_compressed: Option<Vec<u16>>,
    buckets: Vec<GeometryBucket>,
}

impl SceneGeometry {
    /// Validate a descriptor and split it into buckets.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InvalidGeometry`] if an array length does not
    /// match its stride or an index references a missing vertex.
    pub fn new(
        descriptor: GeometryDescriptor,
        bucketing: &BucketingConfig,
    ) -> Result<Self, LayerError> {
        let GeometryDescriptor {
            id,
            primitive,
            positions_compressed,
            positions_decode_matrix,
            indices,
            edge_indices,
            uvs_compressed,
        } = descriptor;

        let invalid = |msg: String| LayerError::InvalidGeometry(format!("{id}: {msg}"));

        if positions_compressed.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} position components is not a multiple of 3",
                positions_compressed.len()
            )));
        }
        let num_vertices = positions_compressed.len() / 3;

        check_indices(indices.as_deref(), primitive.index_components(), num_vertices)
            .map_err(&invalid)?;
        check_indices(edge_indices.as_deref(), 2, num_vertices).map_err(&invalid)?;

        if let Some(uvs) = &uvs_compressed {
            if uvs.len() != num_vertices * 2 {
                return Err(invalid(format!(
                    "{} uv components for {num_vertices} vertices",
                    uvs.len()
                )));
            }
        }

        let buckets = if primitive.is_triangles() && bucketing.enable_index_bucketing {
            split_into_buckets(
                &positions_compressed,
                indices.as_deref(),
                edge_indices.as_deref(),
                bucketing.max_vertices_per_bucket,
            )
        } else {
            vec![GeometryBucket {
                positions_compressed: positions_compressed.clone(),
                indices: indices.clone(),
                edge_indices: edge_indices.clone(),
            }]
        };

        log::trace!(
            "SceneGeometry: {id} ({primitive}, {num_vertices} vertices, {} buckets)",
            buckets.len()
        );

        Ok(Self {
            id,
            primitive,
            positions_compressed,
            positions_decode_matrix,
            indices,
            edge_indices,
            uvs_compressed,
            buckets,
        })
    }

    /// Unique id within the model.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Primitive kind.
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Quantized positions.
    pub fn positions_compressed(&self) -> &[u16] {
        &self.positions_compressed
    }

    /// Positions decode matrix.
    pub fn positions_decode_matrix(&self) -> Mat4 {
        self.positions_decode_matrix
    }

    /// Primitive indices.
    pub fn indices(&self) -> Option<&[u32]> {
        self.indices.as_deref()
    }

    /// Edge indices.
    pub fn edge_indices(&self) -> Option<&[u32]> {
        self.edge_indices.as_deref()
    }

    /// Quantized UVs.
    pub fn uvs_compressed(&self) -> Option<&[u16]> {
        self.uvs_compressed.as_deref()
    }

    /// Buckets, in order.
    pub fn buckets(&self) -> &[GeometryBucket] {
        &self.buckets
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.positions_compressed.len() / 3
    }

    /// Returns true if the geometry has no vertices.
    pub fn is_empty(&self) -> bool {
        self.positions_compressed.is_empty()
    }
}

fn check_indices(
    indices: Option<&[u32]>,
    stride: usize,
    num_vertices: usize,
) -> Result<(), String> {
    let Some(indices) = indices else {
        return Ok(());
    };
    if indices.len() % stride != 0 {
        return Err(format!(
            "{} indices is not a multiple of {stride}",
            indices.len()
        ));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i as usize >= num_vertices) {
        return Err(format!("index {bad} out of range for {num_vertices} vertices"));
    }
    Ok(())
}

/// A placement of a geometry in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneMesh {
    /// Shared geometry.
    pub geometry: Arc<SceneGeometry>,
    /// Quantized RGB color and opacity.
    pub color: [u8; 4],
    /// Quantized metallic factor.
    pub metallic: u8,
    /// Quantized roughness factor.
    pub roughness: u8,
    /// Model matrix, identity when absent.
    pub matrix: Option<Mat4>,
}

impl SceneMesh {
    /// Opaque white mesh of a geometry.
    pub fn new(geometry: Arc<SceneGeometry>) -> Self {
        Self {
            geometry,
            color: [255; 4],
            metallic: 0,
            roughness: 255,
            matrix: None,
        }
    }

    /// Set the RGB color, keeping opacity.
    pub fn with_color(mut self, rgb: [u8; 3]) -> Self {
        self.color[..3].copy_from_slice(&rgb);
        self
    }

    /// Set the opacity.
    pub fn with_opacity(mut self, opacity: u8) -> Self {
        self.color[3] = opacity;
        self
    }

    /// Set the metallic factor.
    pub fn with_metallic(mut self, metallic: u8) -> Self {
        self.metallic = metallic;
        self
    }

    /// Set the roughness factor.
    pub fn with_roughness(mut self, roughness: u8) -> Self {
        self.roughness = roughness;
        self
    }

    /// Set the model matrix.
    pub fn with_matrix(mut self, matrix: Mat4) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// The mesh is not fully opaque.
    pub fn is_transparent(&self) -> bool {
        self.color[3] < 255
    }
}

/// Per-mesh values supplied by the model when a mesh joins a layer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayerMeshParams {
    /// Color the mesh is drawn with in the pick pass.
    pub pick_color: [u8; 4],
    /// Initial offset applied on top of the model matrix.
    pub offset: Vec3,
}

impl LayerMeshParams {
    /// Params with a pick color.
    pub fn new(pick_color: [u8; 4]) -> Self {
        Self {
            pick_color,
            offset: Vec3::ZERO,
        }
    }

    /// Set the initial offset.
    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.offset = offset;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(id: &str) -> GeometryDescriptor {
        GeometryDescriptor::new(id, Primitive::Triangles, vec![0; 12])
            .with_indices(vec![0, 1, 2, 0, 2, 3])
            .with_edge_indices(vec![0, 1, 1, 2, 2, 3, 3, 0])
    }

    #[test]
    fn test_quad_is_one_bucket() {
        let geometry = SceneGeometry::new(quad("quad"), &BucketingConfig::default()).unwrap();
        assert_eq!(geometry.num_vertices(), 4);
        assert_eq!(geometry.buckets().len(), 1);
        assert_eq!(geometry.buckets()[0].num_triangles(), 2);
        assert_eq!(geometry.buckets()[0].num_edges(), 4);
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let descriptor = quad("bad").with_indices(vec![0, 1, 4]);
        let err = SceneGeometry::new(descriptor, &BucketingConfig::default()).unwrap_err();
        assert!(matches!(err, LayerError::InvalidGeometry(msg) if msg.contains("index 4")));
    }

    #[test]
    fn test_rejects_ragged_positions() {
        let descriptor = GeometryDescriptor::new("ragged", Primitive::Points, vec![0; 4]);
        assert!(SceneGeometry::new(descriptor, &BucketingConfig::default()).is_err());
    }

    #[test]
    fn test_bucketing_disabled_keeps_one_bucket() {
        let positions = vec![0; 3 * 300];
        let indices: Vec<u32> = (0..300).collect();
        let descriptor =
            GeometryDescriptor::new("big", Primitive::Solid, positions).with_indices(indices);
        let config = BucketingConfig::disabled();
        let geometry = SceneGeometry::new(descriptor.clone(), &config).unwrap();
        assert_eq!(geometry.buckets().len(), 1);

        let config = BucketingConfig::default().with_max_vertices_per_bucket(256);
        let geometry = SceneGeometry::new(descriptor, &config).unwrap();
        assert_eq!(geometry.buckets().len(), 2);
        assert!(geometry.buckets().iter().all(|b| b.num_vertices() <= 256));
    }

    #[test]
    fn test_mesh_builder() {
        let geometry =
            Arc::new(SceneGeometry::new(quad("q"), &BucketingConfig::default()).unwrap());
        let mesh = SceneMesh::new(geometry)
            .with_color([10, 20, 30])
            .with_opacity(128)
            .with_metallic(7);
        assert_eq!(mesh.color, [10, 20, 30, 128]);
        assert!(mesh.is_transparent());
        assert_eq!(mesh.metallic, 7);
    }
}
