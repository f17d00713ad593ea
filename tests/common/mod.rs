//! Common utilities for layer integration tests.
//!
//! Geometry builders, device setup and texture readback shared by the
//! data-texture and instancing test suites.

#![allow(dead_code)]

use std::sync::Arc;

use scene_layers::layers::{BucketingConfig, SubMeshIndex};
use scene_layers::{
    GeometryDescriptor, GraphicsDevice, LayerConfig, LayerIdGenerator, Primitive, RendererLayer,
    SceneGeometry, SceneMesh, Texture,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the tests can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// In-memory backend; supports readback.
    Dummy,
    /// wgpu backend.
    WebGpu,
}

impl Backend {
    /// Create a device on this backend, or `None` when it is not available.
    pub fn device(self) -> Option<Arc<GraphicsDevice>> {
        match self {
            Backend::Dummy => Some(GraphicsDevice::dummy()),
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => scene_layers::backend::wgpu_backend::WgpuBackend::new()
                .ok()
                .map(|backend| GraphicsDevice::new(Arc::new(backend))),
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => None,
        }
    }
}

/// Install a test logger once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Geometry
// ============================================================================

/// A quad: 4 vertices, 2 triangles.
pub fn quad_geometry(id: &str) -> Arc<SceneGeometry> {
    let descriptor = GeometryDescriptor::new(id, Primitive::Triangles, quantized_positions(4))
        .with_indices(vec![0, 1, 2, 0, 2, 3]);
    Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::default()).expect("valid quad"))
}

/// A quad with its 4 outline edges.
pub fn quad_geometry_with_edges(id: &str) -> Arc<SceneGeometry> {
    let descriptor = GeometryDescriptor::new(id, Primitive::Triangles, quantized_positions(4))
        .with_indices(vec![0, 1, 2, 0, 2, 3])
        .with_edge_indices(vec![0, 1, 1, 2, 2, 3, 3, 0]);
    Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::default()).expect("valid quad"))
}

/// A triangle fan over `num_vertices` vertices, kept in a single bucket.
pub fn fan_geometry(id: &str, num_vertices: u32) -> Arc<SceneGeometry> {
    let indices = (1..num_vertices - 1).flat_map(|i| [0, i, i + 1]).collect();
    let descriptor = GeometryDescriptor::new(
        id,
        Primitive::Triangles,
        quantized_positions(num_vertices as usize),
    )
    .with_indices(indices);
    Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::disabled()).expect("valid fan"))
}

/// A cloud of `num_points` points.
pub fn point_geometry(id: &str, num_points: usize) -> Arc<SceneGeometry> {
    let descriptor =
        GeometryDescriptor::new(id, Primitive::Points, quantized_positions(num_points));
    Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::default()).expect("valid points"))
}

/// Distinct quantized positions for `num_vertices` vertices.
pub fn quantized_positions(num_vertices: usize) -> Vec<u16> {
    (0..num_vertices * 3).map(|i| (i % 65536) as u16).collect()
}

/// An opaque mesh of a geometry.
pub fn mesh(geometry: &Arc<SceneGeometry>) -> SceneMesh {
    SceneMesh::new(Arc::clone(geometry))
}

// ============================================================================
// Layers
// ============================================================================

/// A triangle layer with the default configuration.
pub fn triangle_layer(device: &Arc<GraphicsDevice>) -> RendererLayer {
    triangle_layer_with(device, LayerConfig::default())
}

/// A triangle layer with a custom configuration.
pub fn triangle_layer_with(device: &Arc<GraphicsDevice>, config: LayerConfig) -> RendererLayer {
    RendererLayer::new(
        Arc::clone(device),
        LayerIdGenerator::new().next_id(),
        Primitive::Triangles,
        config,
    )
    .expect("triangle layer")
}

/// Read back a texture through the device.
pub fn read_texture(device: &GraphicsDevice, texture: &Texture) -> Vec<u8> {
    device.read_texture(texture).expect("readback")
}

/// The pass codes of a sub-mesh, read back from the GPU copy of the
/// attribute texture.
pub fn uploaded_pass_codes(
    layer: &RendererLayer,
    device: &GraphicsDevice,
    sub_mesh: u32,
) -> [u8; 4] {
    let textures = layer.data_texture_set().expect("built layer");
    let bytes = read_texture(device, textures.attributes.texture());
    let (x, y) = scene_layers::layers::attribute_texel(SubMeshIndex(sub_mesh));
    let start = (y * textures.attributes.width() + x + 2) as usize * 4;
    [bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]
}
