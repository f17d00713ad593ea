//! Integration tests for instancing layers.
//!
//! # Test Categories
//!
//! - **Lifecycle Tests**: build/mutate ordering, geometry sharing
//! - **View Tests**: per-view flags buffers and counts
//! - **Draw Tests**: draw planning per primitive

mod common;

use std::sync::Arc;

use glam::{Mat4, Vec3};
use rstest::rstest;

use common::{init_logging, mesh, point_geometry, quad_geometry, quad_geometry_with_edges, Backend};
use scene_layers::layers::{ProgramVariant, RenderPassRow};
use scene_layers::{
    GraphicsDevice, InstancingLayer, InstancingLayerConfig, LayerError, LayerIdGenerator,
    LayerMeshIndex, LayerMeshParams, MeshFlags, RenderPass, SceneGeometry,
};

fn instancing_layer(
    device: &Arc<GraphicsDevice>,
    geometry: &Arc<SceneGeometry>,
    config: InstancingLayerConfig,
) -> InstancingLayer {
    InstancingLayer::new(
        Arc::clone(device),
        LayerIdGenerator::new().next_id(),
        Arc::clone(geometry),
        config,
    )
}

fn add_instances(
    layer: &mut InstancingLayer,
    geometry: &Arc<SceneGeometry>,
    count: usize,
) -> Vec<LayerMeshIndex> {
    (0..count)
        .map(|i| {
            let placed = mesh(geometry)
                .with_color([i as u8, 10, 20])
                .with_matrix(Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)));
            layer
                .create_layer_mesh(&LayerMeshParams::new([0, 0, i as u8, 255]), &placed)
                .unwrap()
        })
        .collect()
}

fn flags_value(
    device: &GraphicsDevice,
    layer: &InstancingLayer,
    view: usize,
    instance: usize,
) -> f32 {
    let bytes = device
        .read_buffer(&layer.buffers().unwrap().flags[view])
        .unwrap();
    let start = instance * 4;
    f32::from_le_bytes(bytes[start..start + 4].try_into().unwrap())
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::webgpu(Backend::WebGpu)]
fn test_build_uploads_per_instance_buffers(#[case] backend: Backend) {
    init_logging();
    let Some(device) = backend.device() else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let geometry = quad_geometry_with_edges("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    add_instances(&mut layer, &geometry, 5);
    layer.build().unwrap();

    let state = layer.render_state().unwrap();
    assert_eq!(state.num_instances, 5);
    assert_eq!(state.num_vertices, 4);
    assert_eq!(state.num_indices, 6);
    assert_eq!(state.num_edge_indices, 8);

    let buffers = layer.buffers().unwrap();
    assert_eq!(buffers.colors.size(), 5 * 4);
    assert_eq!(buffers.pick_colors.size(), 5 * 4);
    assert_eq!(buffers.metallic_roughness.size(), 5 * 2);
    assert_eq!(buffers.offsets.size(), 5 * 12);
    for row in &buffers.matrix_rows {
        assert_eq!(row.size(), 5 * 16);
    }
    assert_eq!(buffers.flags.len(), 1);
    assert!(buffers.edge_indices.is_some());
    assert!(buffers.uvs.is_none());
}

#[test]
fn test_matrix_rows_hold_translation() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    add_instances(&mut layer, &geometry, 3);
    layer.build().unwrap();

    let row0 = device
        .read_buffer(&layer.buffers().unwrap().matrix_rows[0])
        .unwrap();
    let row0: Vec<f32> = row0
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    // First row of instance 2 is (1, 0, 0, tx) with tx = 2.
    assert_eq!(&row0[8..12], &[1.0, 0.0, 0.0, 2.0]);
}

#[test]
fn test_mutations_before_build_fail() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instance = add_instances(&mut layer, &geometry, 1)[0];

    assert_eq!(
        layer.set_layer_mesh_visible(0, instance, true),
        Err(LayerError::NotFinalized)
    );
    assert_eq!(
        layer.set_layer_mesh_color(0, instance, [1, 2, 3, 4]),
        Err(LayerError::NotFinalized)
    );
    assert!(matches!(
        layer.draw_calls(0, RenderPass::ColorOpaque),
        Err(LayerError::NotFinalized)
    ));

    layer.build().unwrap();
    assert_eq!(
        layer.create_layer_mesh(&LayerMeshParams::default(), &mesh(&geometry)),
        Err(LayerError::AlreadyBuilt)
    );
    assert_eq!(layer.build(), Err(LayerError::AlreadyFinalized));
}

#[test]
fn test_other_geometry_is_refused() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let other = quad_geometry("nut");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());

    assert!(!layer.can_create_layer_mesh(&other).unwrap());
    assert_eq!(
        layer.create_layer_mesh(&LayerMeshParams::default(), &mesh(&other)),
        Err(LayerError::GeometryMismatch {
            expected: "bolt".to_string(),
            found: "nut".to_string(),
        })
    );
}

#[test]
fn test_instance_capacity() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(
        &device,
        &geometry,
        InstancingLayerConfig::default().with_max_instances(3),
    );
    add_instances(&mut layer, &geometry, 3);
    assert!(!layer.can_create_layer_mesh(&geometry).unwrap());
    assert!(matches!(
        layer.create_layer_mesh(&LayerMeshParams::default(), &mesh(&geometry)),
        Err(LayerError::CapacityExceeded(_))
    ));
}

#[test]
fn test_stubbed_setters_and_is_empty() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    assert!(!layer.is_empty());
    let instance = add_instances(&mut layer, &geometry, 1)[0];
    layer.build().unwrap();

    let before = device.upload_stats();
    layer
        .set_layer_mesh_matrix(0, instance, Mat4::from_scale(Vec3::splat(2.0)))
        .unwrap();
    layer.set_layer_mesh_offset(0, instance, Vec3::ONE).unwrap();
    layer.set_layer_mesh_collidable(0, instance, true).unwrap();
    assert_eq!(device.upload_stats(), before);
    assert_eq!(layer.counts(0).unwrap().num_collidable, 0);

    assert_eq!(
        layer.set_layer_mesh_offset(0, LayerMeshIndex(7), Vec3::ONE),
        Err(LayerError::InvalidMeshIndex(7))
    );
}

#[test]
fn test_color_write() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 2);
    layer.build().unwrap();

    layer.set_layer_mesh_color(0, instances[1], [9, 8, 7, 6]).unwrap();
    let colors = device
        .read_buffer(&layer.buffers().unwrap().colors)
        .unwrap();
    assert_eq!(colors, vec![0, 10, 20, 255, 9, 8, 7, 6]);
}

// ============================================================================
// View Tests
// ============================================================================

#[test]
fn test_views_keep_separate_flags_and_counts() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 3);
    let second = layer.add_view().unwrap();
    layer.build().unwrap();

    let visible = MeshFlags::VISIBLE | MeshFlags::PICKABLE;
    layer.set_layer_mesh_flags(0, instances[0], visible, false).unwrap();
    layer
        .set_layer_mesh_flags(second, instances[2], MeshFlags::VISIBLE | MeshFlags::SELECTED, true)
        .unwrap();

    let expected = RenderPassRow::from_flags(visible, false).to_instance_flags(false);
    assert_eq!(flags_value(&device, &layer, 0, 0), expected);
    assert_eq!(flags_value(&device, &layer, second, 0), 0.0);
    let selected = RenderPassRow::from_flags(MeshFlags::VISIBLE | MeshFlags::SELECTED, true)
        .to_instance_flags(false);
    assert_eq!(flags_value(&device, &layer, second, 2), selected);

    let first_counts = layer.counts(0).unwrap();
    assert_eq!(first_counts.num_meshes, 3);
    assert_eq!(first_counts.num_pickable, 1);
    assert_eq!(first_counts.num_selected, 0);
    let second_counts = layer.counts(second).unwrap();
    assert_eq!(second_counts.num_selected, 1);
    assert_eq!(second_counts.num_transparent, 1);

    assert_eq!(layer.model_counts().view(second), second_counts);
    assert_eq!(
        layer.set_layer_mesh_visible(5, instances[0], true),
        Err(LayerError::InvalidViewIndex(5))
    );
}

#[test]
fn test_view_added_after_build() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 2);
    layer.build().unwrap();

    let view = layer.add_view().unwrap();
    assert_eq!(layer.buffers().unwrap().flags.len(), 2);
    assert_eq!(layer.counts(view).unwrap().num_meshes, 2);

    layer.set_layer_mesh_clippable(view, instances[1], true).unwrap();
    assert_eq!(flags_value(&device, &layer, view, 1), (1u32 << 12) as f32);
}

#[test]
fn test_destroy_leaves_every_view() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 2);
    let view = layer.add_view().unwrap();
    layer.build().unwrap();
    layer
        .set_layer_mesh_visible(view, instances[0], true)
        .unwrap();

    layer.destroy();
    assert_eq!(layer.model_counts().view(0).num_meshes, 0);
    assert_eq!(layer.model_counts().view(view).num_visible, 0);
    assert_eq!(layer.flush(), Err(LayerError::Destroyed));
}

// ============================================================================
// Draw Tests
// ============================================================================

#[test]
fn test_draw_calls_cover_every_instance() {
    let device = GraphicsDevice::dummy();
    let geometry = quad_geometry_with_edges("bolt");
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 4);
    layer.build().unwrap();

    assert!(layer.draw_calls(0, RenderPass::ColorOpaque).unwrap().is_empty());

    layer
        .set_layer_mesh_flags(0, instances[0], MeshFlags::VISIBLE | MeshFlags::EDGES, false)
        .unwrap();
    let calls = layer.draw_calls(0, RenderPass::ColorOpaque).unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program.variant, ProgramVariant::InstancedTriangles);
    assert_eq!(calls[0].element_count, 6);
    assert_eq!(calls[0].instance_count, 4);

    let edges = layer.draw_calls(0, RenderPass::EdgesColorOpaque).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].program.variant, ProgramVariant::InstancedEdges);
    assert_eq!(edges[0].element_count, 8);

    assert!(layer.draw_calls(0, RenderPass::Pick).unwrap().is_empty());
}

#[test]
fn test_points_draw_without_indices() {
    let device = GraphicsDevice::dummy();
    let geometry = point_geometry("markers", 7);
    let mut layer = instancing_layer(&device, &geometry, InstancingLayerConfig::default());
    let instances = add_instances(&mut layer, &geometry, 2);
    layer.build().unwrap();
    assert!(layer.buffers().unwrap().indices.is_none());

    layer.set_layer_mesh_visible(0, instances[1], true).unwrap();
    let calls = layer.draw_calls(0, RenderPass::ColorOpaque).unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program.variant, ProgramVariant::InstancedPoints);
    assert_eq!(calls[0].program.width, None);
    assert_eq!(calls[0].element_count, 7);
    assert_eq!(calls[0].instance_count, 2);
}
