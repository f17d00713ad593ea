//! Scene layers.
//!
//! A layer aggregates many meshes into a few GPU resources and lets the
//! per-mesh render state change in place after upload. There are two kinds:
//!
//! | Layer | Holds | Per-mesh state lives in |
//! |-------|-------|-------------------------|
//! | [`RendererLayer`] | many different triangle geometries | data textures, one 32-byte row per sub-mesh |
//! | [`InstancingLayer`] | many instances of one geometry | per-instance vertex buffers |
//!
//! [`LayerSet`] decides which layer each mesh of a model goes to.
//!
//! Both kinds have the same lifecycle: meshes are added, then `build()`
//! uploads everything once, then only flags, colors and transforms change.

mod bucket;
mod config;
mod counts;
mod flags;
mod geometry;
mod instancing;
mod layer_set;
mod program;
mod renderer_layer;
mod texture_buffer;
mod texture_set;

pub use bucket::{
    align_to_block, split_into_buckets, BucketHandle, GeometryBucket, IndexWidth, PerWidth,
};
pub use config::{
    BucketingConfig, InstancingLayerConfig, LayerConfig, DATA_TEXTURE_WIDTH,
    INDEX_ALIGNMENT_BLOCK, MAX_DATA_TEXTURE_HEIGHT, MAX_INSTANCES_IN_LAYER, MAX_MESHES_IN_LAYER,
    MAX_UPDATES_IN_FRAME_WITHOUT_BATCHING, MAX_VERTICES_PER_BUCKET, SUB_MESHES_PER_ROW,
    TEXELS_PER_MATRIX, TEXELS_PER_SUB_MESH,
};
pub use counts::{MeshCounts, SharedMeshCounts};
pub use flags::{MeshFlags, RenderPass, RenderPassRow};
pub use geometry::{GeometryDescriptor, LayerMeshParams, Primitive, SceneGeometry, SceneMesh};
pub use instancing::{InstancingBuffers, InstancingLayer, InstancingRenderState};
pub use layer_set::{LayerSet, MeshLocation, ModelMeshHandle};
pub use program::{DrawCall, ProgramFeatures, ProgramKey, ProgramVariant};
pub use renderer_layer::{
    LayerId, LayerIdGenerator, LayerMeshIndex, RenderState, RendererLayer, UpdateMode,
};
pub use texture_buffer::{
    attribute_row, row, DataTextureBuffer, SubMeshIndex, SubMeshParams, ATTRIBUTE_ROW_BYTES,
};
pub use texture_set::{
    attribute_texel, matrix_bytes, matrix_texel, offset_bytes, offset_texel, DataTexture,
    DataTextureSet, WriteMode,
};
