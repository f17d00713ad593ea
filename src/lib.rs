//! # Scene Layers
//!
//! GPU-resident aggregation of scene meshes for a BIM viewer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RendererLayer`] - Packs many triangle meshes into data textures and
//!   updates per-mesh state one texel at a time
//! - [`InstancingLayer`] - Draws many instances of one shared geometry
//! - [`LayerSet`] - Places the meshes of a model into layers
//! - [`GraphicsDevice`] - Validated texture/buffer uploads over a [`backend`]
//!   (in-memory dummy by default, wgpu behind the `wgpu-backend` feature)
//! - [`FrameScheduler`] - Runs deferred work and flushes layers once per tick
//!
//! ## Example
//!
//! ```ignore
//! use scene_layers::{GraphicsDevice, LayerSet, LayerMeshParams, MeshFlags};
//!
//! let device = GraphicsDevice::dummy();
//! let mut layers = LayerSet::new(device, Default::default(), Default::default());
//! let handle = layers.create_mesh(&LayerMeshParams::new(pick_color), &mesh)?;
//! layers.build()?;
//! layers.set_mesh_flags(handle, MeshFlags::VISIBLE | MeshFlags::PICKABLE, false)?;
//! ```

pub mod backend;
pub mod device;
pub mod error;
pub mod layers;
pub mod resources;
pub mod scheduler;
pub mod types;

// Re-export main types for convenience
pub use backend::{create_backend, DummyBackend, GpuBackend};
pub use device::{DeviceCapabilities, GraphicsDevice, UploadStats};
pub use error::{GraphicsError, LayerError};
pub use layers::{
    DataTextureBuffer, DataTextureSet, DrawCall, GeometryDescriptor, IndexWidth,
    InstancingLayer, InstancingLayerConfig, LayerConfig, LayerId, LayerIdGenerator,
    LayerMeshIndex, LayerMeshParams, LayerSet, MeshCounts, MeshFlags, ModelMeshHandle,
    Primitive, RenderPass, RenderState, RendererLayer, SceneGeometry, SceneMesh, UpdateMode,
};
pub use resources::{Buffer, Texture};
pub use scheduler::{FrameFlush, FrameScheduler, TickStats};
pub use types::{
    BufferDescriptor, BufferUsage, Extent3d, TextureDescriptor, TextureFormat, TextureRegion,
    TextureUsage,
};

/// Scene layers library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the scene layers subsystem.
///
/// Only logs the version; layers need no global setup.
pub fn init() {
    log::info!("Scene Layers v{} initialized", VERSION);
}
