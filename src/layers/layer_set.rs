//! Model-wide layer orchestration.
//!
//! A [`LayerSet`] owns every layer of one model. It places each mesh in a
//! layer, opening a new data-texture layer when the current one refuses, and
//! hands back a [`ModelMeshHandle`] that stays valid for the life of the set.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::LayerError;

use super::config::{InstancingLayerConfig, LayerConfig};
use super::counts::{MeshCounts, SharedMeshCounts};
use super::flags::{MeshFlags, RenderPass};
use super::geometry::{LayerMeshParams, Primitive, SceneMesh};
use super::instancing::InstancingLayer;
use super::program::DrawCall;
use super::renderer_layer::{LayerId, LayerIdGenerator, LayerMeshIndex, RendererLayer};

/// Model-wide handle of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelMeshHandle(pub u32);

/// Where a mesh of the model lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshLocation {
    /// In a data-texture layer.
    DataTexture {
        /// Index into [`LayerSet::layers`].
        layer: usize,
        /// Mesh within that layer.
        mesh: LayerMeshIndex,
    },
    /// In an instancing layer.
    Instanced {
        /// Index into [`LayerSet::instancing_layers`].
        layer: usize,
        /// Instance within that layer.
        mesh: LayerMeshIndex,
    },
}

/// Every layer of one model.
pub struct LayerSet {
    device: Arc<GraphicsDevice>,
    ids: LayerIdGenerator,
    layer_config: LayerConfig,
    instancing_config: InstancingLayerConfig,
    layers: Vec<RendererLayer>,
    open_layers: HashMap<Primitive, usize>,
    instancing_layers: Vec<InstancingLayer>,
    instancing_by_geometry: HashMap<String, usize>,
    meshes: Vec<MeshLocation>,
    counts: SharedMeshCounts,
    built: bool,
}

impl LayerSet {
    /// Create an empty set.
    pub fn new(
        device: Arc<GraphicsDevice>,
        layer_config: LayerConfig,
        instancing_config: InstancingLayerConfig,
    ) -> Self {
        Self {
            device,
            ids: LayerIdGenerator::new(),
            layer_config,
            instancing_config,
            layers: Vec::new(),
            open_layers: HashMap::new(),
            instancing_layers: Vec::new(),
            instancing_by_geometry: HashMap::new(),
            meshes: Vec::new(),
            counts: SharedMeshCounts::new(),
            built: false,
        }
    }

    /// Data-texture layers in creation order.
    pub fn layers(&self) -> &[RendererLayer] {
        &self.layers
    }

    /// Instancing layers in creation order.
    pub fn instancing_layers(&self) -> &[InstancingLayer] {
        &self.instancing_layers
    }

    /// Model-level counts shared by every layer.
    pub fn model_counts(&self) -> &SharedMeshCounts {
        &self.counts
    }

    /// Model-level counts of the first view.
    pub fn counts(&self) -> MeshCounts {
        self.counts.view(0)
    }

    /// Number of meshes.
    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// Returns true once [`build`](Self::build) succeeded.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Where a mesh lives.
    pub fn location(&self, mesh: ModelMeshHandle) -> Result<MeshLocation, LayerError> {
        self.meshes
            .get(mesh.0 as usize)
            .copied()
            .ok_or(LayerError::InvalidMeshIndex(mesh.0))
    }

    /// Add a mesh.
    ///
    /// Points and lines always go to the instancing layer of their geometry.
    /// Triangle meshes go to the open data-texture layer of their primitive,
    /// or to a new one when it is full.
    pub fn create_mesh(
        &mut self,
        params: &LayerMeshParams,
        mesh: &SceneMesh,
    ) -> Result<ModelMeshHandle, LayerError> {
        let geometry = &mesh.geometry;
        let is_triangles = geometry.primitive().is_triangles();
        if geometry.is_empty() || (is_triangles && geometry.buckets().is_empty()) {
            return Err(LayerError::InvalidGeometry(format!(
                "{} has nothing to draw",
                geometry.id()
            )));
        }
        if is_triangles {
            self.create_data_texture_mesh(params, mesh)
        } else {
            self.create_instanced_mesh(params, mesh)
        }
    }

    fn ensure_accepting(&self) -> Result<(), LayerError> {
        if self.built {
            return Err(LayerError::AlreadyBuilt);
        }
        Ok(())
    }

    fn create_data_texture_mesh(
        &mut self,
        params: &LayerMeshParams,
        mesh: &SceneMesh,
    ) -> Result<ModelMeshHandle, LayerError> {
        self.ensure_accepting()?;
        let primitive = mesh.geometry.primitive();

        let open = match self.open_layers.get(&primitive).copied() {
            Some(index) if self.layers[index].can_create_layer_mesh(&mesh.geometry)? => index,
            _ => {
                let layer = RendererLayer::new(
                    Arc::clone(&self.device),
                    self.ids.next_id(),
                    primitive,
                    self.layer_config.clone(),
                )?
                .with_model_counts(self.counts.clone());
                if !layer.can_create_layer_mesh(&mesh.geometry)? {
                    return Err(LayerError::CapacityExceeded(format!(
                        "geometry {} does not fit in an empty layer",
                        mesh.geometry.id()
                    )));
                }
                log::debug!(
                    "LayerSet: opened {} for {primitive} ({} data-texture layers)",
                    layer.id(),
                    self.layers.len() + 1
                );
                self.layers.push(layer);
                let index = self.layers.len() - 1;
                self.open_layers.insert(primitive, index);
                index
            }
        };

        let layer_mesh = self.layers[open].create_layer_mesh(params, mesh)?;
        Ok(self.push(MeshLocation::DataTexture {
            layer: open,
            mesh: layer_mesh,
        }))
    }

    /// Add a mesh as an instance of its geometry, whatever its primitive.
    pub fn create_instanced_mesh(
        &mut self,
        params: &LayerMeshParams,
        mesh: &SceneMesh,
    ) -> Result<ModelMeshHandle, LayerError> {
        self.ensure_accepting()?;
        let geometry_id = mesh.geometry.id();

        let open = match self.instancing_by_geometry.get(geometry_id).copied() {
            Some(index) if self.instancing_layers[index].can_create_layer_mesh(&mesh.geometry)? => {
                index
            }
            _ => {
                let layer = InstancingLayer::new(
                    Arc::clone(&self.device),
                    self.ids.next_id(),
                    Arc::clone(&mesh.geometry),
                    self.instancing_config.clone(),
                )
                .with_model_counts(self.counts.clone());
                log::debug!(
                    "LayerSet: opened {} for instances of {geometry_id}",
                    layer.id()
                );
                self.instancing_layers.push(layer);
                let index = self.instancing_layers.len() - 1;
                self.instancing_by_geometry
                    .insert(geometry_id.to_string(), index);
                index
            }
        };

        let layer_mesh = self.instancing_layers[open].create_layer_mesh(params, mesh)?;
        Ok(self.push(MeshLocation::Instanced {
            layer: open,
            mesh: layer_mesh,
        }))
    }

    fn push(&mut self, location: MeshLocation) -> ModelMeshHandle {
        self.meshes.push(location);
        ModelMeshHandle(self.meshes.len() as u32 - 1)
    }

    /// Build every layer.
    pub fn build(&mut self) -> Result<(), LayerError> {
        if self.built {
            return Err(LayerError::AlreadyFinalized);
        }
        for layer in &mut self.layers {
            layer.build()?;
        }
        for layer in &mut self.instancing_layers {
            layer.build()?;
        }
        self.built = true;
        log::debug!(
            "LayerSet: built {} meshes in {} data-texture and {} instancing layers",
            self.meshes.len(),
            self.layers.len(),
            self.instancing_layers.len()
        );
        Ok(())
    }

    /// Replace all flags and the transparency of a mesh.
    ///
    /// Instanced meshes are updated in view 0.
    pub fn set_mesh_flags(
        &mut self,
        mesh: ModelMeshHandle,
        flags: MeshFlags,
        transparent: bool,
    ) -> Result<(), LayerError> {
        match self.location(mesh)? {
            MeshLocation::DataTexture { layer, mesh } => {
                self.layers[layer].set_layer_mesh_flags(mesh, flags, transparent)
            }
            MeshLocation::Instanced { layer, mesh } => {
                self.instancing_layers[layer].set_layer_mesh_flags(0, mesh, flags, transparent)
            }
        }
    }

    /// Show or hide a mesh.
    pub fn set_mesh_visible(
        &mut self,
        mesh: ModelMeshHandle,
        visible: bool,
    ) -> Result<(), LayerError> {
        match self.location(mesh)? {
            MeshLocation::DataTexture { layer, mesh } => {
                self.layers[layer].set_layer_mesh_visible(mesh, visible)
            }
            MeshLocation::Instanced { layer, mesh } => {
                self.instancing_layers[layer].set_layer_mesh_visible(0, mesh, visible)
            }
        }
    }

    /// Select a mesh.
    pub fn set_mesh_selected(
        &mut self,
        mesh: ModelMeshHandle,
        selected: bool,
    ) -> Result<(), LayerError> {
        match self.location(mesh)? {
            MeshLocation::DataTexture { layer, mesh } => {
                self.layers[layer].set_layer_mesh_selected(mesh, selected)
            }
            MeshLocation::Instanced { layer, mesh } => {
                self.instancing_layers[layer].set_layer_mesh_selected(0, mesh, selected)
            }
        }
    }

    /// Set the color of a mesh.
    pub fn set_mesh_color(
        &mut self,
        mesh: ModelMeshHandle,
        color: [u8; 4],
    ) -> Result<(), LayerError> {
        match self.location(mesh)? {
            MeshLocation::DataTexture { layer, mesh } => {
                self.layers[layer].set_layer_mesh_color(mesh, color)
            }
            MeshLocation::Instanced { layer, mesh } => {
                self.instancing_layers[layer].set_layer_mesh_color(0, mesh, color)
            }
        }
    }

    /// Flags and transparency of a mesh.
    pub fn mesh_flags(&self, mesh: ModelMeshHandle) -> Result<(MeshFlags, bool), LayerError> {
        match self.location(mesh)? {
            MeshLocation::DataTexture { layer, mesh } => self.layers[layer].layer_mesh_flags(mesh),
            MeshLocation::Instanced { layer, mesh } => {
                self.instancing_layers[layer].layer_mesh_flags(0, mesh)
            }
        }
    }

    /// Start a batch in every data-texture layer.
    pub fn begin_deferred_flags(&mut self) -> Result<(), LayerError> {
        for layer in &mut self.layers {
            layer.begin_deferred_flags()?;
        }
        Ok(())
    }

    /// Flush every layer. Returns the number of uploads.
    pub fn flush(&mut self) -> Result<usize, LayerError> {
        let mut uploads = 0;
        for layer in &mut self.layers {
            uploads += layer.flush()?;
        }
        for layer in &mut self.instancing_layers {
            uploads += layer.flush()?;
        }
        Ok(uploads)
    }

    /// Draw calls of every layer for `pass`, in layer sort order.
    ///
    /// Skips everything when the model counts show no mesh can take part.
    pub fn draw_calls(&self, pass: RenderPass) -> Result<Vec<(LayerId, DrawCall)>, LayerError> {
        if !self.counts().may_draw(pass) {
            return Ok(Vec::new());
        }

        let mut calls = Vec::new();
        for layer in &self.layers {
            let key = layer.sort_key();
            calls.extend(layer.draw_calls(pass)?.into_iter().map(|call| (key, call)));
        }
        for layer in &self.instancing_layers {
            let key = layer.sort_key();
            calls.extend(layer.draw_calls(0, pass)?.into_iter().map(|call| (key, call)));
        }
        calls.sort_by_key(|(key, _)| *key);
        Ok(calls
            .into_iter()
            .map(|((_, id), call)| (id, call))
            .collect())
    }

    /// Destroy every layer.
    pub fn destroy(&mut self) {
        for layer in &mut self.layers {
            layer.destroy();
        }
        for layer in &mut self.instancing_layers {
            layer.destroy();
        }
        self.open_layers.clear();
        self.instancing_by_geometry.clear();
        log::debug!("LayerSet: destroyed {} meshes", self.meshes.len());
    }
}

impl std::fmt::Debug for LayerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerSet")
            .field("layers", &self.layers)
            .field("instancing_layers", &self.instancing_layers)
            .field("meshes", &self.meshes.len())
            .field("built", &self.built)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::config::BucketingConfig;
    use crate::layers::geometry::{GeometryDescriptor, SceneGeometry};

    fn geometry(id: &str, primitive: Primitive) -> Arc<SceneGeometry> {
        let descriptor = GeometryDescriptor::new(id, primitive, vec![0; 12])
            .with_indices(match primitive {
                Primitive::Points => vec![0, 1, 2, 3],
                Primitive::Lines => vec![0, 1, 2, 3],
                _ => vec![0, 1, 2, 0, 2, 3],
            });
        Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::default()).unwrap())
    }

    fn set(max_sub_meshes: u32) -> LayerSet {
        LayerSet::new(
            GraphicsDevice::dummy(),
            LayerConfig::default().with_max_sub_meshes(max_sub_meshes),
            InstancingLayerConfig::default(),
        )
    }

    #[test]
    fn test_rejects_triangles_without_indices() {
        let mut set = set(16);
        let descriptor = GeometryDescriptor::new("bare", Primitive::Triangles, vec![0; 12]);
        let bare = SceneGeometry::new(descriptor, &BucketingConfig::default()).unwrap();
        let err = set
            .create_mesh(&LayerMeshParams::default(), &SceneMesh::new(Arc::new(bare)))
            .unwrap_err();
        assert!(matches!(err, LayerError::InvalidGeometry(_)));
        assert!(set.layers().is_empty());
        assert_eq!(set.counts().num_meshes, 0);
    }

    #[test]
    fn test_full_layer_opens_another() {
        let mut set = set(2);
        let mesh = SceneMesh::new(geometry("quad", Primitive::Triangles));
        for _ in 0..5 {
            set.create_mesh(&LayerMeshParams::default(), &mesh).unwrap();
        }
        assert_eq!(set.layers().len(), 3);
        assert_eq!(
            set.location(ModelMeshHandle(4)).unwrap(),
            MeshLocation::DataTexture {
                layer: 2,
                mesh: LayerMeshIndex(0)
            }
        );
    }

    #[test]
    fn test_points_go_to_instancing() {
        let mut set = set(16);
        let points = SceneMesh::new(geometry("dots", Primitive::Points));
        let handle = set.create_mesh(&LayerMeshParams::default(), &points).unwrap();
        set.create_mesh(&LayerMeshParams::default(), &points).unwrap();
        assert!(set.layers().is_empty());
        assert_eq!(set.instancing_layers().len(), 1);
        assert_eq!(set.instancing_layers()[0].num_instances(), 2);

        set.build().unwrap();
        set.set_mesh_visible(handle, true).unwrap();
        assert_eq!(set.counts().num_visible, 1);
        assert_eq!(set.counts().num_meshes, 2);
    }

    #[test]
    fn test_model_counts_sum_layer_counts() {
        let mut set = set(2);
        let quad = SceneMesh::new(geometry("quad", Primitive::Triangles));
        let handles: Vec<_> = (0..4)
            .map(|_| set.create_mesh(&LayerMeshParams::default(), &quad).unwrap())
            .collect();
        set.build().unwrap();
        for handle in &handles[1..] {
            set.set_mesh_flags(*handle, MeshFlags::VISIBLE | MeshFlags::SELECTED, false)
                .unwrap();
        }

        let summed: MeshCounts = set.layers().iter().map(RendererLayer::counts).sum();
        assert_eq!(summed, set.counts());
        assert_eq!(summed.num_selected, 3);

        let calls = set.draw_calls(RenderPass::SilhouetteSelected).unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn test_create_after_build_fails() {
        let mut set = set(16);
        let quad = SceneMesh::new(geometry("quad", Primitive::Triangles));
        set.create_mesh(&LayerMeshParams::default(), &quad).unwrap();
        set.build().unwrap();
        assert_eq!(
            set.create_mesh(&LayerMeshParams::default(), &quad),
            Err(LayerError::AlreadyBuilt)
        );
        assert_eq!(set.build(), Err(LayerError::AlreadyFinalized));
    }
}
