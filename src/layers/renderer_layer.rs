//! Data-texture layer.
//!
//! A [`RendererLayer`] aggregates many meshes of one primitive kind into a
//! single [`DataTextureSet`]. It has two phases:
//!
//! - **Accepting**: meshes are added with [`RendererLayer::create_layer_mesh`]
//!   until [`RendererLayer::can_create_layer_mesh`] refuses. Nothing is on the
//!   GPU yet.
//! - **Built**: [`RendererLayer::build`] uploads everything once. From then on
//!   only per-mesh state changes, one texel at a time.
//!
//! # Update policy
//!
//! Each texel write is a separate upload call. The layer counts writes per
//! frame and once more than [`LayerConfig::batch_update_threshold`] happen it
//! switches to [`UpdateMode::Batching`]: writes only patch the host mirror and
//! [`RendererLayer::flush`], called once per frame, uploads each dirty texture
//! whole and switches back to [`UpdateMode::Immediate`].

use std::collections::HashMap;
use std::sync::Arc;

use glam::{DVec3, Mat4, Vec3};

use crate::device::GraphicsDevice;
use crate::error::LayerError;

use super::bucket::{align_to_block, BucketHandle, IndexWidth, PerWidth};
use super::config::{LayerConfig, INDEX_ALIGNMENT_BLOCK, MAX_MESHES_IN_LAYER};
use super::counts::{MeshCounts, SharedMeshCounts};
use super::flags::{MeshFlags, RenderPass, RenderPassRow};
use super::geometry::{LayerMeshParams, Primitive, SceneGeometry, SceneMesh};
use super::program::{DrawCall, ProgramFeatures, ProgramKey, ProgramVariant};
use super::texture_buffer::{row, DataTextureBuffer, SubMeshIndex, SubMeshParams};
use super::texture_set::{
    attribute_texel, matrix_bytes, matrix_texel, offset_bytes, offset_texel, DataTextureSet,
    WriteMode,
};

/// Identity of a layer within its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(u64);

impl LayerId {
    /// Raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// Hands out layer ids in creation order.
#[derive(Debug, Default)]
pub struct LayerIdGenerator {
    next: u64,
}

impl LayerIdGenerator {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused id.
    pub fn next_id(&mut self) -> LayerId {
        let id = LayerId(self.next);
        self.next += 1;
        id
    }
}

/// How texel writes reach the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateMode {
    /// Each write is uploaded as it happens.
    #[default]
    Immediate,
    /// Writes patch the host mirror; the next flush uploads whole textures.
    Batching,
}

/// Handle of a mesh within one layer.
///
/// A mesh owns one sub-mesh per geometry bucket. Every mutation fans out to
/// all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerMeshIndex(pub u32);

/// What renderer drivers read from a built layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    /// Relative-to-center origin of the layer.
    pub origin: DVec3,
    /// Primitive kind.
    pub primitive: Primitive,
    /// Stored vertices.
    pub num_vertices: u32,
    /// Live triangle index components per width.
    pub num_indices: PerWidth<u32>,
    /// Live edge index components per width.
    pub num_edge_indices: PerWidth<u32>,
    /// Triangle draw slots per width, including alignment padding.
    pub num_triangle_slots: PerWidth<u32>,
    /// Edge draw slots per width, including alignment padding.
    pub num_edge_slots: PerWidth<u32>,
}

impl RenderState {
    /// Live 8-bit triangle index components.
    pub fn num_indices_8_bits(&self) -> u32 {
        self.num_indices.bits8
    }

    /// Live 16-bit triangle index components.
    pub fn num_indices_16_bits(&self) -> u32 {
        self.num_indices.bits16
    }

    /// Live 32-bit triangle index components.
    pub fn num_indices_32_bits(&self) -> u32 {
        self.num_indices.bits32
    }

    /// Live 8-bit edge index components.
    pub fn num_edge_indices_8_bits(&self) -> u32 {
        self.num_edge_indices.bits8
    }

    /// Live 16-bit edge index components.
    pub fn num_edge_indices_16_bits(&self) -> u32 {
        self.num_edge_indices.bits16
    }

    /// Live 32-bit edge index components.
    pub fn num_edge_indices_32_bits(&self) -> u32 {
        self.num_edge_indices.bits32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SubMeshState {
    flags: MeshFlags,
    transparent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubMeshRange {
    first: u32,
    count: u32,
}

/// Cache key of a stored bucket: geometry id and bucket index.
type BucketKey = (String, usize);

enum LayerPhase {
    Accepting {
        buffer: DataTextureBuffer,
        buckets: HashMap<BucketKey, BucketHandle>,
    },
    Built {
        textures: DataTextureSet,
        render_state: RenderState,
        programs: Vec<ProgramKey>,
    },
    Destroyed,
}

/// A layer of meshes packed into data textures.
pub struct RendererLayer {
    id: LayerId,
    primitive: Primitive,
    origin: DVec3,
    config: LayerConfig,
    device: Arc<GraphicsDevice>,
    phase: LayerPhase,
    meshes: Vec<SubMeshRange>,
    sub_meshes: Vec<SubMeshState>,
    counts: MeshCounts,
    model_counts: SharedMeshCounts,
    update_mode: UpdateMode,
    updates_in_frame: u32,
}

impl RendererLayer {
    /// Create an empty layer for one triangle primitive kind.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::UnsupportedPrimitive`] for points and lines,
    /// which go to instancing layers, and [`LayerError::CapacityExceeded`]
    /// when `config.max_sub_meshes` is above [`MAX_MESHES_IN_LAYER`].
    pub fn new(
        device: Arc<GraphicsDevice>,
        id: LayerId,
        primitive: Primitive,
        config: LayerConfig,
    ) -> Result<Self, LayerError> {
        if !primitive.is_triangles() {
            return Err(LayerError::UnsupportedPrimitive(format!(
                "data-texture layers hold triangles, not {primitive}"
            )));
        }
        if config.max_sub_meshes > MAX_MESHES_IN_LAYER {
            return Err(LayerError::CapacityExceeded(format!(
                "{} sub-meshes requested, sub-mesh ids stop at {MAX_MESHES_IN_LAYER}",
                config.max_sub_meshes
            )));
        }
        log::debug!("RendererLayer: created {id} for {primitive}");
        Ok(Self {
            id,
            primitive,
            origin: DVec3::ZERO,
            config,
            device,
            phase: LayerPhase::Accepting {
                buffer: DataTextureBuffer::new(),
                buckets: HashMap::new(),
            },
            meshes: Vec::new(),
            sub_meshes: Vec::new(),
            counts: MeshCounts::new(),
            model_counts: SharedMeshCounts::new(),
            update_mode: UpdateMode::Immediate,
            updates_in_frame: 0,
        })
    }

    /// Set the relative-to-center origin.
    pub fn with_origin(mut self, origin: DVec3) -> Self {
        self.origin = origin;
        self
    }

    /// Share model-level counts with other layers of the same model.
    pub fn with_model_counts(mut self, model_counts: SharedMeshCounts) -> Self {
        self.model_counts = model_counts;
        self
    }

    /// Layer id.
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// Primitive kind.
    pub fn primitive(&self) -> Primitive {
        self.primitive
    }

    /// Relative-to-center origin.
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Draw ordering key.
    pub fn sort_key(&self) -> (Primitive, LayerId) {
        (self.primitive, self.id)
    }

    /// Configuration.
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    /// Current update mode.
    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// Layer-level counts.
    pub fn counts(&self) -> MeshCounts {
        self.counts
    }

    /// Model-level counts this layer contributes to.
    pub fn model_counts(&self) -> &SharedMeshCounts {
        &self.model_counts
    }

    /// Number of meshes.
    pub fn num_meshes(&self) -> usize {
        self.meshes.len()
    }

    /// Number of sub-meshes.
    pub fn num_sub_meshes(&self) -> usize {
        self.sub_meshes.len()
    }

    /// Returns true if no mesh was added.
    pub fn is_empty(&self) -> bool {
        self.sub_meshes.is_empty()
    }

    /// Returns true once built and until destroyed.
    pub fn is_built(&self) -> bool {
        matches!(self.phase, LayerPhase::Built { .. })
    }

    /// Returns true after [`destroy`](Self::destroy).
    pub fn is_destroyed(&self) -> bool {
        matches!(self.phase, LayerPhase::Destroyed)
    }

    /// Sub-meshes of a mesh.
    pub fn sub_meshes(
        &self,
        mesh: LayerMeshIndex,
    ) -> Result<impl Iterator<Item = SubMeshIndex>, LayerError> {
        let range = self.range(mesh)?;
        Ok((range.first..range.first + range.count).map(SubMeshIndex))
    }

    /// Whether `geometry` still fits in this layer.
    ///
    /// Counts one sub-mesh per bucket, and for buckets not already stored,
    /// their vertices and aligned triangles and edges against the texture
    /// limits.
    ///
    /// # Errors
    ///
    /// Fails once the layer is built or destroyed.
    pub fn can_create_layer_mesh(&self, geometry: &SceneGeometry) -> Result<bool, LayerError> {
        let (buffer, buckets) = match &self.phase {
            LayerPhase::Accepting { buffer, buckets } => (buffer, buckets),
            LayerPhase::Built { .. } => return Err(LayerError::AlreadyBuilt),
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
        };

        let sub_meshes = buffer.num_sub_meshes() as u64 + geometry.buckets().len() as u64;
        if sub_meshes > self.config.max_sub_meshes as u64 {
            return Ok(false);
        }

        let max_texels = self.config.max_texels();
        let mut vertices = buffer.num_vertices() as u64;
        let mut triangles = buffer.stored_triangles().map(|_, &n| n as u64);
        let mut edges = buffer.stored_edges().map(|_, &n| n as u64);
        let mut triangle_slots = buffer.triangle_slots().map(|_, &n| n as u64);
        let mut edge_slots = buffer.edge_slots().map(|_, &n| n as u64);

        for (bucket_index, bucket) in geometry.buckets().iter().enumerate() {
            let width = bucket.width();
            let aligned_triangles = align_to_block(bucket.num_triangles() as u32);
            let aligned_edges = align_to_block(bucket.num_edges() as u32);
            *triangle_slots.get_mut(width) += aligned_triangles as u64;
            *edge_slots.get_mut(width) += aligned_edges as u64;

            let key = (geometry.id().to_string(), bucket_index);
            if !buckets.contains_key(&key) {
                vertices += bucket.num_vertices() as u64;
                *triangles.get_mut(width) += aligned_triangles as u64;
                *edges.get_mut(width) += aligned_edges as u64;
            }
        }

        let block = INDEX_ALIGNMENT_BLOCK as u64;
        let fits = vertices <= max_texels
            && IndexWidth::ALL.into_iter().all(|width| {
                *triangles.get(width) <= max_texels
                    && *edges.get(width) <= max_texels
                    && *triangle_slots.get(width) / block <= max_texels
                    && *edge_slots.get(width) / block <= max_texels
            });
        Ok(fits)
    }

    /// Add a mesh, one sub-mesh per bucket of its geometry.
    ///
    /// Buckets already stored for an earlier mesh of the same geometry are
    /// reused. The new sub-meshes start with no flags set.
    ///
    /// # Errors
    ///
    /// Fails once built, for a geometry of another primitive, for a geometry
    /// with no vertices or no triangles, and with [`LayerError::CapacityExceeded`] when
    /// [`can_create_layer_mesh`](Self::can_create_layer_mesh) would refuse.
    pub fn create_layer_mesh(
        &mut self,
        params: &LayerMeshParams,
        mesh: &SceneMesh,
    ) -> Result<LayerMeshIndex, LayerError> {
        let geometry = &mesh.geometry;
        if !self.can_create_layer_mesh(geometry)? {
            return Err(LayerError::CapacityExceeded(format!(
                "{} has no room for geometry {}",
                self.id,
                geometry.id()
            )));
        }
        if geometry.primitive() != self.primitive {
            return Err(LayerError::UnsupportedPrimitive(format!(
                "{} geometry {} in a {} layer",
                geometry.primitive(),
                geometry.id(),
                self.primitive
            )));
        }
        if geometry.is_empty() || geometry.buckets().is_empty() {
            return Err(LayerError::InvalidGeometry(format!(
                "{} has nothing to draw",
                geometry.id()
            )));
        }

        let LayerPhase::Accepting { buffer, buckets } = &mut self.phase else {
            return Err(LayerError::AlreadyBuilt);
        };

        let sub_mesh_params = SubMeshParams {
            color: mesh.color,
            pick_color: params.pick_color,
            solid: self.primitive == Primitive::Solid,
            decode_matrix: geometry.positions_decode_matrix(),
            instance_matrix: mesh.matrix.unwrap_or(Mat4::IDENTITY),
            offset: params.offset,
        };

        let first = buffer.num_sub_meshes();
        for (bucket_index, bucket) in geometry.buckets().iter().enumerate() {
            let handle = *buckets
                .entry((geometry.id().to_string(), bucket_index))
                .or_insert_with(|| buffer.append_bucket(bucket));
            buffer.append_sub_mesh(&handle, &sub_mesh_params)?;
            self.sub_meshes.push(SubMeshState::default());
            self.counts.add_mesh();
            self.model_counts.update(0, MeshCounts::add_mesh);
        }

        let index = LayerMeshIndex(self.meshes.len() as u32);
        self.meshes.push(SubMeshRange {
            first,
            count: geometry.buckets().len() as u32,
        });

        log::trace!(
            "RendererLayer: {} mesh {} -> sub-meshes {}..{}",
            self.id,
            index.0,
            first,
            buffer.num_sub_meshes()
        );
        Ok(index)
    }

    /// Upload the staging buffer and switch to the built phase.
    ///
    /// # Errors
    ///
    /// Fails when called twice, after destroy, or when the layer is empty
    /// ([`LayerError::EmptyTexture`]). A failed build leaves the layer
    /// accepting.
    pub fn build(&mut self) -> Result<(), LayerError> {
        let buffer = match &self.phase {
            LayerPhase::Accepting { buffer, .. } => buffer,
            LayerPhase::Built { .. } => return Err(LayerError::AlreadyFinalized),
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
        };

        let textures = DataTextureSet::new(&self.device, buffer, &self.config)?;
        let render_state = RenderState {
            origin: self.origin,
            primitive: self.primitive,
            num_vertices: buffer.num_vertices(),
            num_indices: buffer.live_indices(),
            num_edge_indices: buffer.live_edge_indices(),
            num_triangle_slots: buffer.triangle_slots(),
            num_edge_slots: buffer.edge_slots(),
        };
        let programs = self.resolve_programs(&render_state);

        log::debug!(
            "RendererLayer: built {} ({} meshes, {} sub-meshes, {} vertices, {} programs)",
            self.id,
            self.meshes.len(),
            self.sub_meshes.len(),
            render_state.num_vertices,
            programs.len()
        );

        self.phase = LayerPhase::Built {
            textures,
            render_state,
            programs,
        };
        Ok(())
    }

    fn resolve_programs(&self, render_state: &RenderState) -> Vec<ProgramKey> {
        let mut features = ProgramFeatures::CLIPPING | ProgramFeatures::OFFSETS;
        if self.primitive == Primitive::Solid {
            features |= ProgramFeatures::SOLID;
        }
        let mut programs = Vec::new();
        for (width, &slots) in render_state.num_triangle_slots.iter() {
            if slots > 0 {
                programs.push(ProgramKey::new(
                    ProgramVariant::DataTextureTriangles,
                    self.primitive,
                    Some(width),
                    features,
                ));
            }
        }
        for (width, &slots) in render_state.num_edge_slots.iter() {
            if slots > 0 {
                programs.push(ProgramKey::new(
                    ProgramVariant::DataTextureEdges,
                    self.primitive,
                    Some(width),
                    features,
                ));
            }
        }
        programs
    }

    /// Renderer-facing state of the built layer.
    pub fn render_state(&self) -> Result<&RenderState, LayerError> {
        match &self.phase {
            LayerPhase::Built { render_state, .. } => Ok(render_state),
            LayerPhase::Accepting { .. } => Err(LayerError::NotFinalized),
            LayerPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    /// Textures of the built layer.
    pub fn data_texture_set(&self) -> Result<&DataTextureSet, LayerError> {
        match &self.phase {
            LayerPhase::Built { textures, .. } => Ok(textures),
            LayerPhase::Accepting { .. } => Err(LayerError::NotFinalized),
            LayerPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    /// Programs resolved at build.
    pub fn programs(&self) -> Result<&[ProgramKey], LayerError> {
        match &self.phase {
            LayerPhase::Built { programs, .. } => Ok(programs),
            LayerPhase::Accepting { .. } => Err(LayerError::NotFinalized),
            LayerPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    fn range(&self, mesh: LayerMeshIndex) -> Result<SubMeshRange, LayerError> {
        self.meshes
            .get(mesh.0 as usize)
            .copied()
            .ok_or(LayerError::InvalidMeshIndex(mesh.0))
    }

    fn ensure_built(&self) -> Result<(), LayerError> {
        self.data_texture_set().map(|_| ())
    }

    /// Write mode for the next texel write, advancing the per-frame counter.
    fn next_write_mode(&mut self) -> WriteMode {
        if self.update_mode == UpdateMode::Batching {
            return WriteMode::Deferred;
        }
        self.updates_in_frame += 1;
        if self.updates_in_frame > self.config.batch_update_threshold {
            log::debug!(
                "RendererLayer: {} switching to batched updates after {} writes",
                self.id,
                self.updates_in_frame - 1
            );
            self.update_mode = UpdateMode::Batching;
            return WriteMode::Deferred;
        }
        WriteMode::Immediate
    }

    fn textures_mut(&mut self) -> Result<&mut DataTextureSet, LayerError> {
        match &mut self.phase {
            LayerPhase::Built { textures, .. } => Ok(textures),
            LayerPhase::Accepting { .. } => Err(LayerError::NotFinalized),
            LayerPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    /// Apply a flag change to every sub-mesh of a mesh.
    ///
    /// `mode` forces a write mode; `None` follows the update policy.
    fn update_flags(
        &mut self,
        mesh: LayerMeshIndex,
        mode: Option<WriteMode>,
        change: impl Fn(SubMeshState) -> SubMeshState,
    ) -> Result<(), LayerError> {
        self.ensure_built()?;
        let range = self.range(mesh)?;

        for index in range.first..range.first + range.count {
            let sub_mesh = SubMeshIndex(index);
            let old = self.sub_meshes[sub_mesh.index()];
            let new = change(old);
            if new == old {
                continue;
            }

            let old_row = RenderPassRow::from_flags(old.flags, old.transparent);
            let new_row = RenderPassRow::from_flags(new.flags, new.transparent);
            let clippable = new.flags.contains(MeshFlags::CLIPPABLE);
            let clippable_changed = old.flags.contains(MeshFlags::CLIPPABLE) != clippable;

            let (x, y) = attribute_texel(sub_mesh);
            if old_row != new_row {
                let mode = mode.unwrap_or_else(|| self.next_write_mode());
                let device = Arc::clone(&self.device);
                self.textures_mut()?.attributes.write_texels(
                    &device,
                    x + (row::PASSES / 4) as u32,
                    y,
                    &new_row.to_bytes(),
                    mode,
                )?;
            }
            if clippable_changed {
                let mode = mode.unwrap_or_else(|| self.next_write_mode());
                let device = Arc::clone(&self.device);
                self.textures_mut()?.attributes.write_texels(
                    &device,
                    x + (row::SECONDARY / 4) as u32,
                    y,
                    &[clippable as u8, 0, 0, 0],
                    mode,
                )?;
            }

            // Commit only once the texels are written.
            self.counts
                .apply(old.flags, old.transparent, new.flags, new.transparent);
            self.model_counts.update(0, |counts| {
                counts.apply(old.flags, old.transparent, new.flags, new.transparent)
            });
            self.sub_meshes[sub_mesh.index()] = new;
        }
        Ok(())
    }

    fn set_flag(
        &mut self,
        mesh: LayerMeshIndex,
        flag: MeshFlags,
        on: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(mesh, None, |mut state| {
            state.flags.set(flag, on);
            state
        })
    }

    /// Replace all flags and the transparency of a mesh.
    pub fn set_layer_mesh_flags(
        &mut self,
        mesh: LayerMeshIndex,
        flags: MeshFlags,
        transparent: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(mesh, None, |_| SubMeshState { flags, transparent })
    }

    /// Show or hide a mesh.
    pub fn set_layer_mesh_visible(
        &mut self,
        mesh: LayerMeshIndex,
        visible: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::VISIBLE, visible)
    }

    /// Highlight a mesh.
    pub fn set_layer_mesh_highlighted(
        &mut self,
        mesh: LayerMeshIndex,
        highlighted: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::HIGHLIGHTED, highlighted)
    }

    /// X-ray a mesh.
    pub fn set_layer_mesh_xrayed(
        &mut self,
        mesh: LayerMeshIndex,
        xrayed: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::XRAYED, xrayed)
    }

    /// Select a mesh.
    pub fn set_layer_mesh_selected(
        &mut self,
        mesh: LayerMeshIndex,
        selected: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::SELECTED, selected)
    }

    /// Draw the edges of a mesh.
    pub fn set_layer_mesh_edges(
        &mut self,
        mesh: LayerMeshIndex,
        edges: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::EDGES, edges)
    }

    /// Let section planes clip a mesh.
    pub fn set_layer_mesh_clippable(
        &mut self,
        mesh: LayerMeshIndex,
        clippable: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::CLIPPABLE, clippable)
    }

    /// Cull a mesh.
    pub fn set_layer_mesh_culled(
        &mut self,
        mesh: LayerMeshIndex,
        culled: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::CULLED, culled)
    }

    /// Make a mesh pickable.
    pub fn set_layer_mesh_pickable(
        &mut self,
        mesh: LayerMeshIndex,
        pickable: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::PICKABLE, pickable)
    }

    /// Make a mesh collidable. No texture holds this flag.
    pub fn set_layer_mesh_collidable(
        &mut self,
        mesh: LayerMeshIndex,
        collidable: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(mesh, MeshFlags::COLLIDABLE, collidable)
    }

    /// Draw a mesh in the transparent passes.
    pub fn set_layer_mesh_transparent(
        &mut self,
        mesh: LayerMeshIndex,
        transparent: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(mesh, None, |state| SubMeshState {
            transparent,
            ..state
        })
    }

    /// Set the color of a mesh.
    pub fn set_layer_mesh_color(
        &mut self,
        mesh: LayerMeshIndex,
        color: [u8; 4],
    ) -> Result<(), LayerError> {
        self.write_per_sub_mesh(mesh, |sub_mesh| {
            let (x, y) = attribute_texel(sub_mesh);
            (Target::Attributes, x + (row::COLOR / 4) as u32, y, color.to_vec())
        })
    }

    /// Set the offset of a mesh.
    pub fn set_layer_mesh_offset(
        &mut self,
        mesh: LayerMeshIndex,
        offset: Vec3,
    ) -> Result<(), LayerError> {
        let bytes = offset_bytes(offset);
        self.write_per_sub_mesh(mesh, |sub_mesh| {
            let (x, y) = offset_texel(sub_mesh);
            (Target::Offsets, x, y, bytes.to_vec())
        })
    }

    /// Set the instance matrix of a mesh.
    pub fn set_layer_mesh_matrix(
        &mut self,
        mesh: LayerMeshIndex,
        matrix: Mat4,
    ) -> Result<(), LayerError> {
        let bytes = matrix_bytes(&matrix);
        self.write_per_sub_mesh(mesh, |sub_mesh| {
            let (x, y) = matrix_texel(sub_mesh);
            (Target::InstanceMatrices, x, y, bytes.to_vec())
        })
    }

    fn write_per_sub_mesh(
        &mut self,
        mesh: LayerMeshIndex,
        texels: impl Fn(SubMeshIndex) -> (Target, u32, u32, Vec<u8>),
    ) -> Result<(), LayerError> {
        self.ensure_built()?;
        let range = self.range(mesh)?;
        let device = Arc::clone(&self.device);
        for index in range.first..range.first + range.count {
            let (target, x, y, data) = texels(SubMeshIndex(index));
            let mode = self.next_write_mode();
            let textures = self.textures_mut()?;
            let texture = match target {
                Target::Attributes => &mut textures.attributes,
                Target::Offsets => &mut textures.offsets,
                Target::InstanceMatrices => &mut textures.instance_matrices,
            };
            texture.write_texels(&device, x, y, &data, mode)?;
        }
        Ok(())
    }

    /// Set the initial flags of a mesh.
    ///
    /// Always writes deferred; call [`flush_init_flags`](Self::flush_init_flags)
    /// once every mesh is initialized.
    pub fn init_flags(
        &mut self,
        mesh: LayerMeshIndex,
        flags: MeshFlags,
        transparent: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(mesh, Some(WriteMode::Deferred), |_| SubMeshState {
            flags,
            transparent,
        })
    }

    /// Upload the flags written by [`init_flags`](Self::init_flags).
    pub fn flush_init_flags(&mut self) -> Result<usize, LayerError> {
        let device = Arc::clone(&self.device);
        self.textures_mut()?.flush(&device)
    }

    /// Start a batch: every write until the next [`flush`](Self::flush) is deferred.
    pub fn begin_deferred_flags(&mut self) -> Result<(), LayerError> {
        self.ensure_built()?;
        self.update_mode = UpdateMode::Batching;
        Ok(())
    }

    /// End-of-frame commit.
    ///
    /// Uploads every dirty texture whole, resets the per-frame write counter
    /// and returns to [`UpdateMode::Immediate`]. A layer that is not built yet
    /// has nothing to flush. Returns the number of texture uploads.
    pub fn flush(&mut self) -> Result<usize, LayerError> {
        let uploads = match &mut self.phase {
            LayerPhase::Accepting { .. } => 0,
            LayerPhase::Built { textures, .. } => textures.flush(&self.device)?,
            LayerPhase::Destroyed => return Err(LayerError::Destroyed),
        };
        if self.update_mode == UpdateMode::Batching {
            log::debug!(
                "RendererLayer: {} flushed {uploads} textures, back to immediate updates",
                self.id
            );
        }
        self.update_mode = UpdateMode::Immediate;
        self.updates_in_frame = 0;
        Ok(uploads)
    }

    /// Flags and transparency of a mesh (of its first sub-mesh).
    pub fn layer_mesh_flags(
        &self,
        mesh: LayerMeshIndex,
    ) -> Result<(MeshFlags, bool), LayerError> {
        let range = self.range(mesh)?;
        let state = self
            .sub_meshes
            .get(range.first as usize)
            .copied()
            .ok_or(LayerError::InvalidMeshIndex(mesh.0))?;
        Ok((state.flags, state.transparent))
    }

    /// Color of a mesh as stored in the attribute texture.
    pub fn layer_mesh_color(&self, mesh: LayerMeshIndex) -> Result<[u8; 4], LayerError> {
        let range = self.range(mesh)?;
        let textures = self.data_texture_set()?;
        let (x, y) = attribute_texel(SubMeshIndex(range.first));
        let bytes = textures
            .attributes
            .read_texels(x, y, 4)
            .ok_or(LayerError::InvalidMeshIndex(mesh.0))?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Draw calls a driver issues for `pass`.
    ///
    /// Empty when counts show no mesh can take part. Otherwise one call per
    /// index width that has slots, covering every slot of that width.
    pub fn draw_calls(&self, pass: RenderPass) -> Result<Vec<DrawCall>, LayerError> {
        let LayerPhase::Built {
            render_state,
            programs,
            ..
        } = &self.phase
        else {
            return Err(match self.phase {
                LayerPhase::Destroyed => LayerError::Destroyed,
                _ => LayerError::NotFinalized,
            });
        };
        if !self.counts.may_draw(pass) {
            return Ok(Vec::new());
        }

        let variant = ProgramVariant::data_texture(pass);
        let calls = programs
            .iter()
            .filter(|program| program.variant == variant)
            .filter_map(|program| {
                let width = program.width?;
                let element_count = if pass.is_edges() {
                    render_state.num_edge_slots.get(width) * 2
                } else {
                    render_state.num_triangle_slots.get(width) * 3
                };
                Some(DrawCall {
                    pass,
                    program: *program,
                    element_count,
                    instance_count: 1,
                })
            })
            .collect();
        Ok(calls)
    }

    /// Release every GPU resource.
    ///
    /// The layer's meshes leave the model counts. Later calls fail with
    /// [`LayerError::Destroyed`]; destroying twice is a no-op.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        for state in &self.sub_meshes {
            self.model_counts
                .update(0, |counts| counts.remove_mesh(state.flags, state.transparent));
        }
        self.counts = MeshCounts::new();
        self.phase = LayerPhase::Destroyed;
        log::debug!("RendererLayer: destroyed {}", self.id);
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Attributes,
    Offsets,
    InstanceMatrices,
}

impl std::fmt::Debug for RendererLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self.phase {
            LayerPhase::Accepting { .. } => "accepting",
            LayerPhase::Built { .. } => "built",
            LayerPhase::Destroyed => "destroyed",
        };
        f.debug_struct("RendererLayer")
            .field("id", &self.id)
            .field("primitive", &self.primitive)
            .field("phase", &phase)
            .field("meshes", &self.meshes.len())
            .field("sub_meshes", &self.sub_meshes.len())
            .field("update_mode", &self.update_mode)
            .finish()
    }
}

static_assertions::assert_impl_all!(RendererLayer: Send, Sync);
