//! Instancing layer.
//!
//! An [`InstancingLayer`] draws many copies of one shared geometry with GPU
//! instancing. The geometry is uploaded once as ordinary vertex and index
//! buffers; every instance adds one element to each per-instance attribute
//! buffer. Flags live in one packed float per instance and there is one
//! flags buffer per attached view, so views can show the same layer with
//! different highlight, selection and visibility states.
//!
//! Every write goes straight to the GPU. There is no batching mode.

use std::sync::Arc;

use glam::{DVec3, Mat4, Vec3};

use crate::device::GraphicsDevice;
use crate::error::LayerError;
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, BufferUsage};

use super::bucket::IndexWidth;
use super::config::InstancingLayerConfig;
use super::counts::{MeshCounts, SharedMeshCounts};
use super::flags::{MeshFlags, RenderPass, RenderPassRow};
use super::geometry::{LayerMeshParams, Primitive, SceneGeometry, SceneMesh};
use super::program::{DrawCall, ProgramFeatures, ProgramKey, ProgramVariant};
use super::renderer_layer::{LayerId, LayerMeshIndex};

/// Bytes of one packed flags value.
const FLAGS_STRIDE: u64 = 4;
/// Bytes of one RGBA8 color.
const COLOR_STRIDE: u64 = 4;

/// What renderer drivers read from a built instancing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct InstancingRenderState {
    /// Relative-to-center origin of the layer.
    pub origin: DVec3,
    /// Primitive kind of the shared geometry.
    pub primitive: Primitive,
    /// Vertices of the shared geometry.
    pub num_vertices: u32,
    /// Width of the shared index buffers, if the geometry is indexed.
    pub index_width: Option<IndexWidth>,
    /// Index components of the shared geometry.
    pub num_indices: u32,
    /// Edge index components of the shared geometry.
    pub num_edge_indices: u32,
    /// Instances.
    pub num_instances: u32,
    /// The geometry has texture coordinates.
    pub has_uvs: bool,
}

/// GPU buffers of a built instancing layer.
#[derive(Debug)]
pub struct InstancingBuffers {
    /// Shared quantized positions, `u16 x 3` per vertex.
    pub positions: Buffer,
    /// Shared indices.
    pub indices: Option<Buffer>,
    /// Shared edge indices.
    pub edge_indices: Option<Buffer>,
    /// Shared quantized UVs, `u16 x 2` per vertex.
    pub uvs: Option<Buffer>,
    /// RGBA8 color per instance.
    pub colors: Buffer,
    /// Metallic and roughness bytes per instance.
    pub metallic_roughness: Buffer,
    /// RGBA8 pick color per instance.
    pub pick_colors: Buffer,
    /// First three rows of the model matrix, one `vec4` buffer per row.
    pub matrix_rows: [Buffer; 3],
    /// Offset per instance, `f32 x 3`.
    pub offsets: Buffer,
    /// Packed flags per instance, one buffer per view.
    pub flags: Vec<Buffer>,
}

impl InstancingBuffers {
    /// Every buffer, shared and per-instance.
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        [&self.positions, &self.colors, &self.metallic_roughness, &self.pick_colors]
            .into_iter()
            .chain(self.indices.iter())
            .chain(self.edge_indices.iter())
            .chain(self.uvs.iter())
            .chain(self.matrix_rows.iter())
            .chain(std::iter::once(&self.offsets))
            .chain(self.flags.iter())
    }

    /// Total bytes across all buffers.
    pub fn size_bytes(&self) -> u64 {
        self.buffers().map(Buffer::size).sum()
    }
}

#[derive(Debug, Clone, Default)]
struct InstanceStaging {
    colors: Vec<u8>,
    metallic_roughness: Vec<u8>,
    pick_colors: Vec<u8>,
    matrix_rows: [Vec<f32>; 3],
    offsets: Vec<f32>,
}

impl InstanceStaging {
    fn push(&mut self, params: &LayerMeshParams, mesh: &SceneMesh) {
        let matrix = mesh.matrix.unwrap_or(Mat4::IDENTITY);
        self.colors.extend_from_slice(&mesh.color);
        self.metallic_roughness
            .extend_from_slice(&[mesh.metallic, mesh.roughness]);
        self.pick_colors.extend_from_slice(&params.pick_color);
        for (index, row) in self.matrix_rows.iter_mut().enumerate() {
            row.extend_from_slice(&matrix.row(index).to_array());
        }
        self.offsets.extend_from_slice(&params.offset.to_array());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct InstanceState {
    flags: MeshFlags,
    transparent: bool,
}

#[derive(Debug, Clone, Default)]
struct ViewState {
    instances: Vec<InstanceState>,
    counts: MeshCounts,
}

enum InstancingPhase {
    Accepting(InstanceStaging),
    Built {
        buffers: InstancingBuffers,
        render_state: InstancingRenderState,
        programs: Vec<ProgramKey>,
    },
    Destroyed,
}

/// A layer of instances of one shared geometry.
pub struct InstancingLayer {
    id: LayerId,
    origin: DVec3,
    geometry: Arc<SceneGeometry>,
    config: InstancingLayerConfig,
    device: Arc<GraphicsDevice>,
    phase: InstancingPhase,
    num_instances: u32,
    views: Vec<ViewState>,
    model_counts: SharedMeshCounts,
}

impl InstancingLayer {
    /// Create an empty layer for instances of `geometry`, with one view.
    pub fn new(
        device: Arc<GraphicsDevice>,
        id: LayerId,
        geometry: Arc<SceneGeometry>,
        config: InstancingLayerConfig,
    ) -> Self {
        log::debug!(
            "InstancingLayer: created {id} for {} geometry {}",
            geometry.primitive(),
            geometry.id()
        );
        Self {
            id,
            origin: DVec3::ZERO,
            geometry,
            config,
            device,
            phase: InstancingPhase::Accepting(InstanceStaging::default()),
            num_instances: 0,
            views: vec![ViewState::default()],
            model_counts: SharedMeshCounts::new(),
        }
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

    /// Primitive kind of the shared geometry.
    pub fn primitive(&self) -> Primitive {
        self.geometry.primitive()
    }

    /// Draw ordering key.
    pub fn sort_key(&self) -> (Primitive, LayerId) {
        (self.primitive(), self.id)
    }

    /// The shared geometry.
    pub fn geometry(&self) -> &Arc<SceneGeometry> {
        &self.geometry
    }

    /// Model-level counts this layer contributes to.
    pub fn model_counts(&self) -> &SharedMeshCounts {
        &self.model_counts
    }

    /// Number of instances.
    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    /// Number of attached views.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Always false; an instancing layer is never skipped as empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true once built and until destroyed.
    pub fn is_built(&self) -> bool {
        matches!(self.phase, InstancingPhase::Built { .. })
    }

    /// Returns true after [`destroy`](Self::destroy).
    pub fn is_destroyed(&self) -> bool {
        matches!(self.phase, InstancingPhase::Destroyed)
    }

    /// Counts of one view.
    pub fn counts(&self, view: usize) -> Result<MeshCounts, LayerError> {
        Ok(self.view(view)?.counts)
    }

    fn view(&self, view: usize) -> Result<&ViewState, LayerError> {
        self.views.get(view).ok_or(LayerError::InvalidViewIndex(view))
    }

    /// Attach another view and return its index.
    ///
    /// Every existing instance starts with no flags in the new view. On a
    /// built layer the view's flags buffer is created right away.
    pub fn add_view(&mut self) -> Result<usize, LayerError> {
        let view = self.views.len();
        let label = self.label(&format!("flags.{view}"));
        match &mut self.phase {
            InstancingPhase::Accepting(_) => {}
            InstancingPhase::Built { buffers, .. } => {
                let zeros = vec![0; (self.num_instances as u64 * FLAGS_STRIDE) as usize];
                buffers
                    .flags
                    .push(create_buffer(&self.device, &label, BufferUsage::VERTEX, &zeros)?);
            }
            InstancingPhase::Destroyed => return Err(LayerError::Destroyed),
        }

        let mut counts = MeshCounts::new();
        for _ in 0..self.num_instances {
            counts.add_mesh();
        }
        self.model_counts.update(view, |model| *model += counts);
        self.views.push(ViewState {
            instances: vec![InstanceState::default(); self.num_instances as usize],
            counts,
        });
        log::debug!("InstancingLayer: {} attached view {view}", self.id);
        Ok(view)
    }

    /// Whether another instance of `geometry` fits in this layer.
    ///
    /// Instances of any other geometry never fit.
    pub fn can_create_layer_mesh(&self, geometry: &SceneGeometry) -> Result<bool, LayerError> {
        match self.phase {
            InstancingPhase::Accepting(_) => {}
            InstancingPhase::Built { .. } => return Err(LayerError::AlreadyBuilt),
            InstancingPhase::Destroyed => return Err(LayerError::Destroyed),
        }
        Ok(geometry.id() == self.geometry.id() && self.num_instances < self.config.max_instances)
    }

    /// Add an instance of the shared geometry.
    pub fn create_layer_mesh(
        &mut self,
        params: &LayerMeshParams,
        mesh: &SceneMesh,
    ) -> Result<LayerMeshIndex, LayerError> {
        if mesh.geometry.id() != self.geometry.id() {
            return Err(LayerError::GeometryMismatch {
                expected: self.geometry.id().to_string(),
                found: mesh.geometry.id().to_string(),
            });
        }
        if !self.can_create_layer_mesh(&mesh.geometry)? {
            return Err(LayerError::CapacityExceeded(format!(
                "{} holds {} instances",
                self.id, self.num_instances
            )));
        }
        let InstancingPhase::Accepting(staging) = &mut self.phase else {
            return Err(LayerError::AlreadyBuilt);
        };

        staging.push(params, mesh);
        for (view, state) in self.views.iter_mut().enumerate() {
            state.instances.push(InstanceState::default());
            state.counts.add_mesh();
            self.model_counts.update(view, MeshCounts::add_mesh);
        }

        let index = LayerMeshIndex(self.num_instances);
        self.num_instances += 1;
        Ok(index)
    }

    fn label(&self, name: &str) -> String {
        let prefix = self.config.label.as_deref().unwrap_or(self.geometry.id());
        format!("{prefix}.{name}")
    }

    /// Upload the shared geometry and every per-instance buffer.
    ///
    /// # Errors
    ///
    /// Fails when called twice, after destroy, and with
    /// [`LayerError::EmptyBuffer`] when the layer has no instances or the
    /// geometry has no vertices.
    pub fn build(&mut self) -> Result<(), LayerError> {
        let staging = match &self.phase {
            InstancingPhase::Accepting(staging) => staging,
            InstancingPhase::Built { .. } => return Err(LayerError::AlreadyFinalized),
            InstancingPhase::Destroyed => return Err(LayerError::Destroyed),
        };

        let device = &self.device;
        let geometry = &self.geometry;
        let num_vertices = (geometry.positions_compressed().len() / 3) as u32;
        let index_width = geometry
            .indices()
            .or(geometry.edge_indices())
            .map(|_| IndexWidth::for_vertex_count(num_vertices as usize));
        let vertex = BufferUsage::VERTEX | BufferUsage::COPY_DST;
        let index = BufferUsage::INDEX;

        let positions = create_buffer(
            device,
            &self.label("positions"),
            vertex,
            bytemuck::cast_slice(geometry.positions_compressed()),
        )?;
        let encode = |indices: &[u32]| {
            index_width
                .map(|width| width.encode(indices))
                .unwrap_or_default()
        };
        let indices = match geometry.indices() {
            Some(indices) if !indices.is_empty() => Some(create_buffer(
                device,
                &self.label("indices"),
                index,
                &encode(indices),
            )?),
            _ => None,
        };
        let edge_indices = match geometry.edge_indices() {
            Some(edges) if !edges.is_empty() => Some(create_buffer(
                device,
                &self.label("edge_indices"),
                index,
                &encode(edges),
            )?),
            _ => None,
        };
        let uvs = match geometry.uvs_compressed() {
            Some(uvs) if !uvs.is_empty() => Some(create_buffer(
                device,
                &self.label("uvs"),
                vertex,
                bytemuck::cast_slice(uvs),
            )?),
            _ => None,
        };

        let colors = create_buffer(device, &self.label("colors"), vertex, &staging.colors)?;
        let metallic_roughness = create_buffer(
            device,
            &self.label("metallic_roughness"),
            vertex,
            &staging.metallic_roughness,
        )?;
        let pick_colors =
            create_buffer(device, &self.label("pick_colors"), vertex, &staging.pick_colors)?;
        let matrix_rows = [
            create_buffer(
                device,
                &self.label("matrix_row0"),
                vertex,
                bytemuck::cast_slice(&staging.matrix_rows[0]),
            )?,
            create_buffer(
                device,
                &self.label("matrix_row1"),
                vertex,
                bytemuck::cast_slice(&staging.matrix_rows[1]),
            )?,
            create_buffer(
                device,
                &self.label("matrix_row2"),
                vertex,
                bytemuck::cast_slice(&staging.matrix_rows[2]),
            )?,
        ];
        let offsets = create_buffer(
            device,
            &self.label("offsets"),
            vertex,
            bytemuck::cast_slice(&staging.offsets),
        )?;

        let zeros = vec![0; (self.num_instances as u64 * FLAGS_STRIDE) as usize];
        let flags = (0..self.views.len())
            .map(|view| {
                let label = self.label(&format!("flags.{view}"));
                create_buffer(device, &label, vertex, &zeros)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let render_state = InstancingRenderState {
            origin: self.origin,
            primitive: geometry.primitive(),
            num_vertices,
            index_width,
            num_indices: geometry.indices().map_or(0, |i| i.len() as u32),
            num_edge_indices: geometry.edge_indices().map_or(0, |e| e.len() as u32),
            num_instances: self.num_instances,
            has_uvs: uvs.is_some(),
        };
        let buffers = InstancingBuffers {
            positions,
            indices,
            edge_indices,
            uvs,
            colors,
            metallic_roughness,
            pick_colors,
            matrix_rows,
            offsets,
            flags,
        };
        let programs = self.resolve_programs(&render_state);

        log::debug!(
            "InstancingLayer: built {} ({} instances of {}, {} views, {} bytes)",
            self.id,
            self.num_instances,
            geometry.id(),
            self.views.len(),
            buffers.size_bytes()
        );

        self.phase = InstancingPhase::Built {
            buffers,
            render_state,
            programs,
        };
        Ok(())
    }

    fn resolve_programs(&self, render_state: &InstancingRenderState) -> Vec<ProgramKey> {
        let primitive = render_state.primitive;
        let mut features = ProgramFeatures::CLIPPING | ProgramFeatures::OFFSETS;
        if primitive == Primitive::Solid {
            features |= ProgramFeatures::SOLID;
        }
        if render_state.has_uvs {
            features |= ProgramFeatures::UVS;
        }

        let mut programs = vec![ProgramKey::new(
            ProgramVariant::instanced(primitive, RenderPass::ColorOpaque),
            primitive,
            render_state.index_width,
            features,
        )];
        if render_state.num_edge_indices > 0 {
            programs.push(ProgramKey::new(
                ProgramVariant::InstancedEdges,
                primitive,
                render_state.index_width,
                features,
            ));
        }
        programs
    }

    /// Renderer-facing state of the built layer.
    pub fn render_state(&self) -> Result<&InstancingRenderState, LayerError> {
        match &self.phase {
            InstancingPhase::Built { render_state, .. } => Ok(render_state),
            InstancingPhase::Accepting(_) => Err(LayerError::NotFinalized),
            InstancingPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    /// Buffers of the built layer.
    pub fn buffers(&self) -> Result<&InstancingBuffers, LayerError> {
        match &self.phase {
            InstancingPhase::Built { buffers, .. } => Ok(buffers),
            InstancingPhase::Accepting(_) => Err(LayerError::NotFinalized),
            InstancingPhase::Destroyed => Err(LayerError::Destroyed),
        }
    }

    /// Check phase, view and instance of a mutation.
    fn check(&self, view: usize, mesh: LayerMeshIndex) -> Result<&InstancingBuffers, LayerError> {
        let buffers = self.buffers()?;
        self.view(view)?;
        if mesh.0 >= self.num_instances {
            return Err(LayerError::InvalidMeshIndex(mesh.0));
        }
        Ok(buffers)
    }

    fn update_flags(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        change: impl FnOnce(InstanceState) -> InstanceState,
    ) -> Result<(), LayerError> {
        self.check(view, mesh)?;
        let state = &mut self.views[view];
        let old = state.instances[mesh.0 as usize];
        let new = change(old);
        if new == old {
            return Ok(());
        }

        state
            .counts
            .apply(old.flags, old.transparent, new.flags, new.transparent);
        self.model_counts.update(view, |counts| {
            counts.apply(old.flags, old.transparent, new.flags, new.transparent)
        });
        state.instances[mesh.0 as usize] = new;

        let value = RenderPassRow::from_flags(new.flags, new.transparent)
            .to_instance_flags(new.flags.contains(MeshFlags::CLIPPABLE));
        let buffers = self.check(view, mesh)?;
        self.device.write_buffer(
            &buffers.flags[view],
            mesh.0 as u64 * FLAGS_STRIDE,
            bytemuck::bytes_of(&value),
        )?;
        Ok(())
    }

    fn set_flag(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        flag: MeshFlags,
        on: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(view, mesh, |mut state| {
            state.flags.set(flag, on);
            state
        })
    }

    /// Replace all flags and the transparency of an instance in one view.
    pub fn set_layer_mesh_flags(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        flags: MeshFlags,
        transparent: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(view, mesh, |_| InstanceState { flags, transparent })
    }

    /// Show or hide an instance.
    pub fn set_layer_mesh_visible(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        visible: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::VISIBLE, visible)
    }

    /// Highlight an instance.
    pub fn set_layer_mesh_highlighted(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        highlighted: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::HIGHLIGHTED, highlighted)
    }

    /// X-ray an instance.
    pub fn set_layer_mesh_xrayed(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        xrayed: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::XRAYED, xrayed)
    }

    /// Select an instance.
    pub fn set_layer_mesh_selected(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        selected: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::SELECTED, selected)
    }

    /// Draw the edges of an instance.
    pub fn set_layer_mesh_edges(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        edges: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::EDGES, edges)
    }

    /// Let section planes clip an instance.
    pub fn set_layer_mesh_clippable(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        clippable: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::CLIPPABLE, clippable)
    }

    /// Cull an instance.
    pub fn set_layer_mesh_culled(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        culled: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::CULLED, culled)
    }

    /// Make an instance pickable.
    pub fn set_layer_mesh_pickable(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        pickable: bool,
    ) -> Result<(), LayerError> {
        self.set_flag(view, mesh, MeshFlags::PICKABLE, pickable)
    }

    /// Draw an instance in the transparent passes.
    pub fn set_layer_mesh_transparent(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        transparent: bool,
    ) -> Result<(), LayerError> {
        self.update_flags(view, mesh, |state| InstanceState {
            transparent,
            ..state
        })
    }

    /// Accepted for parity with data-texture layers; instances keep no
    /// collidable state.
    pub fn set_layer_mesh_collidable(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        _collidable: bool,
    ) -> Result<(), LayerError> {
        self.check(view, mesh).map(|_| ())
    }

    /// Accepted for parity with data-texture layers; instance matrices are
    /// fixed at build.
    pub fn set_layer_mesh_matrix(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        _matrix: Mat4,
    ) -> Result<(), LayerError> {
        self.check(view, mesh).map(|_| ())
    }

    /// Accepted for parity with data-texture layers; offsets are fixed at
    /// build.
    pub fn set_layer_mesh_offset(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        _offset: Vec3,
    ) -> Result<(), LayerError> {
        self.check(view, mesh).map(|_| ())
    }

    /// Set the color of an instance. Colors are shared by every view.
    pub fn set_layer_mesh_color(
        &mut self,
        view: usize,
        mesh: LayerMeshIndex,
        color: [u8; 4],
    ) -> Result<(), LayerError> {
        let buffers = self.check(view, mesh)?;
        self.device
            .write_buffer(&buffers.colors, mesh.0 as u64 * COLOR_STRIDE, &color)?;
        Ok(())
    }

    /// Flags and transparency of an instance in one view.
    pub fn layer_mesh_flags(
        &self,
        view: usize,
        mesh: LayerMeshIndex,
    ) -> Result<(MeshFlags, bool), LayerError> {
        let state = self
            .view(view)?
            .instances
            .get(mesh.0 as usize)
            .ok_or(LayerError::InvalidMeshIndex(mesh.0))?;
        Ok((state.flags, state.transparent))
    }

    /// Nothing is ever deferred; kept so frame loops can flush every layer alike.
    pub fn flush(&mut self) -> Result<usize, LayerError> {
        if self.is_destroyed() {
            return Err(LayerError::Destroyed);
        }
        Ok(0)
    }

    /// Draw calls a driver issues for `pass` in one view.
    pub fn draw_calls(&self, view: usize, pass: RenderPass) -> Result<Vec<DrawCall>, LayerError> {
        let InstancingPhase::Built {
            render_state,
            programs,
            ..
        } = &self.phase
        else {
            return Err(match self.phase {
                InstancingPhase::Destroyed => LayerError::Destroyed,
                _ => LayerError::NotFinalized,
            });
        };
        let counts = self.view(view)?.counts;
        if !counts.may_draw(pass) {
            return Ok(Vec::new());
        }

        let variant = ProgramVariant::instanced(render_state.primitive, pass);
        let element_count = if pass.is_edges() {
            render_state.num_edge_indices
        } else if render_state.num_indices > 0 {
            render_state.num_indices
        } else {
            render_state.num_vertices
        };
        let calls = programs
            .iter()
            .filter(|program| program.variant == variant && element_count > 0)
            .map(|program| DrawCall {
                pass,
                program: *program,
                element_count,
                instance_count: render_state.num_instances,
            })
            .collect();
        Ok(calls)
    }

    /// Release every GPU buffer and leave the model counts of every view.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }
        for (view, state) in self.views.iter_mut().enumerate() {
            for instance in &state.instances {
                self.model_counts.update(view, |counts| {
                    counts.remove_mesh(instance.flags, instance.transparent)
                });
            }
            state.counts = MeshCounts::new();
        }
        self.phase = InstancingPhase::Destroyed;
        log::debug!("InstancingLayer: destroyed {}", self.id);
    }
}

fn create_buffer(
    device: &GraphicsDevice,
    label: &str,
    usage: BufferUsage,
    data: &[u8],
) -> Result<Buffer, LayerError> {
    if data.is_empty() {
        return Err(LayerError::EmptyBuffer {
            label: label.to_string(),
        });
    }
    let descriptor = BufferDescriptor::new(data.len() as u64, usage).with_label(label);
    Ok(device.create_buffer_init(&descriptor, data)?)
}

impl std::fmt::Debug for InstancingLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancingLayer")
            .field("id", &self.id)
            .field("geometry", &self.geometry.id())
            .field("instances", &self.num_instances)
            .field("views", &self.views.len())
            .field("built", &self.is_built())
            .finish()
    }
}

static_assertions::assert_impl_all!(InstancingLayer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::config::BucketingConfig;
    use crate::layers::geometry::GeometryDescriptor;

    fn quad() -> Arc<SceneGeometry> {
        let descriptor = GeometryDescriptor::new("quad", Primitive::Triangles, vec![0; 12])
            .with_indices(vec![0, 1, 2, 0, 2, 3]);
        Arc::new(SceneGeometry::new(descriptor, &BucketingConfig::default()).unwrap())
    }

    fn layer(geometry: &Arc<SceneGeometry>) -> InstancingLayer {
        InstancingLayer::new(
            GraphicsDevice::dummy(),
            crate::layers::LayerIdGenerator::new().next_id(),
            Arc::clone(geometry),
            InstancingLayerConfig::default(),
        )
    }

    #[test]
    fn test_empty_layer_fails_to_build() {
        let geometry = quad();
        let mut layer = layer(&geometry);
        assert_eq!(
            layer.build(),
            Err(LayerError::EmptyBuffer {
                label: "quad.colors".to_string()
            })
        );
        assert!(!layer.is_built());
    }

    #[test]
    fn test_flags_are_packed_per_view() {
        let geometry = quad();
        let mut layer = layer(&geometry);
        let mesh = layer
            .create_layer_mesh(&LayerMeshParams::default(), &SceneMesh::new(Arc::clone(&geometry)))
            .unwrap();
        let second_view = layer.add_view().unwrap();
        layer.build().unwrap();

        layer
            .set_layer_mesh_flags(0, mesh, MeshFlags::VISIBLE | MeshFlags::CLIPPABLE, false)
            .unwrap();

        let device = Arc::clone(&layer.device);
        let buffers = layer.buffers().unwrap();
        let first = device.read_buffer(&buffers.flags[0]).unwrap();
        let second = device.read_buffer(&buffers.flags[second_view]).unwrap();
        let expected = (RenderPass::ColorOpaque.code() as u32 | 1 << 12) as f32;
        assert_eq!(first, expected.to_le_bytes().to_vec());
        assert_eq!(second, vec![0; 4]);

        assert_eq!(layer.counts(0).unwrap().num_visible, 1);
        assert_eq!(layer.counts(second_view).unwrap().num_visible, 0);
    }

    #[test]
    fn test_stubbed_setters_still_validate() {
        let geometry = quad();
        let mut layer = layer(&geometry);
        let mesh = layer
            .create_layer_mesh(&LayerMeshParams::default(), &SceneMesh::new(Arc::clone(&geometry)))
            .unwrap();
        assert_eq!(
            layer.set_layer_mesh_matrix(0, mesh, Mat4::IDENTITY),
            Err(LayerError::NotFinalized)
        );
        layer.build().unwrap();
        assert!(layer.set_layer_mesh_offset(0, mesh, Vec3::ONE).is_ok());
        assert_eq!(
            layer.set_layer_mesh_collidable(3, mesh, true),
            Err(LayerError::InvalidViewIndex(3))
        );
        assert!(!layer.is_empty());
    }
}
