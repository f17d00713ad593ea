//! Layer configuration.
//!
//! Every limit a layer enforces lives here as a named constant plus a field
//! on a config struct, so callers can tighten them (tests do) without
//! touching layer code.

/// Sub-meshes a data-texture layer holds before it refuses new meshes.
pub const MAX_MESHES_IN_LAYER: u32 = 1 << 16;

/// Single-texel writes per frame before a layer switches to batched uploads.
pub const MAX_UPDATES_IN_FRAME_WITHOUT_BATCHING: u32 = 10;

/// Width in texels of the position, index and id-lookup textures.
pub const DATA_TEXTURE_WIDTH: u32 = 4096;

/// Maximum height in rows of any data texture.
pub const MAX_DATA_TEXTURE_HEIGHT: u32 = 1 << 16;

/// Sub-meshes per row of the attribute, matrix and offset textures.
pub const SUB_MESHES_PER_ROW: u32 = 512;

/// Texels per sub-mesh in the attribute texture (8 x RGBA8 = 32 bytes).
pub const TEXELS_PER_SUB_MESH: u32 = 8;

/// Texels per 4x4 matrix in an `Rgba32Float` texture.
pub const TEXELS_PER_MATRIX: u32 = 4;

/// Triangles (or edges) that share one entry of the sub-mesh id tables.
pub const INDEX_ALIGNMENT_BLOCK: u32 = 8;

/// Vertices per bucket when bucketing is enabled.
pub const MAX_VERTICES_PER_BUCKET: u32 = 1 << 16;

/// Instances an instancing layer holds before it refuses new meshes.
pub const MAX_INSTANCES_IN_LAYER: u32 = 1 << 16;

/// Configuration for a data-texture [`RendererLayer`](super::RendererLayer).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerConfig {
    /// Debug label used for the layer's textures.
    pub label: Option<String>,
    /// Single-texel writes within one frame before batching kicks in.
    pub batch_update_threshold: u32,
    /// Sub-mesh capacity. Sub-mesh ids are 16-bit, so layers refuse values
    /// above [`MAX_MESHES_IN_LAYER`].
    pub max_sub_meshes: u32,
    /// Row limit for the position and index textures.
    pub max_data_texture_height: u32,
    /// Column count of the position and index textures.
    pub data_texture_width: u32,
}

impl LayerConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the batching threshold.
    pub fn with_batch_update_threshold(mut self, threshold: u32) -> Self {
        self.batch_update_threshold = threshold;
        self
    }

    /// Set the sub-mesh capacity, at most [`MAX_MESHES_IN_LAYER`].
    pub fn with_max_sub_meshes(mut self, max: u32) -> Self {
        self.max_sub_meshes = max.min(MAX_MESHES_IN_LAYER);
        self
    }

    /// Set the data texture row limit.
    pub fn with_max_data_texture_height(mut self, rows: u32) -> Self {
        self.max_data_texture_height = rows;
        self
    }

    /// Number of texels the position and index textures can address.
    pub fn max_texels(&self) -> u64 {
        self.max_data_texture_height as u64 * self.data_texture_width as u64
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            label: None,
            batch_update_threshold: MAX_UPDATES_IN_FRAME_WITHOUT_BATCHING,
            max_sub_meshes: MAX_MESHES_IN_LAYER,
            max_data_texture_height: MAX_DATA_TEXTURE_HEIGHT,
            data_texture_width: DATA_TEXTURE_WIDTH,
        }
    }
}

/// Configuration for an [`InstancingLayer`](super::InstancingLayer).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstancingLayerConfig {
    /// Debug label used for the layer's buffers.
    pub label: Option<String>,
    /// Instance capacity.
    pub max_instances: u32,
}

impl InstancingLayerConfig {
    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the instance capacity.
    pub fn with_max_instances(mut self, max: u32) -> Self {
        self.max_instances = max;
        self
    }
}

impl Default for InstancingLayerConfig {
    fn default() -> Self {
        Self {
            label: None,
            max_instances: MAX_INSTANCES_IN_LAYER,
        }
    }
}

/// How a geometry is split into buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketingConfig {
    /// Split large geometries so each bucket can use narrower indices.
    pub enable_index_bucketing: bool,
    /// Vertex limit of one bucket. Values below 3 are raised to 3.
    pub max_vertices_per_bucket: u32,
}

impl BucketingConfig {
    /// One bucket per geometry.
    pub fn disabled() -> Self {
        Self {
            enable_index_bucketing: false,
            ..Self::default()
        }
    }

    /// Set the vertex limit of one bucket.
    pub fn with_max_vertices_per_bucket(mut self, max: u32) -> Self {
        self.max_vertices_per_bucket = max;
        self
    }
}

impl Default for BucketingConfig {
    fn default() -> Self {
        Self {
            enable_index_bucketing: true,
            max_vertices_per_bucket: MAX_VERTICES_PER_BUCKET,
        }
    }
}
