//! Error types for devices and scene layers.

use std::fmt;

/// Errors that can occur in the graphics device or its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// Errors raised by scene layers.
///
/// None of these are transient. Phase violations and empty textures point at a
/// bug in the caller (wrong build/mutate ordering, or a missed capacity check),
/// so they are reported once and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// A pre-build operation was called on a built layer.
    AlreadyBuilt,
    /// A post-build operation was called before `build()`.
    NotFinalized,
    /// `build()` was called a second time.
    AlreadyFinalized,
    /// The layer was destroyed.
    Destroyed,
    /// A texture would have been created with zero rows.
    EmptyTexture {
        /// Label of the texture.
        label: String,
    },
    /// A buffer would have been created with zero bytes.
    EmptyBuffer {
        /// Label of the buffer.
        label: String,
    },
    /// A mesh was added past the layer capacity.
    CapacityExceeded(String),
    /// The mesh index was not returned by this layer.
    InvalidMeshIndex(u32),
    /// The view index is not attached to this layer.
    InvalidViewIndex(usize),
    /// The layer cannot hold this primitive kind.
    UnsupportedPrimitive(String),
    /// Geometry arrays are inconsistent.
    InvalidGeometry(String),
    /// An instancing layer was given a geometry it does not share.
    GeometryMismatch {
        /// Geometry the layer was created for.
        expected: String,
        /// Geometry that was offered.
        found: String,
    },
    /// A device or backend call failed.
    Graphics(GraphicsError),
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyBuilt => write!(f, "already built"),
            Self::NotFinalized => write!(f, "not finalized"),
            Self::AlreadyFinalized => write!(f, "already finalized"),
            Self::Destroyed => write!(f, "layer destroyed"),
            Self::EmptyTexture { label } => write!(f, "texture height===0 for {label}"),
            Self::EmptyBuffer { label } => write!(f, "buffer length===0 for {label}"),
            Self::CapacityExceeded(msg) => write!(f, "layer capacity exceeded: {msg}"),
            Self::InvalidMeshIndex(index) => write!(f, "invalid layer mesh index {index}"),
            Self::InvalidViewIndex(index) => write!(f, "invalid view index {index}"),
            Self::UnsupportedPrimitive(msg) => write!(f, "unsupported primitive: {msg}"),
            Self::InvalidGeometry(msg) => write!(f, "invalid geometry: {msg}"),
            Self::GeometryMismatch { expected, found } => {
                write!(f, "layer shares geometry {expected}, got {found}")
            }
            Self::Graphics(err) => write!(f, "graphics error: {err}"),
        }
    }
}

impl std::error::Error for LayerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Graphics(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphicsError> for LayerError {
    fn from(err: GraphicsError) -> Self {
        Self::Graphics(err)
    }
}
