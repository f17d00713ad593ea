//! Shader program selection and draw planning.
//!
//! Renderer drivers do not subclass per primitive. A layer resolves the
//! programs it needs once, at build, into [`ProgramKey`]s; each draw call
//! then names the key it should be issued with.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;

use super::bucket::IndexWidth;
use super::flags::RenderPass;
use super::geometry::Primitive;

/// Closed set of precompiled programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramVariant {
    /// Triangles read through data textures.
    DataTextureTriangles,
    /// Edges read through data textures.
    DataTextureEdges,
    /// Instanced triangles.
    InstancedTriangles,
    /// Instanced line segments.
    InstancedLines,
    /// Instanced points.
    InstancedPoints,
    /// Edges of instanced triangles.
    InstancedEdges,
}

impl ProgramVariant {
    /// Variant drawing `pass` for a data-texture layer.
    pub fn data_texture(pass: RenderPass) -> Self {
        if pass.is_edges() {
            Self::DataTextureEdges
        } else {
            Self::DataTextureTriangles
        }
    }

    /// Variant drawing `pass` for an instancing layer of `primitive`.
    pub fn instanced(primitive: Primitive, pass: RenderPass) -> Self {
        if pass.is_edges() {
            return Self::InstancedEdges;
        }
        match primitive {
            Primitive::Points => Self::InstancedPoints,
            Primitive::Lines => Self::InstancedLines,
            Primitive::Triangles | Primitive::Solid | Primitive::Surface => {
                Self::InstancedTriangles
            }
        }
    }
}

bitflags! {
    /// Optional shader features a layer needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFeatures: u32 {
        /// Back-face culling for closed meshes.
        const SOLID = 1 << 0;
        /// Per-vertex UVs.
        const UVS = 1 << 1;
        /// Section plane clipping.
        const CLIPPING = 1 << 2;
        /// Per-mesh offsets.
        const OFFSETS = 1 << 3;
    }
}

/// Identifies one compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    /// Program variant.
    pub variant: ProgramVariant,
    /// Primitive kind.
    pub primitive: Primitive,
    /// Index width, if the program reads indices.
    pub width: Option<IndexWidth>,
    /// Optional features.
    pub features: ProgramFeatures,
    /// Hash of all of the above, used as a cache key by drivers.
    pub feature_hash: u64,
}

impl ProgramKey {
    /// Create a key and compute its hash.
    pub fn new(
        variant: ProgramVariant,
        primitive: Primitive,
        width: Option<IndexWidth>,
        features: ProgramFeatures,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        (variant, primitive, width, features).hash(&mut hasher);
        Self {
            variant,
            primitive,
            width,
            features,
            feature_hash: hasher.finish(),
        }
    }
}

/// One draw a renderer driver issues for a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawCall {
    /// Render pass being drawn.
    pub pass: RenderPass,
    /// Program to draw with.
    pub program: ProgramKey,
    /// Vertices (data-texture path) or indices (instancing path) per instance.
    pub element_count: u32,
    /// Number of instances.
    pub instance_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_selection() {
        assert_eq!(
            ProgramVariant::data_texture(RenderPass::EdgesSelected),
            ProgramVariant::DataTextureEdges
        );
        assert_eq!(
            ProgramVariant::data_texture(RenderPass::Pick),
            ProgramVariant::DataTextureTriangles
        );
        assert_eq!(
            ProgramVariant::instanced(Primitive::Lines, RenderPass::ColorOpaque),
            ProgramVariant::InstancedLines
        );
        assert_eq!(
            ProgramVariant::instanced(Primitive::Solid, RenderPass::EdgesColorOpaque),
            ProgramVariant::InstancedEdges
        );
    }

    #[test]
    fn test_key_hash_is_stable_and_distinct() {
        let a = ProgramKey::new(
            ProgramVariant::DataTextureTriangles,
            Primitive::Triangles,
            Some(IndexWidth::Bits8),
            ProgramFeatures::CLIPPING,
        );
        let b = ProgramKey::new(
            ProgramVariant::DataTextureTriangles,
            Primitive::Triangles,
            Some(IndexWidth::Bits8),
            ProgramFeatures::CLIPPING,
        );
        let c = ProgramKey::new(
            ProgramVariant::DataTextureTriangles,
            Primitive::Triangles,
            Some(IndexWidth::Bits16),
            ProgramFeatures::CLIPPING,
        );
        assert_eq!(a.feature_hash, b.feature_hash);
        assert_ne!(a.feature_hash, c.feature_hash);
    }
}
