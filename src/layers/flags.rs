//! Per-mesh render state flags and the render passes derived from them.
//!
//! A mesh's flags never reach the GPU directly. Each flag change recomputes
//! which pass of each kind (color, silhouette, edges, pick) the mesh takes
//! part in, and only those pass codes are written.

use bitflags::bitflags;

bitflags! {
    /// Boolean render state of a mesh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MeshFlags: u32 {
        /// Mesh is visible.
        const VISIBLE = 1 << 0;
        /// Mesh is culled (outside the view or hidden by LOD).
        const CULLED = 1 << 1;
        /// Mesh can be picked.
        const PICKABLE = 1 << 2;
        /// Mesh is affected by section planes.
        const CLIPPABLE = 1 << 3;
        /// Mesh takes part in collision and boundary queries.
        const COLLIDABLE = 1 << 4;
        /// Mesh is drawn x-rayed.
        const XRAYED = 1 << 5;
        /// Mesh is highlighted.
        const HIGHLIGHTED = 1 << 6;
        /// Mesh is selected.
        const SELECTED = 1 << 7;
        /// Mesh edges are drawn.
        const EDGES = 1 << 8;
    }
}

impl MeshFlags {
    /// Visible and not culled.
    pub fn is_rendered(self) -> bool {
        self.contains(Self::VISIBLE) && !self.contains(Self::CULLED)
    }
}

/// Labeled draw category a mesh can take part in.
///
/// The discriminants are the byte values shaders compare against.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderPass {
    /// Not drawn in this pass kind.
    #[default]
    NotRendered = 0,
    /// Opaque color.
    ColorOpaque = 1,
    /// Transparent color.
    ColorTransparent = 2,
    /// Highlight silhouette.
    SilhouetteHighlighted = 3,
    /// Selection silhouette.
    SilhouetteSelected = 4,
    /// X-ray silhouette.
    SilhouetteXrayed = 5,
    /// Edges of an opaque mesh.
    EdgesColorOpaque = 6,
    /// Edges of a transparent mesh.
    EdgesColorTransparent = 7,
    /// Edges of a highlighted mesh.
    EdgesHighlighted = 8,
    /// Edges of a selected mesh.
    EdgesSelected = 9,
    /// Edges of an x-rayed mesh.
    EdgesXrayed = 10,
    /// Pick pass.
    Pick = 11,
}

impl RenderPass {
    /// Every pass a renderer driver can be asked to draw.
    pub const DRAWABLE: [RenderPass; 11] = [
        Self::ColorOpaque,
        Self::ColorTransparent,
        Self::SilhouetteHighlighted,
        Self::SilhouetteSelected,
        Self::SilhouetteXrayed,
        Self::EdgesColorOpaque,
        Self::EdgesColorTransparent,
        Self::EdgesHighlighted,
        Self::EdgesSelected,
        Self::EdgesXrayed,
        Self::Pick,
    ];

    /// The byte code stored in data textures.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns true for the four edge passes.
    pub fn is_edges(self) -> bool {
        matches!(
            self,
            Self::EdgesColorOpaque
                | Self::EdgesColorTransparent
                | Self::EdgesHighlighted
                | Self::EdgesSelected
                | Self::EdgesXrayed
        )
    }
}

/// The four pass codes of one mesh, as stored in bytes 8..12 of its attribute row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderPassRow {
    /// Color pass.
    pub color: RenderPass,
    /// Silhouette pass.
    pub silhouette: RenderPass,
    /// Edges pass.
    pub edges: RenderPass,
    /// Pick pass.
    pub pick: RenderPass,
}

impl RenderPassRow {
    /// Derive the pass codes from flags and transparency.
    ///
    /// Silhouette and edge states resolve ties as selected, then highlighted,
    /// then x-rayed.
    pub fn from_flags(flags: MeshFlags, transparent: bool) -> Self {
        let rendered = flags.is_rendered();
        let selected = flags.contains(MeshFlags::SELECTED);
        let highlighted = flags.contains(MeshFlags::HIGHLIGHTED);
        let xrayed = flags.contains(MeshFlags::XRAYED);

        let color = if !rendered || xrayed {
            RenderPass::NotRendered
        } else if transparent {
            RenderPass::ColorTransparent
        } else {
            RenderPass::ColorOpaque
        };

        let silhouette = if !rendered {
            RenderPass::NotRendered
        } else if selected {
            RenderPass::SilhouetteSelected
        } else if highlighted {
            RenderPass::SilhouetteHighlighted
        } else if xrayed {
            RenderPass::SilhouetteXrayed
        } else {
            RenderPass::NotRendered
        };

        let edges = if !rendered {
            RenderPass::NotRendered
        } else if selected {
            RenderPass::EdgesSelected
        } else if highlighted {
            RenderPass::EdgesHighlighted
        } else if xrayed {
            RenderPass::EdgesXrayed
        } else if flags.contains(MeshFlags::EDGES) {
            if transparent {
                RenderPass::EdgesColorTransparent
            } else {
                RenderPass::EdgesColorOpaque
            }
        } else {
            RenderPass::NotRendered
        };

        let pick = if rendered && flags.contains(MeshFlags::PICKABLE) {
            RenderPass::Pick
        } else {
            RenderPass::NotRendered
        };

        Self {
            color,
            silhouette,
            edges,
            pick,
        }
    }

    /// The row as the four bytes of the flags texel.
    pub fn to_bytes(self) -> [u8; 4] {
        [
            self.color.code(),
            self.silhouette.code(),
            self.edges.code(),
            self.pick.code(),
        ]
    }

    /// Pack into the single per-instance float used by instancing layers:
    /// color, silhouette `<< 4`, pick `<< 8`, clippable `<< 12`.
    pub fn to_instance_flags(self, clippable: bool) -> f32 {
        let packed = self.color.code() as u32
            | (self.silhouette.code() as u32) << 4
            | (self.pick.code() as u32) << 8
            | (clippable as u32) << 12;
        packed as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(flags: MeshFlags, transparent: bool) -> RenderPassRow {
        RenderPassRow::from_flags(flags, transparent)
    }

    #[test]
    fn test_hidden_mesh_is_never_rendered() {
        let all = MeshFlags::all() - MeshFlags::VISIBLE;
        assert_eq!(row(all, false), RenderPassRow::default());

        let culled = MeshFlags::all();
        assert_eq!(row(culled, true), RenderPassRow::default());
    }

    #[test]
    fn test_color_pass() {
        assert_eq!(row(MeshFlags::VISIBLE, false).color, RenderPass::ColorOpaque);
        assert_eq!(
            row(MeshFlags::VISIBLE, true).color,
            RenderPass::ColorTransparent
        );
        assert_eq!(
            row(MeshFlags::VISIBLE | MeshFlags::XRAYED, false).color,
            RenderPass::NotRendered
        );
    }

    #[test]
    fn test_highlight_beats_xray() {
        let flags = MeshFlags::VISIBLE | MeshFlags::XRAYED | MeshFlags::HIGHLIGHTED;
        assert_eq!(row(flags, false).silhouette, RenderPass::SilhouetteHighlighted);
        assert_ne!(row(flags, false).silhouette, RenderPass::SilhouetteXrayed);
        assert_eq!(row(flags, false).edges, RenderPass::EdgesHighlighted);
    }

    #[test]
    fn test_selection_beats_highlight() {
        let flags = MeshFlags::VISIBLE
            | MeshFlags::XRAYED
            | MeshFlags::HIGHLIGHTED
            | MeshFlags::SELECTED
            | MeshFlags::EDGES;
        assert_eq!(row(flags, false).silhouette, RenderPass::SilhouetteSelected);
        assert_eq!(row(flags, false).edges, RenderPass::EdgesSelected);
    }

    #[test]
    fn test_edges_pass() {
        let flags = MeshFlags::VISIBLE | MeshFlags::EDGES;
        assert_eq!(row(flags, false).edges, RenderPass::EdgesColorOpaque);
        assert_eq!(row(flags, true).edges, RenderPass::EdgesColorTransparent);
        assert_eq!(
            row(MeshFlags::VISIBLE, false).edges,
            RenderPass::NotRendered
        );
        assert_eq!(
            row(MeshFlags::VISIBLE | MeshFlags::XRAYED | MeshFlags::EDGES, false).edges,
            RenderPass::EdgesXrayed
        );
    }

    #[test]
    fn test_pick_pass() {
        assert_eq!(
            row(MeshFlags::VISIBLE | MeshFlags::PICKABLE, false).pick,
            RenderPass::Pick
        );
        assert_eq!(row(MeshFlags::VISIBLE, false).pick, RenderPass::NotRendered);
        assert_eq!(
            row(MeshFlags::VISIBLE | MeshFlags::PICKABLE | MeshFlags::CULLED, false).pick,
            RenderPass::NotRendered
        );
    }

    #[test]
    fn test_row_bytes_and_instance_packing() {
        let flags = MeshFlags::VISIBLE | MeshFlags::PICKABLE | MeshFlags::SELECTED;
        let pass_row = row(flags, true);
        assert_eq!(pass_row.to_bytes(), [2, 4, 9, 11]);
        assert_eq!(
            pass_row.to_instance_flags(true),
            (2 | 4 << 4 | 11 << 8 | 1 << 12) as f32
        );
    }
}
