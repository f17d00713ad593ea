//! Running totals of flagged meshes.
//!
//! Counts are never recomputed from the per-mesh flags. Every flag change
//! goes through [`MeshCounts::apply`], which moves each total by exactly the
//! difference between the old and new state, so layer totals and model totals
//! stay equal to the sum over their meshes.

use std::sync::Arc;

use parking_lot::Mutex;

use super::flags::{MeshFlags, RenderPass};

/// Number of meshes with each render-state flag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshCounts {
    /// Meshes added, whatever their flags.
    pub num_meshes: u32,
    /// Meshes with [`MeshFlags::VISIBLE`].
    pub num_visible: u32,
    /// Meshes with [`MeshFlags::CULLED`].
    pub num_culled: u32,
    /// Meshes with [`MeshFlags::PICKABLE`].
    pub num_pickable: u32,
    /// Meshes with [`MeshFlags::CLIPPABLE`].
    pub num_clippable: u32,
    /// Meshes with [`MeshFlags::COLLIDABLE`].
    pub num_collidable: u32,
    /// Meshes with [`MeshFlags::XRAYED`].
    pub num_xrayed: u32,
    /// Meshes with [`MeshFlags::HIGHLIGHTED`].
    pub num_highlighted: u32,
    /// Meshes with [`MeshFlags::SELECTED`].
    pub num_selected: u32,
    /// Meshes with [`MeshFlags::EDGES`].
    pub num_edges: u32,
    /// Meshes drawn in the transparent passes.
    pub num_transparent: u32,
}

impl MeshCounts {
    /// Create zeroed counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the totals from one mesh state to another.
    pub fn apply(
        &mut self,
        old_flags: MeshFlags,
        old_transparent: bool,
        new_flags: MeshFlags,
        new_transparent: bool,
    ) {
        let step = |count: &mut u32, flag: MeshFlags| {
            match (old_flags.contains(flag), new_flags.contains(flag)) {
                (false, true) => *count += 1,
                (true, false) => *count -= 1,
                _ => {}
            }
        };
        step(&mut self.num_visible, MeshFlags::VISIBLE);
        step(&mut self.num_culled, MeshFlags::CULLED);
        step(&mut self.num_pickable, MeshFlags::PICKABLE);
        step(&mut self.num_clippable, MeshFlags::CLIPPABLE);
        step(&mut self.num_collidable, MeshFlags::COLLIDABLE);
        step(&mut self.num_xrayed, MeshFlags::XRAYED);
        step(&mut self.num_highlighted, MeshFlags::HIGHLIGHTED);
        step(&mut self.num_selected, MeshFlags::SELECTED);
        step(&mut self.num_edges, MeshFlags::EDGES);

        match (old_transparent, new_transparent) {
            (false, true) => self.num_transparent += 1,
            (true, false) => self.num_transparent -= 1,
            _ => {}
        }
    }

    /// Register a new mesh with no flags set.
    pub fn add_mesh(&mut self) {
        self.num_meshes += 1;
    }

    /// Remove a mesh and every flag it contributed.
    pub fn remove_mesh(&mut self, flags: MeshFlags, transparent: bool) {
        self.apply(flags, transparent, MeshFlags::empty(), false);
        self.num_meshes -= 1;
    }

    /// Counts of a single mesh in the given state.
    pub fn of_mesh(flags: MeshFlags, transparent: bool) -> Self {
        let mut counts = Self::new();
        counts.add_mesh();
        counts.apply(MeshFlags::empty(), false, flags, transparent);
        counts
    }

    /// Every mesh is culled.
    pub fn all_culled(&self) -> bool {
        self.num_culled == self.num_meshes
    }

    /// Whether any mesh can take part in `pass`.
    ///
    /// False means the whole draw can be skipped. True does not guarantee a
    /// mesh is drawn: counts are per flag, not per combination.
    pub fn may_draw(&self, pass: RenderPass) -> bool {
        if self.num_meshes == 0 || self.num_visible == 0 || self.all_culled() {
            return false;
        }
        let some_opaque = self.num_transparent < self.num_meshes;
        let some_not_xrayed = self.num_xrayed < self.num_meshes;
        match pass {
            RenderPass::NotRendered => false,
            RenderPass::ColorOpaque => some_opaque && some_not_xrayed,
            RenderPass::ColorTransparent => self.num_transparent > 0 && some_not_xrayed,
            RenderPass::SilhouetteHighlighted | RenderPass::EdgesHighlighted => {
                self.num_highlighted > 0
            }
            RenderPass::SilhouetteSelected | RenderPass::EdgesSelected => self.num_selected > 0,
            RenderPass::SilhouetteXrayed | RenderPass::EdgesXrayed => self.num_xrayed > 0,
            RenderPass::EdgesColorOpaque => self.num_edges > 0 && some_opaque,
            RenderPass::EdgesColorTransparent => self.num_edges > 0 && self.num_transparent > 0,
            RenderPass::Pick => self.num_pickable > 0,
        }
    }
}

impl std::ops::AddAssign for MeshCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.num_meshes += rhs.num_meshes;
        self.num_visible += rhs.num_visible;
        self.num_culled += rhs.num_culled;
        self.num_pickable += rhs.num_pickable;
        self.num_clippable += rhs.num_clippable;
        self.num_collidable += rhs.num_collidable;
        self.num_xrayed += rhs.num_xrayed;
        self.num_highlighted += rhs.num_highlighted;
        self.num_selected += rhs.num_selected;
        self.num_edges += rhs.num_edges;
        self.num_transparent += rhs.num_transparent;
    }
}

impl std::iter::Sum for MeshCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::new(), |mut acc, counts| {
            acc += counts;
            acc
        })
    }
}

/// Model-level counts shared by every layer of a model, one entry per view.
///
/// Data-texture layers contribute to view 0. Instancing layers contribute to
/// each view they render into.
#[derive(Debug, Clone)]
pub struct SharedMeshCounts {
    views: Arc<Mutex<Vec<MeshCounts>>>,
}

impl SharedMeshCounts {
    /// Create counts with a single view.
    pub fn new() -> Self {
        Self {
            views: Arc::new(Mutex::new(vec![MeshCounts::new()])),
        }
    }

    /// Snapshot of the counts of one view. Unknown views read as zero.
    pub fn view(&self, view_index: usize) -> MeshCounts {
        self.views
            .lock()
            .get(view_index)
            .copied()
            .unwrap_or_default()
    }

    /// Number of views with counts.
    pub fn num_views(&self) -> usize {
        self.views.lock().len()
    }

    /// Update the counts of one view, growing the view list if needed.
    pub fn update<R>(&self, view_index: usize, f: impl FnOnce(&mut MeshCounts) -> R) -> R {
        let mut views = self.views.lock();
        if views.len() <= view_index {
            views.resize(view_index + 1, MeshCounts::new());
        }
        f(&mut views[view_index])
    }
}

impl Default for SharedMeshCounts {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_is_symmetric() {
        let mut counts = MeshCounts::new();
        counts.add_mesh();

        let on = MeshFlags::VISIBLE | MeshFlags::SELECTED | MeshFlags::EDGES;
        counts.apply(MeshFlags::empty(), false, on, true);
        assert_eq!(counts.num_visible, 1);
        assert_eq!(counts.num_selected, 1);
        assert_eq!(counts.num_edges, 1);
        assert_eq!(counts.num_transparent, 1);

        counts.apply(on, true, MeshFlags::empty(), false);
        let mut expected = MeshCounts::new();
        expected.add_mesh();
        assert_eq!(counts, expected);
    }

    #[test]
    fn test_unchanged_flags_do_not_move_counts() {
        let mut counts = MeshCounts::of_mesh(MeshFlags::VISIBLE, false);
        counts.apply(MeshFlags::VISIBLE, false, MeshFlags::VISIBLE, false);
        assert_eq!(counts.num_visible, 1);
    }

    #[test]
    fn test_remove_mesh() {
        let mut counts = MeshCounts::of_mesh(MeshFlags::VISIBLE | MeshFlags::CULLED, true);
        assert!(counts.all_culled());
        counts.remove_mesh(MeshFlags::VISIBLE | MeshFlags::CULLED, true);
        assert_eq!(counts, MeshCounts::new());
    }

    #[test]
    fn test_sum() {
        let total: MeshCounts = [
            MeshCounts::of_mesh(MeshFlags::VISIBLE, false),
            MeshCounts::of_mesh(MeshFlags::VISIBLE | MeshFlags::PICKABLE, true),
        ]
        .into_iter()
        .sum();
        assert_eq!(total.num_meshes, 2);
        assert_eq!(total.num_visible, 2);
        assert_eq!(total.num_pickable, 1);
        assert_eq!(total.num_transparent, 1);
    }

    #[test]
    fn test_may_draw() {
        let mut counts = MeshCounts::new();
        counts.add_mesh();
        counts.add_mesh();
        assert!(!counts.may_draw(RenderPass::ColorOpaque));

        counts.apply(MeshFlags::empty(), false, MeshFlags::VISIBLE, false);
        assert!(counts.may_draw(RenderPass::ColorOpaque));
        assert!(!counts.may_draw(RenderPass::ColorTransparent));
        assert!(!counts.may_draw(RenderPass::SilhouetteSelected));
        assert!(!counts.may_draw(RenderPass::Pick));
        assert!(!counts.may_draw(RenderPass::NotRendered));

        counts.apply(MeshFlags::empty(), false, MeshFlags::CULLED, true);
        assert!(counts.may_draw(RenderPass::ColorTransparent));
        counts.apply(MeshFlags::VISIBLE, false, MeshFlags::VISIBLE | MeshFlags::CULLED, false);
        assert!(!counts.may_draw(RenderPass::ColorTransparent));
    }

    #[test]
    fn test_shared_counts_grow_views() {
        let shared = SharedMeshCounts::new();
        shared.update(2, |counts| counts.add_mesh());
        assert_eq!(shared.num_views(), 3);
        assert_eq!(shared.view(2).num_meshes, 1);
        assert_eq!(shared.view(7), MeshCounts::new());

        let clone = shared.clone();
        clone.update(0, |counts| counts.add_mesh());
        assert_eq!(shared.view(0).num_meshes, 1);
    }
}
