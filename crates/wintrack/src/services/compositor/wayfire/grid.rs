//! Workspace grid bookkeeping for Wayfire.
//!
//! Every workspace set (wset) is a `width × height` grid of workspaces. An
//! output shows one set and one cell of it at a time, and view geometry is
//! reported relative to that visible cell. The logical cell of a view is
//! recovered with floor division so views hanging off the left or top edge
//! land in the neighbouring cell instead of cell zero.

use std::collections::{BTreeMap, HashMap};

use wintrack_core::Rect;

use crate::services::compositor::types::WorkspaceId;

/// Grid coordinates of one workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// `(set << 16) | (y << 8) | x`.
pub fn workspace_id(set: u32, cell: Cell) -> WorkspaceId {
    let set = i64::from(set);
    let y = i64::from(cell.y & 0xff);
    let x = i64::from(cell.x & 0xff);
    WorkspaceId::new((set << 16) | (y << 8) | x)
}

pub fn split_workspace_id(id: WorkspaceId) -> (u32, Cell) {
    let raw = id.raw();
    let set = (raw >> 16) as u32;
    let cell = Cell::new((raw & 0xff) as i32, ((raw >> 8) & 0xff) as i32);
    (set, cell)
}

/// Split a pixel origin into a cell offset and the remainder inside it.
/// `None` for a degenerate cell size.
pub fn locate(x: i32, y: i32, cell_width: i32, cell_height: i32) -> Option<(Cell, (i32, i32))> {
    if cell_width <= 0 || cell_height <= 0 {
        return None;
    }
    let cell = Cell::new(x.div_euclid(cell_width), y.div_euclid(cell_height));
    let offset = (x.rem_euclid(cell_width), y.rem_euclid(cell_height));
    Some((cell, offset))
}

/// Inverse of [`locate`].
pub fn compose(cell: Cell, offset: (i32, i32), cell_width: i32, cell_height: i32) -> (i32, i32) {
    (
        cell.x * cell_width + offset.0,
        cell.y * cell_height + offset.1,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub id: u64,
    pub name: String,
    /// Pixel size of one workspace cell on this output.
    pub size: (i32, i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSet {
    pub index: u32,
    pub output: Option<u64>,
    pub width: i32,
    pub height: i32,
    pub active: Cell,
}

impl OutputSet {
    pub fn contains(&self, cell: Cell) -> bool {
        (0..self.width).contains(&cell.x) && (0..self.height).contains(&cell.y)
    }

    /// Row-major cells of the grid.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| Cell::new(x, y)))
    }

    pub fn workspace_name(&self, cell: Cell) -> String {
        format!("{}:{}", self.index, cell.y * self.width + cell.x + 1)
    }

    pub fn active_workspace(&self) -> WorkspaceId {
        workspace_id(self.index, self.active)
    }
}

/// Where a view sits inside its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewPlacement {
    pub set: u32,
    pub cell: Cell,
    pub offset: (i32, i32),
    pub size: (i32, i32),
}

impl ViewPlacement {
    /// Frame relative to the origin of its own cell.
    pub fn local_frame(&self) -> Rect {
        Rect::new(self.offset.0, self.offset.1, self.size.0, self.size.1)
    }
}

#[derive(Debug, Default)]
pub struct Grid {
    outputs: BTreeMap<u64, Output>,
    sets: BTreeMap<u32, OutputSet>,
    views: HashMap<u64, ViewPlacement>,
}

impl Grid {
    pub fn upsert_output(&mut self, output: Output) {
        self.outputs.insert(output.id, output);
    }

    pub fn output(&self, id: u64) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    /// Insert or replace a set. If it is bound to an output, any other set
    /// bound to that output is unbound; their indices are returned.
    pub fn upsert_set(&mut self, set: OutputSet) -> Vec<u32> {
        let unbound = match set.output {
            Some(output) => self.unbind_output(output, set.index),
            None => Vec::new(),
        };
        self.sets.insert(set.index, set);
        unbound
    }

    pub fn set(&self, index: u32) -> Option<&OutputSet> {
        self.sets.get(&index)
    }

    pub fn sets(&self) -> impl Iterator<Item = &OutputSet> {
        self.sets.values()
    }

    pub fn set_for_output(&self, output: u64) -> Option<&OutputSet> {
        self.sets.values().find(|s| s.output == Some(output))
    }

    /// Show `set` on `output`. Returns the sets that lost the output.
    pub fn bind(&mut self, set: u32, output: u64) -> Vec<u32> {
        if !self.sets.contains_key(&set) {
            return Vec::new();
        }
        let unbound = self.unbind_output(output, set);
        if let Some(s) = self.sets.get_mut(&set) {
            s.output = Some(output);
        }
        unbound
    }

    fn unbind_output(&mut self, output: u64, keep: u32) -> Vec<u32> {
        let mut unbound = Vec::new();
        for s in self.sets.values_mut() {
            if s.index != keep && s.output == Some(output) {
                s.output = None;
                unbound.push(s.index);
            }
        }
        unbound
    }

    /// Move the visible cell of `set`. Returns the previous cell.
    pub fn set_active(&mut self, set: u32, cell: Cell) -> Option<Cell> {
        let s = self.sets.get_mut(&set)?;
        Some(std::mem::replace(&mut s.active, cell))
    }

    /// Drop `output` and every set bound to it. Views inside those sets
    /// are forgotten. Returns the removed sets.
    pub fn remove_output(&mut self, output: u64) -> Vec<OutputSet> {
        self.outputs.remove(&output);
        let doomed: Vec<u32> = self
            .sets
            .values()
            .filter(|s| s.output == Some(output))
            .map(|s| s.index)
            .collect();
        let removed: Vec<OutputSet> = doomed
            .iter()
            .filter_map(|index| self.sets.remove(index))
            .collect();
        self.views.retain(|_, v| !doomed.contains(&v.set));
        removed
    }

    /// Pixel size of a cell of `set`, taken from the output showing it.
    pub fn cell_size(&self, set: u32) -> Option<(i32, i32)> {
        let output = self.sets.get(&set)?.output?;
        self.outputs.get(&output).map(|o| o.size)
    }

    /// Record a view's geometry, reported relative to the visible cell of
    /// `set`, and return the workspace it lands on.
    pub fn place_view(&mut self, view: u64, set: u32, frame: Rect) -> Option<WorkspaceId> {
        let active = self.sets.get(&set)?.active;
        let Some((w, h)) = self.cell_size(set) else {
            // Set not on screen: keep the last known cell if the set matches.
            let known = self.views.get_mut(&view).filter(|v| v.set == set)?;
            known.size = (frame.width, frame.height);
            return self.view_workspace(view);
        };
        let (rel, offset) = locate(frame.x, frame.y, w, h)?;
        self.views.insert(
            view,
            ViewPlacement {
                set,
                cell: Cell::new(active.x + rel.x, active.y + rel.y),
                offset,
                size: (frame.width, frame.height),
            },
        );
        self.view_workspace(view)
    }

    pub fn view(&self, view: u64) -> Option<&ViewPlacement> {
        self.views.get(&view)
    }

    pub fn remove_view(&mut self, view: u64) -> Option<ViewPlacement> {
        self.views.remove(&view)
    }

    /// Workspace of a view, `None` when it sits outside the grid.
    pub fn view_workspace(&self, view: u64) -> Option<WorkspaceId> {
        let v = self.views.get(&view)?;
        let set = self.sets.get(&v.set)?;
        set.contains(v.cell).then(|| workspace_id(v.set, v.cell))
    }

    /// Views whose cell is `workspace`, in id order.
    pub fn views_on(&self, workspace: WorkspaceId) -> Vec<(u64, ViewPlacement)> {
        let (set, cell) = split_workspace_id(workspace);
        let mut views: Vec<_> = self
            .views
            .iter()
            .filter(|(_, v)| v.set == set && v.cell == cell)
            .map(|(id, v)| (*id, *v))
            .collect();
        views.sort_by_key(|(id, _)| *id);
        views
    }

    /// Output-local origin that puts a frame with cell-local origin
    /// `offset` onto `workspace`. Also returns the output showing the set.
    pub fn origin_on(&self, workspace: WorkspaceId, offset: (i32, i32)) -> Option<(u64, i32, i32)> {
        let (set, cell) = split_workspace_id(workspace);
        let s = self.sets.get(&set)?;
        if !s.contains(cell) {
            return None;
        }
        let output = s.output?;
        let (w, h) = self.outputs.get(&output)?.size;
        let rel = Cell::new(cell.x - s.active.x, cell.y - s.active.y);
        let (x, y) = compose(rel, offset, w, h);
        Some((output, x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_set() -> Grid {
        let mut grid = Grid::default();
        grid.upsert_output(Output {
            id: 1,
            name: "DP-1".into(),
            size: (1920, 1080),
        });
        grid.upsert_set(OutputSet {
            index: 3,
            output: Some(1),
            width: 3,
            height: 2,
            active: Cell::new(1, 0),
        });
        grid
    }

    #[test]
    fn test_workspace_id_packing() {
        let id = workspace_id(3, Cell::new(2, 1));
        assert_eq!(id.raw(), (3 << 16) | (1 << 8) | 2);
        assert_eq!(split_workspace_id(id), (3, Cell::new(2, 1)));
        assert_eq!(workspace_id(0, Cell::new(0, 0)).raw(), 0);
    }

    #[test]
    fn test_locate_compose_round_trip() {
        let sizes = [(1920, 1080), (1280, 720), (7, 3)];
        let origins = [
            (0, 0),
            (10, 20),
            (-1, -1),
            (-100, 50),
            (-1920, -1080),
            (-1921, 2000),
            (5000, -3333),
        ];
        for (w, h) in sizes {
            for (x, y) in origins {
                let (cell, offset) = locate(x, y, w, h).unwrap();
                assert!((0..w).contains(&offset.0) && (0..h).contains(&offset.1));
                assert_eq!(compose(cell, offset, w, h), (x, y), "origin ({x},{y}) size {w}x{h}");
            }
        }
    }

    #[test]
    fn test_locate_floors_negative_origins() {
        let (cell, offset) = locate(-100, -1, 1920, 1080).unwrap();
        assert_eq!(cell, Cell::new(-1, -1));
        assert_eq!(offset, (1820, 1079));
        assert_eq!(locate(0, 0, 0, 1080), None);
    }

    #[test]
    fn test_names_and_cells() {
        let grid = grid_with_set();
        let set = grid.set(3).unwrap();
        let cells: Vec<_> = set.cells().collect();
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[4], Cell::new(1, 1));
        assert_eq!(set.workspace_name(Cell::new(0, 0)), "3:1");
        assert_eq!(set.workspace_name(Cell::new(1, 1)), "3:5");
    }

    #[test]
    fn test_place_view_relative_to_active_cell() {
        let mut grid = grid_with_set();
        // Active cell is (1,0); one screen to the right is (2,0).
        let ws = grid.place_view(7, 3, Rect::new(1920 + 40, 30, 800, 600));
        assert_eq!(ws, Some(workspace_id(3, Cell::new(2, 0))));
        assert_eq!(grid.view(7).unwrap().offset, (40, 30));

        // Hanging off the left edge lands in (0,0).
        let ws = grid.place_view(8, 3, Rect::new(-10, 0, 800, 600));
        assert_eq!(ws, Some(workspace_id(3, Cell::new(0, 0))));

        // Outside the grid.
        assert_eq!(grid.place_view(9, 3, Rect::new(0, -5, 10, 10)), None);
        assert_eq!(grid.views_on(workspace_id(3, Cell::new(2, 0))).len(), 1);
    }

    #[test]
    fn test_origin_on_inverts_place_view() {
        let mut grid = grid_with_set();
        grid.place_view(7, 3, Rect::new(100, 200, 800, 600));
        let target = workspace_id(3, Cell::new(0, 1));
        let (output, x, y) = grid.origin_on(target, grid.view(7).unwrap().offset).unwrap();
        assert_eq!((output, x, y), (1, -1920 + 100, 1080 + 200));
        assert_eq!(grid.origin_on(workspace_id(3, Cell::new(5, 5)), (0, 0)), None);
    }

    #[test]
    fn test_bind_moves_output_between_sets() {
        let mut grid = grid_with_set();
        grid.upsert_set(OutputSet {
            index: 4,
            output: None,
            width: 1,
            height: 1,
            active: Cell::default(),
        });
        assert_eq!(grid.bind(4, 1), vec![3]);
        assert_eq!(grid.set(3).unwrap().output, None);
        assert_eq!(grid.set_for_output(1).unwrap().index, 4);
        assert!(grid.bind(99, 1).is_empty());
    }

    #[test]
    fn test_remove_output_cascades_to_sets() {
        let mut grid = grid_with_set();
        grid.upsert_output(Output {
            id: 2,
            name: "HDMI-A-1".into(),
            size: (1280, 720),
        });
        grid.upsert_set(OutputSet {
            index: 5,
            output: Some(2),
            width: 1,
            height: 1,
            active: Cell::default(),
        });
        grid.place_view(7, 3, Rect::new(0, 0, 10, 10));
        grid.place_view(8, 5, Rect::new(0, 0, 10, 10));

        let removed = grid.remove_output(1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].index, 3);
        assert!(grid.sets().all(|s| s.output != Some(1)));
        assert!(grid.output(1).is_none());
        assert!(grid.view(7).is_none());
        assert!(grid.view(8).is_some());
    }
}
