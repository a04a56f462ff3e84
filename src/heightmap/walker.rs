//! Traversal drivers: planar sweep and flood fill

use crate::heightmap::up_axis::UpAxis;
use crate::map::{Key, OccupancyMap};
use crate::math::Aabb;
use std::collections::{HashSet, VecDeque};

/// The 2D set of columns a build visits: the source extents footprint on the
/// surface axes, narrowed by the cull box when it is non-empty.
pub(crate) struct Footprint {
    axis_a: usize,
    axis_b: usize,
    a_lo: i32,
    a_hi: i32,
    b_lo: i32,
    b_hi: i32,
}

impl Footprint {
    pub fn new(src: &OccupancyMap, up: UpAxis, cull: &Aabb) -> Self {
        let axis_a = up.surface_index_a();
        let axis_b = up.surface_index_b();

        let (mut a_lo, mut a_hi, mut b_lo, mut b_hi) = match src.key_extents() {
            Some((min, max)) => (min[axis_a], max[axis_a], min[axis_b], max[axis_b]),
            None => (1, 0, 1, 0),
        };

        // An empty cull box still visits the full footprint; it empties the
        // vertical search range instead, so every column resolves vacant or
        // from the cache.
        if !cull.is_empty() {
            let res = src.resolution();
            let origin = src.origin();
            let clamp = |axis: usize, lo: &mut i32, hi: &mut i32| {
                let cull_lo = ((cull.min[axis] - origin[axis]) / res).ceil();
                let cull_hi = ((cull.max[axis] - origin[axis]) / res).floor();
                *lo = (*lo).max(cull_lo as i32);
                *hi = (*hi).min(cull_hi as i32);
            };
            clamp(axis_a, &mut a_lo, &mut a_hi);
            clamp(axis_b, &mut b_lo, &mut b_hi);
        }

        Self {
            axis_a,
            axis_b,
            a_lo,
            a_hi,
            b_lo,
            b_hi,
        }
    }

    pub fn axis_a(&self) -> usize {
        self.axis_a
    }

    pub fn axis_b(&self) -> usize {
        self.axis_b
    }

    pub fn is_empty(&self) -> bool {
        self.a_lo > self.a_hi || self.b_lo > self.b_hi
    }

    pub fn contains(&self, a: i32, b: i32) -> bool {
        a >= self.a_lo && a <= self.a_hi && b >= self.b_lo && b <= self.b_hi
    }

    /// Clamp a 2D cell into the footprint.
    pub fn clamp(&self, a: i32, b: i32) -> (i32, i32) {
        (a.clamp(self.a_lo, self.a_hi), b.clamp(self.b_lo, self.b_hi))
    }

    /// Source-space key of a column: surface components set, up component
    /// zero.
    pub fn column_key(&self, a: i32, b: i32) -> Key {
        Key::default().with_axis(self.axis_a, a).with_axis(self.axis_b, b)
    }

    pub fn column_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.a_hi - self.a_lo + 1) as usize * (self.b_hi - self.b_lo + 1) as usize
        }
    }

    /// All cells in deterministic row-major order (`b` outer, `a` inner).
    pub fn cells(&self) -> Vec<(i32, i32)> {
        let mut cells = Vec::with_capacity(self.column_count());
        if self.is_empty() {
            return cells;
        }
        for b in self.b_lo..=self.b_hi {
            for a in self.a_lo..=self.a_hi {
                cells.push((a, b));
            }
        }
        cells
    }
}

/// A strategy for visiting columns, supplying the base height each column's
/// search starts from.
pub(crate) trait ColumnWalker {
    /// Next column to visit and its base height, or `None` when done.
    fn next_column(&mut self) -> Option<(Key, f64)>;
    /// Report the committed surface height of the column last returned by
    /// `next_column` (`None` when the column stayed vacant).
    fn visited(&mut self, surface_height: Option<f64>);
}

/// Fixed-height sweep over the footprint in row-major order. Columns are
/// independent, so the sweep parallelizes and its output never depends on
/// visit order.
pub(crate) struct PlanarWalker<'f> {
    footprint: &'f Footprint,
    base_height: f64,
    cursor: Option<(i32, i32)>,
}

impl<'f> PlanarWalker<'f> {
    pub fn new(footprint: &'f Footprint, base_height: f64) -> Self {
        let cursor = if footprint.is_empty() {
            None
        } else {
            Some((footprint.a_lo, footprint.b_lo))
        };
        Self {
            footprint,
            base_height,
            cursor,
        }
    }
}

impl ColumnWalker for PlanarWalker<'_> {
    fn next_column(&mut self) -> Option<(Key, f64)> {
        let (a, b) = self.cursor?;
        self.cursor = if a < self.footprint.a_hi {
            Some((a + 1, b))
        } else if b < self.footprint.b_hi {
            Some((self.footprint.a_lo, b + 1))
        } else {
            None
        };
        Some((self.footprint.column_key(a, b), self.base_height))
    }

    fn visited(&mut self, _surface_height: Option<f64>) {}
}

/// Breadth-first fill from the column containing the reference position.
/// Each visited column seeds its 4-connected unvisited neighbours with its
/// committed surface height as their base, letting the search follow rising
/// and falling terrain; columns that fail propagate their own base so the
/// fill still covers the footprint.
pub(crate) struct FloodFillWalker<'f> {
    footprint: &'f Footprint,
    frontier: VecDeque<(i32, i32, f64)>,
    seen: HashSet<(i32, i32)>,
    current: Option<(i32, i32, f64)>,
}

impl<'f> FloodFillWalker<'f> {
    pub fn new(footprint: &'f Footprint, seed_a: i32, seed_b: i32, base_height: f64) -> Self {
        let mut frontier = VecDeque::new();
        let mut seen = HashSet::new();
        if !footprint.is_empty() {
            let (a, b) = footprint.clamp(seed_a, seed_b);
            seen.insert((a, b));
            frontier.push_back((a, b, base_height));
        }
        Self {
            footprint,
            frontier,
            seen,
            current: None,
        }
    }
}

impl ColumnWalker for FloodFillWalker<'_> {
    fn next_column(&mut self) -> Option<(Key, f64)> {
        let (a, b, base) = self.frontier.pop_front()?;
        self.current = Some((a, b, base));
        Some((self.footprint.column_key(a, b), base))
    }

    fn visited(&mut self, surface_height: Option<f64>) {
        let Some((a, b, base)) = self.current.take() else {
            return;
        };
        let next_base = surface_height.unwrap_or(base);
        // Neighbour order: +a, -a, +b, -b.
        for (da, db) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let (na, nb) = (a + da, b + db);
            if self.footprint.contains(na, nb) && self.seen.insert((na, nb)) {
                self.frontier.push_back((na, nb, next_base));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DVec3, IVec3};
    use crate::map::MapLayout;

    fn map_with_extents(min: IVec3, max: IVec3) -> OccupancyMap {
        let mut map = OccupancyMap::new(1.0, IVec3::splat(16), MapLayout::occupancy());
        map.set_occupancy(Key::from_coord(min), 1.0).unwrap();
        map.set_occupancy(Key::from_coord(max), 1.0).unwrap();
        map
    }

    #[test]
    fn test_footprint_from_extents() {
        let map = map_with_extents(IVec3::new(0, -2, 0), IVec3::new(4, 3, 5));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::EVERYTHING);
        assert!(!footprint.is_empty());
        assert_eq!(footprint.column_count(), 5 * 6);
        assert!(footprint.contains(0, -2));
        assert!(footprint.contains(4, 3));
        assert!(!footprint.contains(5, 0));
    }

    #[test]
    fn test_footprint_cull_narrows() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(9, 9, 0));
        let cull = Aabb::new(DVec3::new(2.0, 3.0, -10.0), DVec3::new(5.0, 6.0, 10.0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &cull);
        assert_eq!(footprint.column_count(), 4 * 4);
        assert!(footprint.contains(2, 3));
        assert!(!footprint.contains(1, 3));
    }

    #[test]
    fn test_footprint_empty_cull_keeps_columns() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(3, 3, 0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::NOTHING);
        assert_eq!(footprint.column_count(), 16);
    }

    #[test]
    fn test_footprint_uses_surface_axes() {
        // With X up, the footprint spans the Y and Z extents.
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(7, 2, 4));
        let footprint = Footprint::new(&map, UpAxis::PosX, &Aabb::EVERYTHING);
        assert_eq!(footprint.column_count(), 3 * 5);
        // Column keys zero the up component.
        let key = footprint.column_key(1, 2);
        assert_eq!(key.axis(0), 0);
    }

    #[test]
    fn test_planar_walker_row_major_order() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(1, 1, 0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::EVERYTHING);
        let mut walker = PlanarWalker::new(&footprint, 2.5);

        let mut visited = Vec::new();
        while let Some((key, base)) = walker.next_column() {
            assert_eq!(base, 2.5);
            visited.push((key.axis(0), key.axis(1)));
            walker.visited(None);
        }
        assert_eq!(visited, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn test_flood_fill_breadth_first_neighbour_order() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(2, 2, 0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::EVERYTHING);
        let mut walker = FloodFillWalker::new(&footprint, 1, 1, 0.0);

        let mut visited = Vec::new();
        while let Some((key, _base)) = walker.next_column() {
            visited.push((key.axis(0), key.axis(1)));
            walker.visited(None);
        }
        // Seed, then +a, -a, +b, -b, then the diagonal ring.
        assert_eq!(
            visited,
            vec![
                (1, 1),
                (2, 1),
                (0, 1),
                (1, 2),
                (1, 0),
                (2, 2),
                (2, 0),
                (0, 2),
                (0, 0),
            ]
        );
        assert_eq!(visited.len(), footprint.column_count());
    }

    #[test]
    fn test_flood_fill_propagates_committed_heights() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(2, 0, 0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::EVERYTHING);
        let mut walker = FloodFillWalker::new(&footprint, 0, 0, 0.0);

        // Seed commits at height 4; its neighbour inherits that base.
        let (_key, base) = walker.next_column().unwrap();
        assert_eq!(base, 0.0);
        walker.visited(Some(4.0));

        let (_key, base) = walker.next_column().unwrap();
        assert_eq!(base, 4.0);
        // A failed column passes its own base through.
        walker.visited(None);

        let (_key, base) = walker.next_column().unwrap();
        assert_eq!(base, 4.0);
    }

    #[test]
    fn test_flood_fill_clamps_seed_into_footprint() {
        let map = map_with_extents(IVec3::new(0, 0, 0), IVec3::new(1, 1, 0));
        let footprint = Footprint::new(&map, UpAxis::PosZ, &Aabb::EVERYTHING);
        let mut walker = FloodFillWalker::new(&footprint, 10, -10, 0.0);
        let (key, _) = walker.next_column().unwrap();
        assert_eq!((key.axis(0), key.axis(1)), (1, 0));
    }
}
