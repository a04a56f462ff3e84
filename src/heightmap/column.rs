//! Column search: picking the supporting surface for a single column

use crate::core::types::{DVec3, Result};
use crate::heightmap::up_axis::UpAxis;
use crate::map::{Key, OccupancyMap, VoxelKind};
use crate::math::Aabb;

/// The surface selected for one column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum ColumnSurface {
    /// An occupied voxel with sufficient clearance above it.
    Real {
        key: Key,
        height: f64,
        clearance: f32,
    },
    /// A free voxel resting on unknown space; no real support exists.
    Virtual { key: Key, height: f64 },
}

/// Provisional support being evaluated during the walk.
struct Provisional {
    key: Key,
    height: f64,
    /// Height of the topmost non-occupied voxel seen above the support, if
    /// any.
    run_top: Option<f64>,
}

/// Search parameters and vertical bounds shared by every column of one build.
///
/// Borrowed context threaded through the traversal drivers; lives for the
/// duration of a single `build_heightmap` call.
pub(crate) struct ColumnSearch<'a> {
    src: &'a OccupancyMap,
    up_index: usize,
    up_sign: i32,
    /// Height of the source origin along the up axis.
    up_origin: f64,
    resolution: f64,
    min_clearance: f64,
    /// Voxel steps above the base height the search may reach; `None`
    /// disables the cap.
    ceiling_steps: Option<i32>,
    generate_virtual_surface: bool,
    ignore_subvoxel: bool,
    /// Inclusive up-ordered step range of the vertical search; empty when
    /// `t_lo > t_hi`. An empty cull box empties the range, failing every
    /// column.
    t_lo: i32,
    t_hi: i32,
}

impl<'a> ColumnSearch<'a> {
    pub fn new(
        src: &'a OccupancyMap,
        up: UpAxis,
        min_clearance: f64,
        ceiling: f64,
        generate_virtual_surface: bool,
        ignore_subvoxel: bool,
        cull: &Aabb,
    ) -> Self {
        let up_index = up.index();
        let up_sign: i32 = if up.is_negative() { -1 } else { 1 };
        let resolution = src.resolution();
        let origin_u = src.origin()[up_index];

        // Source extents along the up axis, as up-ordered steps.
        let (mut t_lo, mut t_hi) = match src.key_extents() {
            Some((min, max)) => {
                let (lo, hi) = (min[up_index], max[up_index]);
                if up_sign > 0 {
                    (lo, hi)
                } else {
                    (-hi, -lo)
                }
            }
            None => (1, 0),
        };

        if cull.is_empty() {
            // Empty cull box: nothing to search in any column.
            t_lo = 1;
            t_hi = 0;
        } else {
            let lo = ((cull.min[up_index] - origin_u) / resolution).ceil();
            let hi = ((cull.max[up_index] - origin_u) / resolution).floor();
            let (cull_lo, cull_hi) = if up_sign > 0 { (lo, hi) } else { (-hi, -lo) };
            t_lo = t_lo.max(cull_lo as i32);
            t_hi = t_hi.min(cull_hi as i32);
        }

        let ceiling_steps = if ceiling > 0.0 {
            Some((ceiling / resolution).floor() as i32)
        } else {
            None
        };

        Self {
            src,
            up_index,
            up_sign,
            up_origin: up_sign as f64 * origin_u,
            resolution,
            min_clearance,
            ceiling_steps,
            generate_virtual_surface,
            ignore_subvoxel,
            t_lo,
            t_hi,
        }
    }

    /// World-space centre of a column voxel; used to address the heightmap
    /// cell the column collapses into.
    pub fn column_position(&self, column: Key) -> DVec3 {
        self.src.voxel_center(column)
    }

    /// Key of the column voxel at up-ordered step `t`.
    fn key_at(&self, column: Key, t: i32) -> Key {
        column.with_axis(self.up_index, self.up_sign.wrapping_mul(t))
    }

    /// Height along the up axis of the voxel centre at step `t`.
    fn height_at(&self, t: i32) -> f64 {
        self.up_origin + t as f64 * self.resolution
    }

    /// Step containing `height`.
    fn step_of(&self, height: f64) -> i32 {
        ((height - self.up_origin) / self.resolution).round() as i32
    }

    /// Height of the support voxel: the projected sub-voxel mean when the
    /// source carries one and sub-voxel positioning is enabled, the voxel
    /// centre otherwise.
    fn support_height(&self, key: Key, t: i32) -> Result<f64> {
        if !self.ignore_subvoxel {
            if let Some(mean) = self.src.voxel_mean(key)? {
                return Ok(self.up_sign as f64 * mean[self.up_index]);
            }
        }
        Ok(self.height_at(t))
    }

    /// Select the supporting surface for `column`, searching outward from
    /// `base_height`.
    ///
    /// Walking the column bottom-up, the first occupied voxel becomes the
    /// provisional support; the run of non-occupied voxels above it
    /// accumulates clearance until the next obstruction either invalidates
    /// the support (run shorter than the minimum clearance) or commits it.
    /// Among committed supports the one nearest the base height wins, ties
    /// resolving upward. Columns with no committed support may fall back to
    /// a virtual surface: the lowest free voxel resting on unknown space.
    pub fn select_surface(
        &self,
        column: Key,
        base_height: f64,
    ) -> Result<Option<ColumnSurface>> {
        let mut t_hi = self.t_hi;
        if let Some(steps) = self.ceiling_steps {
            t_hi = t_hi.min(self.step_of(base_height).saturating_add(steps));
        }

        let mut provisional: Option<Provisional> = None;
        let mut best: Option<(Key, f64, f64)> = None;
        let mut virtual_candidate: Option<(Key, f64)> = None;

        let mut prev_kind = if self.t_lo <= t_hi {
            self.src
                .voxel_kind(self.key_at(column, self.t_lo.saturating_sub(1)))?
        } else {
            VoxelKind::Unknown
        };

        for t in self.t_lo..=t_hi {
            let key = self.key_at(column, t);
            let kind = self.src.voxel_kind(key)?;
            match kind {
                VoxelKind::Occupied => {
                    if let Some(support) = provisional.take() {
                        let clearance = support
                            .run_top
                            .map(|top| top - support.height)
                            .unwrap_or(0.0);
                        if clearance >= self.min_clearance {
                            best = nearer(best, (support.key, support.height, clearance), base_height);
                        }
                    }
                    provisional = Some(Provisional {
                        key,
                        height: self.support_height(key, t)?,
                        run_top: None,
                    });
                }
                VoxelKind::Free | VoxelKind::Unknown => {
                    // Only occupied voxels obstruct: unknown space counts
                    // toward the clear run above a support.
                    if let Some(support) = provisional.as_mut() {
                        support.run_top = Some(self.height_at(t));
                    }
                    if kind == VoxelKind::Free
                        && prev_kind == VoxelKind::Unknown
                        && virtual_candidate.is_none()
                    {
                        virtual_candidate = Some((key, self.height_at(t)));
                    }
                }
            }
            prev_kind = kind;
        }

        // A support still provisional at the top of the range commits: the
        // space beyond the range is unobserved. When the measured run falls
        // short of the minimum clearance the no-information sentinel is
        // reported instead of the partial measurement.
        if let Some(support) = provisional {
            let candidate = match support.run_top {
                None => (support.key, support.height, 0.0),
                Some(top) => {
                    let measured = top - support.height;
                    if measured >= self.min_clearance {
                        (support.key, support.height, measured)
                    } else {
                        (support.key, support.height, 0.0)
                    }
                }
            };
            best = nearer(best, candidate, base_height);
        }

        if let Some((key, height, clearance)) = best {
            return Ok(Some(ColumnSurface::Real {
                key,
                height,
                clearance: clearance as f32,
            }));
        }
        if self.generate_virtual_surface {
            if let Some((key, height)) = virtual_candidate {
                return Ok(Some(ColumnSurface::Virtual { key, height }));
            }
        }
        Ok(None)
    }
}

/// Keep whichever candidate lies nearer the base height; equal distances
/// resolve toward up.
fn nearer(
    best: Option<(Key, f64, f64)>,
    candidate: (Key, f64, f64),
    base_height: f64,
) -> Option<(Key, f64, f64)> {
    match best {
        None => Some(candidate),
        Some(current) => {
            let candidate_dist = (candidate.1 - base_height).abs();
            let current_dist = (current.1 - base_height).abs();
            if candidate_dist < current_dist
                || (candidate_dist == current_dist && candidate.1 > current.1)
            {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IVec3;
    use crate::map::MapLayout;

    const OCCUPIED: f32 = 1.0;
    const FREE: f32 = -1.0;

    fn column_map(cells: &[(i32, f32)]) -> OccupancyMap {
        let mut map = OccupancyMap::new(1.0, IVec3::splat(16), MapLayout::occupancy());
        for &(z, value) in cells {
            map.set_occupancy(Key::new(0, 0, z), value).unwrap();
        }
        map
    }

    fn search<'a>(
        map: &'a OccupancyMap,
        min_clearance: f64,
        generate_virtual_surface: bool,
    ) -> ColumnSearch<'a> {
        ColumnSearch::new(
            map,
            UpAxis::PosZ,
            min_clearance,
            0.0,
            generate_virtual_surface,
            false,
            &Aabb::EVERYTHING,
        )
    }

    #[test]
    fn test_insufficient_clearance_rejects_support() {
        // Occupied at 0 and 2; the gap of one voxel is below the required
        // clearance, so the upper support wins.
        let map = column_map(&[
            (0, OCCUPIED),
            (1, FREE),
            (2, OCCUPIED),
            (3, FREE),
            (4, FREE),
        ]);
        let search = search(&map, 1.5, false);
        let surface = search.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Real {
                key: Key::new(0, 0, 2),
                height: 2.0,
                clearance: 2.0,
            })
        );
    }

    #[test]
    fn test_nearest_candidate_wins() {
        // Valid supports at 1 and 5; a base nearer the lower one selects it.
        let map = column_map(&[
            (1, OCCUPIED),
            (2, FREE),
            (3, FREE),
            (4, FREE),
            (5, OCCUPIED),
            (6, FREE),
            (7, FREE),
        ]);
        let search = search(&map, 1.0, false);
        let surface = search.select_surface(Key::new(0, 0, 0), 2.0).unwrap();
        assert!(matches!(
            surface,
            Some(ColumnSurface::Real { height, .. }) if height == 1.0
        ));
    }

    #[test]
    fn test_equal_distance_resolves_upward() {
        let map = column_map(&[
            (1, OCCUPIED),
            (2, FREE),
            (3, FREE),
            (4, FREE),
            (5, OCCUPIED),
            (6, FREE),
            (7, FREE),
        ]);
        let search = search(&map, 1.0, false);
        // Base exactly between the two candidates.
        let surface = search.select_surface(Key::new(0, 0, 0), 3.0).unwrap();
        assert!(matches!(
            surface,
            Some(ColumnSurface::Real { height, .. }) if height == 5.0
        ));
    }

    #[test]
    fn test_unknown_counts_toward_clearance() {
        // Unknown voxels above the support do not obstruct; the support at 0
        // clears through one free and one unknown voxel.
        let map = column_map(&[(0, OCCUPIED), (1, FREE), (3, FREE), (4, OCCUPIED)]);
        let search = search(&map, 2.5, false);
        let surface = search.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Real {
                key: Key::new(0, 0, 0),
                height: 0.0,
                clearance: 3.0,
            })
        );
    }

    #[test]
    fn test_virtual_surface_is_lowest_free_above_unknown() {
        // Unknown below 1 and between 2 and 4: the lowest transition wins.
        let map = column_map(&[(1, FREE), (2, FREE), (4, FREE)]);
        let search = search(&map, 0.5, true);
        let surface = search.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Virtual {
                key: Key::new(0, 0, 1),
                height: 1.0,
            })
        );
    }

    #[test]
    fn test_virtual_surface_requires_flag() {
        let map = column_map(&[(1, FREE), (2, FREE)]);
        let search = search(&map, 0.5, false);
        assert_eq!(search.select_surface(Key::new(0, 0, 0), 0.0).unwrap(), None);
    }

    #[test]
    fn test_real_surface_beats_virtual() {
        let map = column_map(&[(1, FREE), (2, OCCUPIED), (3, FREE), (4, FREE)]);
        let search = search(&map, 0.5, true);
        let surface = search.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert!(matches!(surface, Some(ColumnSurface::Real { .. })));
    }

    #[test]
    fn test_support_short_of_clearance_at_range_top_reports_no_information() {
        // One free voxel above the support before the observed range ends:
        // the support commits with the no-information sentinel.
        let map = column_map(&[(0, OCCUPIED), (1, FREE)]);
        let search = search(&map, 1.5, false);
        let surface = search.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Real {
                key: Key::new(0, 0, 0),
                height: 0.0,
                clearance: 0.0,
            })
        );
    }

    #[test]
    fn test_empty_cull_fails_column() {
        let map = column_map(&[(0, OCCUPIED), (1, FREE), (2, FREE)]);
        let search = ColumnSearch::new(
            &map,
            UpAxis::PosZ,
            0.5,
            0.0,
            true,
            false,
            &Aabb::NOTHING,
        );
        assert_eq!(search.select_surface(Key::new(0, 0, 0), 0.0).unwrap(), None);
    }

    #[test]
    fn test_ceiling_caps_search_above_base() {
        let map = column_map(&[(3, OCCUPIED), (4, FREE), (5, FREE)]);
        // Ceiling of two voxels above a base at zero cannot reach the support.
        let capped = ColumnSearch::new(
            &map,
            UpAxis::PosZ,
            0.5,
            2.0,
            false,
            false,
            &Aabb::EVERYTHING,
        );
        assert_eq!(capped.select_surface(Key::new(0, 0, 0), 0.0).unwrap(), None);
        // Raising the base brings it back in range.
        assert!(capped
            .select_surface(Key::new(0, 0, 0), 2.0)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_subvoxel_mean_shifts_support_height() {
        let mut map = OccupancyMap::new(
            1.0,
            IVec3::splat(16),
            MapLayout::occupancy_with_mean(),
        );
        map.set_occupancy(Key::new(0, 0, 0), OCCUPIED).unwrap();
        map.integrate_voxel_mean(Key::new(0, 0, 0), DVec3::new(0.0, 0.0, 0.25))
            .unwrap();
        map.set_occupancy(Key::new(0, 0, 1), FREE).unwrap();
        map.set_occupancy(Key::new(0, 0, 2), FREE).unwrap();

        let subvoxel = ColumnSearch::new(
            &map,
            UpAxis::PosZ,
            0.5,
            0.0,
            false,
            false,
            &Aabb::EVERYTHING,
        );
        let surface = subvoxel.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Real {
                key: Key::new(0, 0, 0),
                height: 0.25,
                clearance: 1.75,
            })
        );

        let centred = ColumnSearch::new(
            &map,
            UpAxis::PosZ,
            0.5,
            0.0,
            false,
            true,
            &Aabb::EVERYTHING,
        );
        let surface = centred.select_surface(Key::new(0, 0, 0), 0.0).unwrap();
        assert_eq!(
            surface,
            Some(ColumnSurface::Real {
                key: Key::new(0, 0, 0),
                height: 0.0,
                clearance: 2.0,
            })
        );
    }
}
