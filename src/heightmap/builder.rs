//! Heightmap construction around a reference position

use crate::core::error::Error;
use crate::core::types::{DVec3, IVec3, Result};
use crate::heightmap::column::{ColumnSearch, ColumnSurface};
use crate::heightmap::up_axis::UpAxis;
use crate::heightmap::voxel::{
    heightmap_layout, HeightmapVoxel, HEIGHTMAP_LAYER, SURFACE_VALUE, VACANT_VALUE,
    VIRTUAL_SURFACE_VALUE,
};
use crate::heightmap::walker::{ColumnWalker, FloodFillWalker, Footprint, PlanarWalker};
use crate::map::{Key, MapInfo, OccupancyMap, UNOBSERVED_OCCUPANCY};
use crate::math::Aabb;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

/// Metadata keys written to the heightmap grid.
pub const INFO_HEIGHTMAP: &str = "heightmap";
pub const INFO_HEIGHTMAP_AXIS: &str = "heightmap-axis";
pub const INFO_HEIGHTMAP_AXIS_X: &str = "heightmap-axis-x";
pub const INFO_HEIGHTMAP_AXIS_Y: &str = "heightmap-axis-y";
pub const INFO_HEIGHTMAP_AXIS_Z: &str = "heightmap-axis-z";
pub const INFO_HEIGHTMAP_CLEARANCE: &str = "heightmap-clearance";
pub const INFO_HEIGHTMAP_BLUR: &str = "heightmap-blur";

/// How one column resolved.
enum ColumnOutcome {
    Surface { height: f64, clearance: f32 },
    VirtualSurface { height: f64 },
    /// Patched from the previous build's local cache.
    Cached {
        occupancy: f32,
        voxel: HeightmapVoxel,
    },
    Vacant,
}

impl ColumnOutcome {
    /// Surface height flood fill propagates to neighbour columns.
    fn committed_height(&self) -> Option<f64> {
        match self {
            ColumnOutcome::Surface { height, .. } => Some(*height),
            ColumnOutcome::VirtualSurface { height } => Some(*height),
            ColumnOutcome::Cached { voxel, .. } => Some(voxel.height),
            ColumnOutcome::Vacant => None,
        }
    }
}

/// Builds a 2D heightmap from a source occupancy map.
///
/// The heightmap is its own single-voxel-deep occupancy map: an occupancy
/// layer carrying the surface sentinels plus a layer of [`HeightmapVoxel`]
/// records. Each build collapses every source column in range to the
/// supporting voxel nearest the reference height with at least
/// `min_clearance` of free space above it, optionally synthesising virtual
/// surfaces where free space rests on unknown. A local cache of recent
/// output around the reference position patches columns the live pass cannot
/// resolve, covering blind spots and map erosion.
pub struct Heightmap {
    up_axis: UpAxis,
    min_clearance: f64,
    ceiling: f64,
    local_cache_extents: f64,
    generate_virtual_surface: bool,
    use_flood_fill: bool,
    ignore_subvoxel_positioning: bool,
    thread_count: u32,
    heightmap_layer: usize,
    source: Option<Arc<OccupancyMap>>,
    heightmap: OccupancyMap,
    local_cache: OccupancyMap,
}

impl Heightmap {
    /// Region edge length used when none is given.
    pub const DEFAULT_REGION_SIZE: u32 = 128;

    /// Create a heightmap builder.
    ///
    /// `grid_resolution` should match the source map for best results.
    /// `region_size` of zero selects [`Heightmap::DEFAULT_REGION_SIZE`];
    /// regions are always one voxel deep along the up axis.
    pub fn new(
        grid_resolution: f64,
        min_clearance: f64,
        up_axis: UpAxis,
        region_size: u32,
    ) -> Self {
        let region_size = if region_size == 0 {
            Self::DEFAULT_REGION_SIZE
        } else {
            region_size
        };
        let mut region_dims = IVec3::splat(region_size as i32);
        region_dims[up_axis.index()] = 1;

        let heightmap = OccupancyMap::new(grid_resolution, region_dims, heightmap_layout());
        let local_cache = OccupancyMap::new(grid_resolution, region_dims, heightmap_layout());
        let heightmap_layer = heightmap
            .layer_index(HEIGHTMAP_LAYER)
            .expect("heightmap layout must contain the heightmap layer");

        Self {
            up_axis,
            min_clearance,
            ceiling: 0.0,
            local_cache_extents: 0.0,
            generate_virtual_surface: false,
            use_flood_fill: false,
            ignore_subvoxel_positioning: false,
            thread_count: 1,
            heightmap_layer,
            source: None,
            heightmap,
            local_cache,
        }
    }

    /// Set the source map the heightmap is built from.
    pub fn set_occupancy_map(&mut self, map: Arc<OccupancyMap>) {
        self.source = Some(map);
    }

    pub fn occupancy_map(&self) -> Option<&Arc<OccupancyMap>> {
        self.source.as_ref()
    }

    /// The generated heightmap.
    pub fn heightmap(&self) -> &OccupancyMap {
        &self.heightmap
    }

    /// The cache of recent heightmap output around the last reference
    /// position.
    pub fn heightmap_local_cache(&self) -> &OccupancyMap {
        &self.local_cache
    }

    /// Index of the layer holding [`HeightmapVoxel`] records in both the
    /// heightmap and the local cache.
    pub fn heightmap_voxel_layer(&self) -> usize {
        self.heightmap_layer
    }

    /// Maximum height above a column's base the search may consider.
    /// Zero disables the cap.
    pub fn set_ceiling(&mut self, ceiling: f64) {
        self.ceiling = ceiling;
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    /// Minimum free height above a voxel for it to support a surface.
    pub fn set_min_clearance(&mut self, clearance: f64) {
        self.min_clearance = clearance;
    }

    pub fn min_clearance(&self) -> f64 {
        self.min_clearance
    }

    /// Force voxel centres even when the source stores sub-voxel means.
    pub fn set_ignore_subvoxel_positioning(&mut self, ignore: bool) {
        self.ignore_subvoxel_positioning = ignore;
    }

    pub fn ignore_subvoxel_positioning(&self) -> bool {
        self.ignore_subvoxel_positioning
    }

    /// Generate virtual surfaces at the interface between free and unknown
    /// voxels in columns with no occupied support.
    pub fn set_generate_virtual_surface(&mut self, enable: bool) {
        self.generate_virtual_surface = enable;
    }

    pub fn generate_virtual_surface(&self) -> bool {
        self.generate_virtual_surface
    }

    /// Select flood fill (`true`) or the planar sweep (`false`).
    pub fn set_use_flood_fill(&mut self, flood_fill: bool) {
        self.use_flood_fill = flood_fill;
    }

    pub fn use_flood_fill(&self) -> bool {
        self.use_flood_fill
    }

    /// Half-extent of the local cache box around the reference position.
    /// Zero disables caching.
    pub fn set_local_cache_extents(&mut self, extents: f64) {
        self.local_cache_extents = extents;
    }

    pub fn local_cache_extents(&self) -> f64 {
        self.local_cache_extents
    }

    /// Worker threads for the planar sweep: 1 stays single threaded, 0 uses
    /// all available cores. Flood fill is always single threaded.
    pub fn set_thread_count(&mut self, thread_count: u32) {
        self.thread_count = thread_count;
    }

    pub fn thread_count(&self) -> u32 {
        self.thread_count
    }

    pub fn up_axis(&self) -> UpAxis {
        self.up_axis
    }

    pub fn up_axis_index(&self) -> usize {
        self.up_axis.index()
    }

    pub fn up_axis_normal(&self) -> DVec3 {
        self.up_axis.normal()
    }

    pub fn surface_axis_a(&self) -> DVec3 {
        self.up_axis.surface_axis_a()
    }

    pub fn surface_axis_b(&self) -> DVec3 {
        self.up_axis.surface_axis_b()
    }

    /// Collapse `key` onto the heightmap's single slice along the up axis.
    /// Idempotent; the canonical way to address heightmap cells.
    pub fn project(&self, key: Key) -> Key {
        key.with_axis(self.up_axis.index(), 0)
    }

    /// Record the construction parameters in `info`.
    pub fn update_map_info(&self, info: &mut MapInfo) {
        info.set_bool(INFO_HEIGHTMAP, true);
        info.set_int(INFO_HEIGHTMAP_AXIS, self.up_axis.id() as i64);
        let normal = self.up_axis.normal();
        info.set_float(INFO_HEIGHTMAP_AXIS_X, normal.x);
        info.set_float(INFO_HEIGHTMAP_AXIS_Y, normal.y);
        info.set_float(INFO_HEIGHTMAP_AXIS_Z, normal.z);
        info.set_float(INFO_HEIGHTMAP_CLEARANCE, self.min_clearance);
        // Blur is recorded for compatibility; no blur filtering is applied.
        info.set_float(INFO_HEIGHTMAP_BLUR, 0.0);
    }

    /// Seed the local cache from the current heightmap around
    /// `reference_pos`, enabling cache fallback on the next build.
    pub fn seed_local_cache(&mut self, reference_pos: DVec3) -> Result<()> {
        self.update_local_cache(reference_pos)
    }

    /// Build the heightmap around `reference_pos`, considering only source
    /// voxels inside `cull_to`. Pass [`Aabb::EVERYTHING`] to disable
    /// culling.
    ///
    /// The heightmap is cleared first; on failure after that point it stays
    /// cleared rather than exposing partial output.
    pub fn build_heightmap(&mut self, reference_pos: DVec3, cull_to: Aabb) -> Result<()> {
        if self.source.is_none() {
            return Err(Error::NoSourceMap);
        }
        if self.min_clearance < 0.0 {
            return Err(Error::InvalidParameters("min_clearance must be non-negative"));
        }
        if self.ceiling < 0.0 {
            return Err(Error::InvalidParameters("ceiling must be non-negative"));
        }
        if self.heightmap.resolution() <= 0.0 {
            return Err(Error::InvalidParameters("grid resolution must be positive"));
        }

        let result = self.build_internal(reference_pos, &cull_to);
        if result.is_err() {
            self.heightmap.clear();
        }
        result
    }

    fn build_internal(&mut self, reference_pos: DVec3, cull_to: &Aabb) -> Result<()> {
        let source = self
            .source
            .as_ref()
            .ok_or(Error::NoSourceMap)?
            .clone();
        let start = Instant::now();

        self.heightmap.clear();
        let mut info = self.heightmap.info().clone();
        self.update_map_info(&mut info);
        *self.heightmap.info_mut() = info;

        let footprint = Footprint::new(&source, self.up_axis, cull_to);
        let search = ColumnSearch::new(
            &source,
            self.up_axis,
            self.min_clearance,
            self.ceiling,
            self.generate_virtual_surface,
            self.ignore_subvoxel_positioning,
            cull_to,
        );
        let base_height = self.up_axis.normal().dot(reference_pos);

        let outcomes: Vec<(Key, ColumnOutcome)> = if footprint.is_empty() {
            Vec::new()
        } else if self.use_flood_fill {
            let seed = source.key_for_position(reference_pos);
            let (seed_a, seed_b) = footprint.clamp(
                seed.axis(footprint.axis_a()),
                seed.axis(footprint.axis_b()),
            );
            let mut walker = FloodFillWalker::new(&footprint, seed_a, seed_b, base_height);
            self.run_walker(&mut walker, &search)?
        } else if self.thread_count == 1 {
            let mut walker = PlanarWalker::new(&footprint, base_height);
            self.run_walker(&mut walker, &search)?
        } else {
            self.run_planar_parallel(&footprint, &search, base_height)?
        };

        // Output writes are column-disjoint; a single ordered pass keeps the
        // result independent of how the columns were resolved.
        for (column, outcome) in &outcomes {
            self.write_column(*column, outcome, &source)?;
        }

        self.update_local_cache(reference_pos)?;
        log::info!(
            "heightmap: {} columns in {:.3}s ({})",
            outcomes.len(),
            start.elapsed().as_secs_f64(),
            if self.use_flood_fill { "flood fill" } else { "planar" },
        );
        Ok(())
    }

    fn run_walker<W: ColumnWalker>(
        &self,
        walker: &mut W,
        search: &ColumnSearch,
    ) -> Result<Vec<(Key, ColumnOutcome)>> {
        let mut outcomes = Vec::new();
        while let Some((column, base_height)) = walker.next_column() {
            let outcome = self.resolve_column(search, column, base_height)?;
            walker.visited(outcome.committed_height());
            outcomes.push((column, outcome));
        }
        Ok(outcomes)
    }

    fn run_planar_parallel(
        &self,
        footprint: &Footprint,
        search: &ColumnSearch,
        base_height: f64,
    ) -> Result<Vec<(Key, ColumnOutcome)>> {
        let columns: Vec<Key> = footprint
            .cells()
            .into_iter()
            .map(|(a, b)| footprint.column_key(a, b))
            .collect();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.thread_count as usize)
            .build()
            .map_err(|err| Error::ThreadPool(err.to_string()))?;
        pool.install(|| {
            columns
                .par_iter()
                .map(|column| {
                    Ok((*column, self.resolve_column(search, *column, base_height)?))
                })
                .collect()
        })
    }

    fn resolve_column(
        &self,
        search: &ColumnSearch,
        column: Key,
        base_height: f64,
    ) -> Result<ColumnOutcome> {
        match search.select_surface(column, base_height)? {
            Some(ColumnSurface::Real {
                height, clearance, ..
            }) => Ok(ColumnOutcome::Surface { height, clearance }),
            Some(ColumnSurface::Virtual { height, .. }) => {
                Ok(ColumnOutcome::VirtualSurface { height })
            }
            None => {
                // The live pass failed; fall back to the snapshot of the
                // previous build's local cache.
                match self.lookup_local_cache(search.column_position(column))? {
                    Some((occupancy, voxel)) => Ok(ColumnOutcome::Cached { occupancy, voxel }),
                    None => Ok(ColumnOutcome::Vacant),
                }
            }
        }
    }

    /// Query the local cache at a position flattened to the surface plane.
    fn lookup_local_cache(&self, lookup_pos: DVec3) -> Result<Option<(f32, HeightmapVoxel)>> {
        let key = self.project(self.local_cache.key_for_position(lookup_pos));
        let occupancy = self.local_cache.occupancy(key)?;
        if occupancy == UNOBSERVED_OCCUPANCY || occupancy == VACANT_VALUE {
            return Ok(None);
        }
        let voxel = self
            .local_cache
            .read_record::<HeightmapVoxel>(self.heightmap_layer, key)?
            .unwrap_or_default();
        Ok(Some((occupancy, voxel)))
    }

    fn write_column(
        &mut self,
        column: Key,
        outcome: &ColumnOutcome,
        source: &OccupancyMap,
    ) -> Result<()> {
        let column_pos = source.voxel_center(column);
        let key = self.project(self.heightmap.key_for_position(column_pos));
        let (occupancy, voxel) = match outcome {
            ColumnOutcome::Surface { height, clearance } => {
                (SURFACE_VALUE, HeightmapVoxel::new(*height, *clearance))
            }
            ColumnOutcome::VirtualSurface { height } => {
                (VIRTUAL_SURFACE_VALUE, HeightmapVoxel::new(*height, 0.0))
            }
            ColumnOutcome::Cached { occupancy, voxel } => (*occupancy, *voxel),
            ColumnOutcome::Vacant => (VACANT_VALUE, HeightmapVoxel::default()),
        };
        self.heightmap.set_occupancy(key, occupancy)?;
        let layer = self.heightmap_layer;
        self.heightmap.write_record(layer, key, &voxel)
    }

    /// Rewrite the local cache from the live heightmap inside the cache box
    /// around `reference_pos`; entries outside the box are cleared.
    fn update_local_cache(&mut self, reference_pos: DVec3) -> Result<()> {
        self.local_cache.clear();
        if self.local_cache_extents <= 0.0 {
            return Ok(());
        }
        let axis_a = self.up_axis.surface_index_a();
        let axis_b = self.up_axis.surface_index_b();
        let res = self.heightmap.resolution();
        let origin = self.heightmap.origin();
        let range = |axis: usize| {
            let lo = ((reference_pos[axis] - self.local_cache_extents - origin[axis]) / res)
                .ceil() as i32;
            let hi = ((reference_pos[axis] + self.local_cache_extents - origin[axis]) / res)
                .floor() as i32;
            (lo, hi)
        };
        let (a_lo, a_hi) = range(axis_a);
        let (b_lo, b_hi) = range(axis_b);
        let layer = self.heightmap_layer;

        for b in b_lo..=b_hi {
            for a in a_lo..=a_hi {
                let key = Key::default().with_axis(axis_a, a).with_axis(axis_b, b);
                let occupancy = self.heightmap.occupancy(key)?;
                if occupancy == UNOBSERVED_OCCUPANCY {
                    continue;
                }
                let voxel = self
                    .heightmap
                    .read_record::<HeightmapVoxel>(layer, key)?
                    .unwrap_or_default();
                self.local_cache.set_occupancy(key, occupancy)?;
                self.local_cache.write_record(layer, key, &voxel)?;
            }
        }
        Ok(())
    }

    /// Resolve the world position and clearance of a heightmap voxel from
    /// either [`Heightmap::heightmap`] or [`Heightmap::heightmap_local_cache`].
    ///
    /// Returns `None` for vacant cells. See
    /// [`Heightmap::heightmap_voxel_position_with_reference`] for negative
    /// obstacle handling.
    pub fn heightmap_voxel_position(
        &self,
        map: &OccupancyMap,
        key: Key,
    ) -> Result<Option<(DVec3, f32)>> {
        self.voxel_position_impl(map, key, None)
    }

    /// As [`Heightmap::heightmap_voxel_position`], with negative obstacle
    /// synthesis: virtual or unresolved cells within
    /// `negative_obstacle_radius` of `reference_pos` (in the surface plane)
    /// report a parabolic height dropping below the reference, so that
    /// slope-based costing penalises holes and drops near the vehicle.
    pub fn heightmap_voxel_position_with_reference(
        &self,
        map: &OccupancyMap,
        key: Key,
        reference_pos: DVec3,
        negative_obstacle_radius: f64,
    ) -> Result<Option<(DVec3, f32)>> {
        self.voxel_position_impl(map, key, Some((reference_pos, negative_obstacle_radius)))
    }

    fn voxel_position_impl(
        &self,
        map: &OccupancyMap,
        key: Key,
        negative_obstacle: Option<(DVec3, f64)>,
    ) -> Result<Option<(DVec3, f32)>> {
        let key = self.project(key);
        let occupancy = map.occupancy(key)?;
        let center = map.voxel_center(key);
        let up_index = self.up_axis.index();
        let sign = if self.up_axis.is_negative() { -1.0 } else { 1.0 };

        let negative_height = negative_obstacle.and_then(|(reference_pos, radius)| {
            let axis_a = self.up_axis.surface_index_a();
            let axis_b = self.up_axis.surface_index_b();
            let da = center[axis_a] - reference_pos[axis_a];
            let db = center[axis_b] - reference_pos[axis_b];
            let d2 = da * da + db * db;
            if radius > 0.0 && d2 < radius * radius {
                let reference_up = self.up_axis.normal().dot(reference_pos);
                Some(reference_up - (radius * radius - d2) / radius)
            } else {
                None
            }
        });

        if occupancy == UNOBSERVED_OCCUPANCY {
            // Unresolved cell: synthesise a negative obstacle surface near
            // the reference, otherwise report nothing.
            return Ok(negative_height.map(|height| {
                let mut pos = center;
                pos[up_index] = sign * height;
                (pos, 0.0)
            }));
        }
        if occupancy == VACANT_VALUE {
            return Ok(None);
        }

        let voxel = map
            .read_record::<HeightmapVoxel>(self.heightmap_layer, key)?
            .unwrap_or_default();
        let mut height = voxel.height;
        let mut clearance = voxel.clearance;
        if occupancy < 0.0 {
            if let Some(synthesised) = negative_height {
                height = synthesised;
                clearance = 0.0;
            }
        }
        let mut pos = center;
        pos[up_index] = sign * height;
        Ok(Some((pos, clearance)))
    }
}
