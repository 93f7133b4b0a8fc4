//! Synthetic multi-resolution sources and converters for demos and tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use view::AffineTransform3d;

use crate::{
    CacheHints, CellGrid, Converter, Interpolation, IoBudget, LoadingStrategy, MipmapOrdering,
    PrefetchError, Sampler, Source, Timepoint, VolatileSource, Voxel,
};

const CELL_SIZE: u32 = 16;

/// Entries kept per hint or fetch log.
pub const LOG_CAPACITY: usize = 1024;

#[derive(Debug)]
struct PyramidLevel {
    dimensions: [u64; 3],
    values: Arc<Vec<f64>>,
    transform: AffineTransform3d,
    loaded: Arc<AtomicBool>,
    hints: Mutex<Option<CacheHints>>,
}

/// Simulated synchronous loads drawing on a shared IO budget.
#[derive(Debug, Clone)]
struct BlockingLoads {
    budget: Arc<IoBudget>,
    load_time: Duration,
}

/// Image pyramid with power-of-two downsampling, filled from a function of
/// world coordinates.
///
/// Hint and fetch logs keep the most recent [`LOG_CAPACITY`] entries.
pub struct PyramidSource {
    name: String,
    levels: Vec<PyramidLevel>,
    volatile: bool,
    fail_fetches: AtomicBool,
    hints: Mutex<VecDeque<(usize, CacheHints)>>,
    fetched: Mutex<VecDeque<(usize, [u64; 3])>>,
    ordering: Option<Arc<dyn MipmapOrdering>>,
    blocking_loads: Option<BlockingLoads>,
}

impl PyramidSource {
    pub fn new(
        name: impl Into<String>,
        finest_dimensions: [u64; 3],
        num_levels: usize,
        value: impl Fn([f64; 3]) -> f64,
    ) -> Self {
        Self::with_world_transform(
            name,
            finest_dimensions,
            num_levels,
            AffineTransform3d::identity(),
            value,
        )
    }

    /// Like `new`, with `world` mapping finest-level voxels to world space.
    pub fn with_world_transform(
        name: impl Into<String>,
        finest_dimensions: [u64; 3],
        num_levels: usize,
        world: AffineTransform3d,
        value: impl Fn([f64; 3]) -> f64,
    ) -> Self {
        let mut levels = Vec::with_capacity(num_levels.max(1));
        for level in 0..num_levels.max(1) {
            let factor = 1_u64 << level;
            // Single-slice pyramids only downsample in plane.
            let z_factor = if finest_dimensions[2] > 1 { factor } else { 1 };
            let dimensions = [
                finest_dimensions[0].div_ceil(factor).max(1),
                finest_dimensions[1].div_ceil(factor).max(1),
                finest_dimensions[2].div_ceil(z_factor).max(1),
            ];
            let (scale, z_scale) = (factor as f64, z_factor as f64);
            let (offset, z_offset) = (0.5 * (scale - 1.0), 0.5 * (z_scale - 1.0));
            let level_to_finest = AffineTransform3d::from_rows([
                [scale, 0.0, 0.0, offset],
                [0.0, scale, 0.0, offset],
                [0.0, 0.0, z_scale, z_offset],
            ])
            .unwrap_or_else(|err| panic!("level {level} transform: {err}"));
            let transform = world.concatenate(&level_to_finest);

            let voxel_count = dimensions[0] * dimensions[1] * dimensions[2];
            let mut values = Vec::with_capacity(voxel_count as usize);
            for z in 0..dimensions[2] {
                for y in 0..dimensions[1] {
                    for x in 0..dimensions[0] {
                        values.push(value(transform.apply([x as f64, y as f64, z as f64])));
                    }
                }
            }
            levels.push(PyramidLevel {
                dimensions,
                values: Arc::new(values),
                transform,
                loaded: Arc::new(AtomicBool::new(true)),
                hints: Mutex::new(None),
            });
        }
        Self {
            name: name.into(),
            levels,
            volatile: false,
            fail_fetches: AtomicBool::new(false),
            hints: Mutex::new(VecDeque::new()),
            fetched: Mutex::new(VecDeque::new()),
            ordering: None,
            blocking_loads: None,
        }
    }

    /// Makes the source volatile: every level starts unloaded and reports
    /// placeholder samples until `set_loaded` is called.
    pub fn into_volatile(mut self) -> Self {
        self.volatile = true;
        for level in &self.levels {
            level.loaded.store(false, Ordering::Release);
        }
        self
    }

    /// Lets unloaded levels hinted `Blocking` or `BudgetedBlocking` load on
    /// first sample. A budgeted load takes `load_time` from `budget` at the
    /// level's queue priority and only happens while that much time is left.
    pub fn with_io_budget(mut self, budget: Arc<IoBudget>, load_time: Duration) -> Self {
        self.blocking_loads = Some(BlockingLoads { budget, load_time });
        self
    }

    pub fn with_mipmap_ordering(mut self, ordering: Arc<dyn MipmapOrdering>) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn set_loaded(&self, level: usize, loaded: bool) {
        if let Some(level) = self.levels.get(level) {
            level.loaded.store(loaded, Ordering::Release);
        }
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::Release);
    }

    pub fn is_loaded(&self, level: usize) -> bool {
        self.levels
            .get(level)
            .is_some_and(|level| level.loaded.load(Ordering::Acquire))
    }

    pub fn recorded_hints(&self) -> Vec<(usize, CacheHints)> {
        self.hints
            .lock()
            .unwrap_or_else(|_| panic!("hint log lock poisoned"))
            .iter()
            .copied()
            .collect()
    }

    pub fn fetched_cells(&self) -> Vec<(usize, [u64; 3])> {
        self.fetched
            .lock()
            .unwrap_or_else(|_| panic!("fetch log lock poisoned"))
            .iter()
            .copied()
            .collect()
    }
}

impl Source for PyramidSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_mipmap_levels(&self) -> usize {
        self.levels.len()
    }

    fn source_transform(&self, _timepoint: Timepoint, level: usize) -> AffineTransform3d {
        self.levels
            .get(level)
            .map(|level| level.transform)
            .unwrap_or_else(AffineTransform3d::identity)
    }

    fn dimensions(&self, _timepoint: Timepoint, level: usize) -> [u64; 3] {
        self.levels.get(level).map_or([0; 3], |level| level.dimensions)
    }

    fn interpolated(
        &self,
        _timepoint: Timepoint,
        level: usize,
        interpolation: Interpolation,
    ) -> Arc<dyn Sampler> {
        let level = &self.levels[level.min(self.levels.len() - 1)];
        let hints = *level
            .hints
            .lock()
            .unwrap_or_else(|_| panic!("level hints lock poisoned"));
        let blocking_load = self.blocking_loads.as_ref().and_then(|loads| {
            let hints = hints?;
            let budgeted = match hints.loading_strategy {
                LoadingStrategy::Blocking => false,
                LoadingStrategy::BudgetedBlocking => true,
                LoadingStrategy::Volatile | LoadingStrategy::DontLoad => return None,
            };
            Some(BlockingLoad {
                budget: Arc::clone(&loads.budget),
                load_time: loads.load_time,
                priority: usize::try_from(hints.queue_priority).unwrap_or(0),
                budgeted,
            })
        });
        Arc::new(LevelSampler {
            dimensions: level.dimensions,
            values: Arc::clone(&level.values),
            loaded: Arc::clone(&level.loaded),
            interpolation,
            blocking_load,
        })
    }

    fn volatile(&self) -> Option<&dyn VolatileSource> {
        if self.volatile { Some(self) } else { None }
    }

    fn mipmap_ordering(&self) -> Option<&dyn MipmapOrdering> {
        self.ordering.as_deref()
    }
}

impl VolatileSource for PyramidSource {
    fn default_cache_hints(&self) -> CacheHints {
        CacheHints::new(LoadingStrategy::Volatile, 0, false)
    }

    fn set_cache_hints(&self, _timepoint: Timepoint, level: usize, hints: CacheHints) {
        if let Some(pyramid_level) = self.levels.get(level) {
            *pyramid_level
                .hints
                .lock()
                .unwrap_or_else(|_| panic!("level hints lock poisoned")) = Some(hints);
        }
        push_bounded(
            &mut self.hints.lock().unwrap_or_else(|_| panic!("hint log lock poisoned")),
            (level, hints),
        );
    }

    fn cell_grid(&self, _timepoint: Timepoint, level: usize) -> Option<CellGrid> {
        self.levels.get(level).map(|level| CellGrid {
            dimensions: level.dimensions,
            cell_dimensions: [CELL_SIZE; 3],
        })
    }

    fn fetch_cell(
        &self,
        _timepoint: Timepoint,
        level: usize,
        cell: [u64; 3],
    ) -> Result<(), PrefetchError> {
        if self.fail_fetches.load(Ordering::Acquire) {
            return Err(PrefetchError::Load {
                level,
                cell,
                message: "fetch disabled".to_owned(),
            });
        }
        let grid = self
            .cell_grid(0, level)
            .ok_or(PrefetchError::CellOutOfBounds { level, cell })?
            .grid_dimensions();
        if (0..3).any(|axis| cell[axis] >= grid[axis]) {
            return Err(PrefetchError::CellOutOfBounds { level, cell });
        }
        push_bounded(
            &mut self.fetched.lock().unwrap_or_else(|_| panic!("fetch log lock poisoned")),
            (level, cell),
        );
        Ok(())
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() == LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

struct BlockingLoad {
    budget: Arc<IoBudget>,
    load_time: Duration,
    priority: usize,
    budgeted: bool,
}

struct LevelSampler {
    dimensions: [u64; 3],
    values: Arc<Vec<f64>>,
    loaded: Arc<AtomicBool>,
    interpolation: Interpolation,
    blocking_load: Option<BlockingLoad>,
}

impl LevelSampler {
    /// Loads the level synchronously if its hints allow it and, for budgeted
    /// loads, enough IO time is left at its priority.
    fn load_now(&self) -> bool {
        let Some(load) = &self.blocking_load else {
            return false;
        };
        if load.budgeted && load.budget.time_left(load.priority) < load.load_time {
            return false;
        }
        let first = self
            .loaded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first && load.budgeted {
            load.budget.spend(load.priority, load.load_time);
        }
        true
    }

    /// Value at an integer voxel; zero outside the level.
    fn voxel(&self, position: [i64; 3]) -> f64 {
        let mut index = 0_u64;
        let mut stride = 1_u64;
        for axis in 0..3 {
            let coordinate = position[axis];
            if coordinate < 0 || coordinate as u64 >= self.dimensions[axis] {
                return 0.0;
            }
            index += coordinate as u64 * stride;
            stride *= self.dimensions[axis];
        }
        self.values[index as usize]
    }
}

impl Sampler for LevelSampler {
    fn sample(&self, position: [f64; 3]) -> Voxel {
        if !self.loaded.load(Ordering::Acquire) && !self.load_now() {
            return Voxel::PENDING;
        }
        match self.interpolation {
            Interpolation::NearestNeighbor => Voxel::valid(self.voxel([
                (position[0] + 0.5).floor() as i64,
                (position[1] + 0.5).floor() as i64,
                (position[2] + 0.5).floor() as i64,
            ])),
            Interpolation::NLinear => {
                let base = position.map(|p| p.floor());
                let fraction = [
                    position[0] - base[0],
                    position[1] - base[1],
                    position[2] - base[2],
                ];
                let mut value = 0.0;
                for corner in 0..8_u8 {
                    let mut weight = 1.0;
                    let mut voxel = [0_i64; 3];
                    for axis in 0..3 {
                        let upper = (corner >> axis) & 1 == 1;
                        voxel[axis] = base[axis] as i64 + i64::from(upper);
                        weight *= if upper { fraction[axis] } else { 1.0 - fraction[axis] };
                    }
                    if weight > 0.0 {
                        value += weight * self.voxel(voxel);
                    }
                }
                Voxel::valid(value)
            }
        }
    }
}

/// Linear gray ramp between `min` and `max`, fully opaque.
#[derive(Debug, Clone, Copy)]
pub struct GrayConverter {
    pub min: f64,
    pub max: f64,
}

impl GrayConverter {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Converter for GrayConverter {
    fn convert(&self, value: f64) -> u32 {
        let range = self.max - self.min;
        let normalized = if range > 0.0 {
            ((value - self.min) / range).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let gray = (normalized * 255.0).round() as u32;
        0xff00_0000 | (gray << 16) | (gray << 8) | gray
    }
}

/// Ignores the value and returns a fixed color.
#[derive(Debug, Clone, Copy)]
pub struct ConstantConverter(pub u32);

impl Converter for ConstantConverter {
    fn convert(&self, _value: f64) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheControl;

    #[test]
    fn pyramid_levels_halve_and_center_voxels() {
        let source = PyramidSource::new("ramp", [8, 4, 1], 3, |p| p[0]);
        assert_eq!(source.dimensions(0, 1), [4, 2, 1]);
        assert_eq!(source.dimensions(0, 2), [2, 1, 1]);

        let coarse = source.source_transform(0, 1);
        assert_eq!(coarse.apply([0.0, 0.0, 0.0]), [0.5, 0.5, 0.0]);
        let sampler = source.interpolated(0, 1, Interpolation::NearestNeighbor);
        assert_eq!(sampler.sample([1.0, 0.0, 0.0]), Voxel::valid(2.5));
        assert_eq!(sampler.sample([-3.0, 0.0, 0.0]), Voxel::valid(0.0));
    }

    #[test]
    fn nlinear_blends_neighbors() {
        let source = PyramidSource::new("ramp", [4, 1, 1], 1, |p| p[0]);
        let sampler = source.interpolated(0, 0, Interpolation::NLinear);
        let voxel = sampler.sample([1.5, 0.0, 0.0]);
        assert!((voxel.value - 1.5).abs() < 1e-12);
    }

    #[test]
    fn volatile_levels_report_placeholders_until_loaded() {
        let source = PyramidSource::new("v", [4, 4, 1], 2, |_| 1.0).into_volatile();
        let sampler = source.interpolated(0, 0, Interpolation::NearestNeighbor);
        assert!(!sampler.sample([0.0, 0.0, 0.0]).valid);
        source.set_loaded(0, true);
        assert!(sampler.sample([0.0, 0.0, 0.0]).valid);
    }

    #[test]
    fn fetch_rejects_cells_outside_grid() {
        let source = PyramidSource::new("v", [20, 4, 1], 1, |_| 1.0).into_volatile();
        assert!(source.fetch_cell(0, 0, [1, 0, 0]).is_ok());
        assert_eq!(
            source.fetch_cell(0, 0, [2, 0, 0]),
            Err(PrefetchError::CellOutOfBounds {
                level: 0,
                cell: [2, 0, 0]
            })
        );
        assert_eq!(source.fetched_cells(), vec![(0, [1, 0, 0])]);
    }

    #[test]
    fn budgeted_blocking_load_spends_budget_at_level_priority() {
        let budget = Arc::new(IoBudget::new());
        budget.reset_budget(&[Duration::from_millis(100), Duration::from_millis(10)]);
        let source = PyramidSource::new("b", [4, 4, 1], 3, |_| 1.0)
            .into_volatile()
            .with_io_budget(Arc::clone(&budget), Duration::from_millis(6));

        source.set_cache_hints(0, 1, CacheHints::new(LoadingStrategy::BudgetedBlocking, 1, true));
        let sampler = source.interpolated(0, 1, Interpolation::NearestNeighbor);
        assert!(sampler.sample([0.0, 0.0, 0.0]).valid);
        assert!(source.is_loaded(1));
        assert_eq!(budget.time_left(0), Duration::from_millis(94));
        assert_eq!(budget.time_left(1), Duration::from_millis(4));

        // 4 ms left at priority 1 is not enough for another 6 ms load.
        source.set_cache_hints(0, 0, CacheHints::new(LoadingStrategy::BudgetedBlocking, 1, false));
        let sampler = source.interpolated(0, 0, Interpolation::NearestNeighbor);
        assert!(!sampler.sample([0.0, 0.0, 0.0]).valid);
        assert!(!source.is_loaded(0));
    }

    #[test]
    fn only_blocking_hints_load_on_sample() {
        let budget = Arc::new(IoBudget::new());
        let source = PyramidSource::new("b", [4, 4, 1], 2, |_| 1.0)
            .into_volatile()
            .with_io_budget(Arc::clone(&budget), Duration::from_millis(1));

        source.set_cache_hints(0, 0, CacheHints::new(LoadingStrategy::Volatile, 0, false));
        let sampler = source.interpolated(0, 0, Interpolation::NearestNeighbor);
        assert!(!sampler.sample([0.0, 0.0, 0.0]).valid);

        // Unbudgeted blocking loads ignore the (empty) budget.
        source.set_cache_hints(0, 1, CacheHints::new(LoadingStrategy::Blocking, 0, false));
        let sampler = source.interpolated(0, 1, Interpolation::NearestNeighbor);
        assert!(sampler.sample([0.0, 0.0, 0.0]).valid);
        assert_eq!(budget.time_left(0), Duration::ZERO);
    }

    #[test]
    fn hint_log_keeps_most_recent_entries() {
        let source = PyramidSource::new("v", [4, 4, 1], 1, |_| 1.0).into_volatile();
        for priority in 0..(LOG_CAPACITY + 3) {
            let priority = i32::try_from(priority).expect("priority");
            let hints = CacheHints::new(LoadingStrategy::Volatile, priority, false);
            source.set_cache_hints(0, 0, hints);
        }
        let hints = source.recorded_hints();
        assert_eq!(hints.len(), LOG_CAPACITY);
        assert_eq!(hints[0].1.queue_priority, 3);
    }
}
