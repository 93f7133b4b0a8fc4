//! Contracts between the progressive renderer and its collaborators.
//!
//! Sources, converters, the display sink, the painter thread and the cache
//! controller are all external to the renderer; this crate defines the traits
//! they implement and the value types that cross those boundaries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use screen_buffers::ScreenBuffer;
use smallvec::SmallVec;
use thiserror::Error;
use view::AffineTransform3d;

mod budget;
pub mod sample;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use budget::IoBudget;

pub type Timepoint = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolation {
    #[default]
    NearestNeighbor,
    NLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingStrategy {
    /// Return placeholder data immediately and enqueue the load.
    Volatile,
    /// Load synchronously.
    Blocking,
    /// Load synchronously while the frame's IO budget lasts.
    BudgetedBlocking,
    /// Never trigger a load.
    DontLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHints {
    pub loading_strategy: LoadingStrategy,
    pub queue_priority: i32,
    pub enqueue_to_front: bool,
}

impl CacheHints {
    pub const fn new(
        loading_strategy: LoadingStrategy,
        queue_priority: i32,
        enqueue_to_front: bool,
    ) -> Self {
        Self {
            loading_strategy,
            queue_priority,
            enqueue_to_front,
        }
    }
}

/// One sample of a source. `valid == false` marks placeholder data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub value: f64,
    pub valid: bool,
}

impl Voxel {
    pub const PENDING: Voxel = Voxel {
        value: 0.0,
        valid: false,
    };

    pub const fn valid(value: f64) -> Self {
        Self { value, valid: true }
    }
}

/// Continuous, interpolated view of one pyramid level in source coordinates.
pub trait Sampler: Send + Sync {
    fn sample(&self, position: [f64; 3]) -> Voxel;
}

/// Maps sample values to packed, non-premultiplied ARGB.
pub trait Converter: Send + Sync {
    fn convert(&self, value: f64) -> u32;
}

/// Cell layout of a cached pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellGrid {
    pub dimensions: [u64; 3],
    pub cell_dimensions: [u32; 3],
}

impl CellGrid {
    /// Number of cells along each axis.
    pub fn grid_dimensions(&self) -> [u64; 3] {
        let mut grid = [0; 3];
        for axis in 0..3 {
            let cell = u64::from(self.cell_dimensions[axis].max(1));
            grid[axis] = self.dimensions[axis].div_ceil(cell);
        }
        grid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefetchError {
    #[error("cell {cell:?} is outside the grid of level {level}")]
    CellOutOfBounds { level: usize, cell: [u64; 3] },
    #[error("loading cell {cell:?} of level {level} failed: {message}")]
    Load {
        level: usize,
        cell: [u64; 3],
        message: String,
    },
}

/// Capability of sources that can serve placeholder data while loading.
pub trait VolatileSource: Send + Sync {
    fn default_cache_hints(&self) -> CacheHints;

    fn set_cache_hints(&self, timepoint: Timepoint, level: usize, hints: CacheHints);

    /// `None` if the level is not backed by a cell cache.
    fn cell_grid(&self, timepoint: Timepoint, level: usize) -> Option<CellGrid>;

    fn fetch_cell(
        &self,
        timepoint: Timepoint,
        level: usize,
        cell: [u64; 3],
    ) -> Result<(), PrefetchError>;
}

/// One pyramid level to consider for a frame, with independent cache hints
/// for prefetching and for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub mipmap_level: usize,
    pub prefetch_cache_hints: Option<CacheHints>,
    pub render_cache_hints: Option<CacheHints>,
}

pub type LevelList = SmallVec<[Level; 8]>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MipmapHints {
    pub levels: LevelList,
    pub renew_hints_after_painting_once: bool,
}

/// Chooses which pyramid levels to prefetch and render for a view.
pub trait MipmapOrdering: Send + Sync {
    fn mipmap_hints(
        &self,
        screen_transform: &AffineTransform3d,
        timepoint: Timepoint,
        previous_timepoint: Option<Timepoint>,
    ) -> MipmapHints;
}

/// A multi-resolution image pyramid. Level 0 is the finest.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn num_mipmap_levels(&self) -> usize;

    /// Level voxel coordinates to world coordinates.
    fn source_transform(&self, timepoint: Timepoint, level: usize) -> AffineTransform3d;

    /// Extent of the sampled interval of `level`.
    fn dimensions(&self, timepoint: Timepoint, level: usize) -> [u64; 3];

    fn interpolated(
        &self,
        timepoint: Timepoint,
        level: usize,
        interpolation: Interpolation,
    ) -> Arc<dyn Sampler>;

    fn volatile(&self) -> Option<&dyn VolatileSource> {
        None
    }

    fn mipmap_ordering(&self) -> Option<&dyn MipmapOrdering> {
        None
    }
}

#[derive(Clone)]
pub struct SourceAndConverter {
    pub source: Arc<dyn Source>,
    pub converter: Arc<dyn Converter>,
}

impl SourceAndConverter {
    pub fn new(source: Arc<dyn Source>, converter: Arc<dyn Converter>) -> Self {
        Self { source, converter }
    }
}

impl fmt::Debug for SourceAndConverter {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SourceAndConverter")
            .field("source", &self.source.name())
            .finish_non_exhaustive()
    }
}

/// Display sink for finished frames.
pub trait RenderTarget: Send + Sync {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Shows `buffer` and returns the buffer shown before, if any.
    fn set_buffer_and_transform(
        &self,
        buffer: ScreenBuffer,
        transform: AffineTransform3d,
    ) -> Option<ScreenBuffer>;
}

/// Schedules a `paint` call on the painter thread.
pub trait RepaintRequester: Send + Sync {
    fn request_repaint(&self);
}

/// IO budgeting and fetch-queue control of the cache backend.
pub trait CacheControl: Send + Sync {
    /// Marks a budget epoch boundary before a brand-new frame.
    fn prepare_next_frame(&self);

    /// Resets the per-priority blocking-load budget for the next projector.
    fn reset_budget(&self, budget: &[Duration]);
}

/// ARGB channel helpers shared by projectors and converters.
pub mod argb {
    pub const fn alpha(argb: u32) -> u32 {
        argb >> 24
    }

    pub const fn red(argb: u32) -> u32 {
        (argb >> 16) & 0xff
    }

    pub const fn green(argb: u32) -> u32 {
        (argb >> 8) & 0xff
    }

    pub const fn blue(argb: u32) -> u32 {
        argb & 0xff
    }

    /// Packs channels, saturating each at 255.
    pub const fn pack(alpha: u32, red: u32, green: u32, blue: u32) -> u32 {
        (saturate(alpha) << 24) | (saturate(red) << 16) | (saturate(green) << 8) | saturate(blue)
    }

    const fn saturate(channel: u32) -> u32 {
        if channel > 255 { 255 } else { channel }
    }

    /// Scales the color channels by alpha, rounding to nearest.
    pub const fn premultiply(argb: u32) -> u32 {
        let a = alpha(argb);
        pack(
            a,
            (red(argb) * a + 127) / 255,
            (green(argb) * a + 127) / 255,
            (blue(argb) * a + 127) / 255,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiply_scales_color_channels() {
        assert_eq!(argb::premultiply(0xff_80_40_20), 0xff_80_40_20);
        assert_eq!(argb::premultiply(0x00_ff_ff_ff), 0);
        assert_eq!(argb::premultiply(0x80_ff_00_ff), 0x80_80_00_80);
    }

    #[test]
    fn cell_grid_rounds_partial_cells_up() {
        let grid = CellGrid {
            dimensions: [100, 64, 1],
            cell_dimensions: [32, 32, 32],
        };
        assert_eq!(grid.grid_dimensions(), [4, 2, 1]);
    }
}
