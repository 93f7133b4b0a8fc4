use render_protocol::{
    CacheHints, Interpolation, Level, LoadingStrategy, PrefetchError, Source, Timepoint,
    VolatileSource,
};
use view::AffineTransform3d;

/// Screen region a frame is going to cover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrefetchTarget {
    /// World to buffer pixels.
    pub screen_transform: AffineTransform3d,
    pub width: u32,
    pub height: u32,
    pub timepoint: Timepoint,
    pub interpolation: Interpolation,
}

/// Requests the visible cells of every level in `levels`, in the given order.
///
/// Levels whose prefetch hints say `DontLoad` are skipped; levels without
/// hints load volatile with the source's default priority. A failing level is
/// logged and skipped so it will load while rendering instead. Returns the
/// number of cells requested.
pub fn prefetch_levels(
    source: &dyn Source,
    volatile: &dyn VolatileSource,
    levels: &[Level],
    target: &PrefetchTarget,
) -> usize {
    let mut requested = 0;
    for level in levels {
        let hints = match level.prefetch_cache_hints {
            Some(hints) if hints.loading_strategy == LoadingStrategy::DontLoad => continue,
            Some(hints) => hints,
            None => CacheHints::new(
                LoadingStrategy::Volatile,
                volatile.default_cache_hints().queue_priority,
                false,
            ),
        };
        volatile.set_cache_hints(target.timepoint, level.mipmap_level, hints);

        let source_to_screen = source
            .source_transform(target.timepoint, level.mipmap_level)
            .pre_concatenate(&target.screen_transform);
        match prefetch_visible_cells(volatile, level.mipmap_level, &source_to_screen, target) {
            Ok(cells) => requested += cells,
            Err(err) => {
                tracing::warn!(
                    source = source.name(),
                    level = level.mipmap_level,
                    %err,
                    "prefetch failed; level loads on demand"
                );
            }
        }
    }
    requested
}

/// Fetches every cell of `level` that intersects the screen slab at depth 0.
///
/// The covered region is the bounding box of the back-projected screen
/// corners, widened by one voxel for n-linear interpolation and clipped to
/// the level.
pub fn prefetch_visible_cells(
    volatile: &dyn VolatileSource,
    level: usize,
    source_to_screen: &AffineTransform3d,
    target: &PrefetchTarget,
) -> Result<usize, PrefetchError> {
    let Some(grid) = volatile.cell_grid(target.timepoint, level) else {
        return Ok(0);
    };
    if target.width == 0 || target.height == 0 {
        return Ok(0);
    }
    let Ok(screen_to_source) = source_to_screen.inverse() else {
        tracing::debug!(level, "source-to-screen transform is not invertible; nothing to prefetch");
        return Ok(0);
    };

    let right = f64::from(target.width - 1);
    let bottom = f64::from(target.height - 1);
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for corner in [[0.0, 0.0, 0.0], [right, 0.0, 0.0], [0.0, bottom, 0.0], [right, bottom, 0.0]] {
        let position = screen_to_source.apply(corner);
        for axis in 0..3 {
            min[axis] = min[axis].min(position[axis]);
            max[axis] = max[axis].max(position[axis]);
        }
    }

    let mut cell_min = [0_u64; 3];
    let mut cell_max = [0_u64; 3];
    for axis in 0..3 {
        let (low, high) = match target.interpolation {
            Interpolation::NearestNeighbor => {
                ((min[axis] + 0.5).floor(), (max[axis] + 0.5).floor())
            }
            Interpolation::NLinear => (min[axis].floor(), max[axis].floor() + 1.0),
        };
        let extent = grid.dimensions[axis] as f64;
        if high < 0.0 || low >= extent || extent == 0.0 {
            return Ok(0);
        }
        let low = low.max(0.0) as u64;
        let high = high.min(extent - 1.0) as u64;
        let cell = u64::from(grid.cell_dimensions[axis].max(1));
        cell_min[axis] = low / cell;
        cell_max[axis] = high / cell;
    }

    let mut requested = 0;
    for z in cell_min[2]..=cell_max[2] {
        for y in cell_min[1]..=cell_max[1] {
            for x in cell_min[0]..=cell_max[0] {
                volatile.fetch_cell(target.timepoint, level, [x, y, z])?;
                requested += 1;
            }
        }
    }
    Ok(requested)
}
