//! Pyramid-level selection, ordering and prefetching for a view.

use render_protocol::{Source, Timepoint};
use view::AffineTransform3d;

mod ordering;
mod prefetch;

pub use ordering::{DefaultMipmapOrdering, sort_prefetch_order, sort_render_order};
pub use prefetch::{PrefetchTarget, prefetch_levels, prefetch_visible_cells};

/// Voxels smaller than this many screen pixels are considered too fine.
pub const MIN_VOXEL_SCREEN_SIZE: f64 = 0.99;

/// Largest on-screen extent of a unit voxel step along any source axis,
/// ignoring screen depth.
pub fn voxel_screen_size(source_to_screen: &AffineTransform3d) -> f64 {
    (0..3)
        .map(|axis| {
            let step = source_to_screen.axis(axis);
            step[0].hypot(step[1])
        })
        .fold(0.0, f64::max)
}

/// Finest level whose voxels still cover about one screen pixel.
///
/// `screen_transform` maps world coordinates to buffer pixels. Scans from the
/// coarsest level towards finer ones and stops at the first level whose voxels
/// are narrower than [`MIN_VOXEL_SCREEN_SIZE`] pixels. If even the coarsest
/// level is sub-pixel, or the transform is degenerate, the coarsest level is
/// used.
pub fn best_mipmap_level(
    screen_transform: &AffineTransform3d,
    source: &dyn Source,
    timepoint: Timepoint,
) -> usize {
    let num_levels = source.num_mipmap_levels();
    if num_levels == 0 {
        return 0;
    }
    let coarsest = num_levels - 1;
    let mut best = None;
    for level in (0..num_levels).rev() {
        let source_to_screen = source
            .source_transform(timepoint, level)
            .pre_concatenate(screen_transform);
        let size = voxel_screen_size(&source_to_screen);
        if !size.is_finite() || size <= 0.0 {
            tracing::debug!(
                source = source.name(),
                level,
                "degenerate source-to-screen transform, using coarsest level"
            );
            return coarsest;
        }
        if size < MIN_VOXEL_SCREEN_SIZE {
            break;
        }
        best = Some(level);
    }
    best.unwrap_or(coarsest)
}

#[cfg(test)]
mod tests {
    use render_protocol::test_helpers::PyramidSource;

    use super::*;

    fn zoom(factor: f64) -> AffineTransform3d {
        AffineTransform3d::scaling(factor, factor, factor).expect("zoom")
    }

    #[test]
    fn voxel_size_ignores_depth_component() {
        let transform = AffineTransform3d::from_rows([
            [0.0, 0.0, 0.5, 0.0],
            [0.0, 2.0, 0.0, 0.0],
            [3.0, 0.0, 0.0, 0.0],
        ])
        .expect("rows");
        assert!((voxel_screen_size(&transform) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn picks_level_matching_screen_resolution() {
        let source = PyramidSource::new("p", [64, 64, 1], 4, |_| 0.0);
        assert_eq!(best_mipmap_level(&zoom(1.0), &source, 0), 0);
        assert_eq!(best_mipmap_level(&zoom(4.0), &source, 0), 0);
        assert_eq!(best_mipmap_level(&zoom(0.5), &source, 0), 1);
        assert_eq!(best_mipmap_level(&zoom(0.25), &source, 0), 2);
        assert_eq!(best_mipmap_level(&zoom(0.3), &source, 0), 2);
        assert_eq!(best_mipmap_level(&zoom(0.01), &source, 0), 3);
    }

    #[test]
    fn degenerate_transform_falls_back_to_coarsest() {
        let source = PyramidSource::new("p", [64, 64, 1], 3, |_| 0.0);
        let flat = AffineTransform3d::from_rows([[0.0; 4]; 3]).expect("rows");
        assert_eq!(best_mipmap_level(&flat, &source, 0), 2);
    }
}
