use std::cmp::Ordering;

use render_protocol::{
    CacheHints, Level, LevelList, LoadingStrategy, MipmapHints, MipmapOrdering, Source, Timepoint,
};
use view::AffineTransform3d;

use crate::best_mipmap_level;

/// Ordering used for sources that do not provide their own.
///
/// Renders every level from the best fit down to the coarsest, prioritized by
/// distance from the best fit. After a timepoint change the coarsest level is
/// loaded with budgeted blocking at the front of the queue, and the hints ask
/// to be recomputed after one paint.
pub struct DefaultMipmapOrdering<'a> {
    source: &'a dyn Source,
}

impl<'a> DefaultMipmapOrdering<'a> {
    pub fn new(source: &'a dyn Source) -> Self {
        Self { source }
    }
}

impl MipmapOrdering for DefaultMipmapOrdering<'_> {
    fn mipmap_hints(
        &self,
        screen_transform: &AffineTransform3d,
        timepoint: Timepoint,
        previous_timepoint: Option<Timepoint>,
    ) -> MipmapHints {
        let num_levels = self.source.num_mipmap_levels();
        if num_levels == 0 {
            return MipmapHints::default();
        }
        let coarsest = num_levels - 1;
        let best = best_mipmap_level(screen_transform, self.source, timepoint);
        let timepoint_changed = previous_timepoint != Some(timepoint);

        let mut levels = LevelList::new();
        for mipmap_level in best..=coarsest {
            let priority = (mipmap_level - best) as i32;
            let hints = if timepoint_changed && mipmap_level == coarsest {
                CacheHints::new(LoadingStrategy::BudgetedBlocking, priority, true)
            } else {
                CacheHints::new(LoadingStrategy::Volatile, priority, false)
            };
            levels.push(Level {
                mipmap_level,
                prefetch_cache_hints: Some(hints),
                render_cache_hints: Some(hints),
            });
        }
        MipmapHints {
            levels,
            renew_hints_after_painting_once: timepoint_changed,
        }
    }
}

/// Sorts levels so that data needed soonest is requested first: ascending
/// prefetch priority, levels without prefetch hints last, finer levels first
/// on ties.
pub fn sort_prefetch_order(levels: &mut [Level]) {
    levels.sort_by(|left, right| {
        match (left.prefetch_cache_hints, right.prefetch_cache_hints) {
            (Some(left_hints), Some(right_hints)) => {
                left_hints.queue_priority.cmp(&right_hints.queue_priority)
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then(left.mipmap_level.cmp(&right.mipmap_level))
    });
}

/// Sorts levels coarse to fine.
pub fn sort_render_order(levels: &mut [Level]) {
    levels.sort_by(|left, right| right.mipmap_level.cmp(&left.mipmap_level));
}

#[cfg(test)]
mod tests {
    use render_protocol::test_helpers::PyramidSource;

    use super::*;

    fn level(mipmap_level: usize, priority: Option<i32>) -> Level {
        let hints =
            priority.map(|priority| CacheHints::new(LoadingStrategy::Volatile, priority, false));
        Level {
            mipmap_level,
            prefetch_cache_hints: hints,
            render_cache_hints: hints,
        }
    }

    fn half_zoom() -> AffineTransform3d {
        AffineTransform3d::scaling(0.5, 0.5, 0.5).expect("zoom")
    }

    #[test]
    fn default_ordering_covers_best_to_coarsest() {
        let source = PyramidSource::new("p", [64, 64, 1], 4, |_| 0.0);
        let ordering = DefaultMipmapOrdering::new(&source);
        let hints = ordering.mipmap_hints(&half_zoom(), 3, Some(3));

        assert!(!hints.renew_hints_after_painting_once);
        let summary: Vec<_> = hints
            .levels
            .iter()
            .map(|level| {
                let render = level.render_cache_hints.expect("render hints");
                (level.mipmap_level, render.queue_priority, render.loading_strategy)
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, 0, LoadingStrategy::Volatile),
                (2, 1, LoadingStrategy::Volatile),
                (3, 2, LoadingStrategy::Volatile),
            ]
        );
    }

    #[test]
    fn timepoint_change_blocks_on_coarsest_and_renews() {
        let source = PyramidSource::new("p", [64, 64, 1], 3, |_| 0.0);
        let ordering = DefaultMipmapOrdering::new(&source);
        let hints = ordering.mipmap_hints(&half_zoom(), 4, Some(3));

        assert!(hints.renew_hints_after_painting_once);
        let coarsest = hints.levels.last().expect("coarsest level");
        assert_eq!(coarsest.mipmap_level, 2);
        assert_eq!(
            coarsest.render_cache_hints,
            Some(CacheHints::new(LoadingStrategy::BudgetedBlocking, 1, true))
        );
        assert_eq!(
            hints.levels[0].render_cache_hints.map(|hints| hints.loading_strategy),
            Some(LoadingStrategy::Volatile)
        );

        let first_frame = ordering.mipmap_hints(&half_zoom(), 0, None);
        assert!(first_frame.renew_hints_after_painting_once);
    }

    #[test]
    fn prefetch_order_puts_urgent_levels_first() {
        let mut levels = vec![
            level(3, Some(2)),
            level(0, None),
            level(1, Some(0)),
            level(2, Some(0)),
        ];
        sort_prefetch_order(&mut levels);
        let order: Vec<_> = levels.iter().map(|level| level.mipmap_level).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[test]
    fn render_order_is_coarse_to_fine() {
        let mut levels = vec![level(1, Some(0)), level(3, Some(2)), level(2, Some(1))];
        sort_render_order(&mut levels);
        let order: Vec<_> = levels.iter().map(|level| level.mipmap_level).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
