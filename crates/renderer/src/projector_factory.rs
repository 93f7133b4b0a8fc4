use std::sync::Arc;
use std::time::Duration;

use engine::RenderPool;
use mipmap::{
    DefaultMipmapOrdering, PrefetchTarget, best_mipmap_level, prefetch_levels, sort_prefetch_order,
    sort_render_order,
};
use render_protocol::{
    CacheControl, Interpolation, MipmapOrdering, Source, SourceAndConverter, Timepoint,
    VolatileSource,
};
use screen_buffers::{MaskArray, ScratchArena, ScreenBuffer};
use view::AffineTransform3d;

use crate::accumulate::{AccumulateProjectorFactory, AdditiveAccumulateProjectorFactory};
use crate::projector::{EmptyProjector, LevelView, Projector, SimpleProjector};
use crate::volatile_projector::VolatileHierarchyProjector;

/// Everything that determines the projector for one frame.
pub struct FrameRequest<'a> {
    pub sources: &'a [SourceAndConverter],
    pub timepoint: Timepoint,
    pub previous_timepoint: Option<Timepoint>,
    pub viewer_transform: AffineTransform3d,
    pub screen_scale_index: usize,
    pub screen_scale_transform: AffineTransform3d,
    pub interpolation_for_source: &'a dyn Fn(&dyn Source) -> Interpolation,
}

impl FrameRequest<'_> {
    /// World coordinates to target-buffer pixels.
    pub fn screen_transform(&self) -> AffineTransform3d {
        self.viewer_transform.pre_concatenate(&self.screen_scale_transform)
    }
}

pub struct BuiltProjector {
    pub projector: Arc<dyn Projector>,
    /// Set when the mipmap hints used for this projector must be recomputed
    /// after one paint.
    pub renew_hints_after_painting_once: bool,
}

pub trait ProjectorFactory: Send + Sync {
    /// Builds the projector that renders `request` into `target`, using the
    /// per-source scratch images and masks of `scratch`.
    fn create_projector(
        &self,
        request: &FrameRequest<'_>,
        target: ScreenBuffer,
        scratch: &ScratchArena,
    ) -> BuiltProjector;
}

/// Builds empty, single-source or accumulating projectors from the sources'
/// pyramids.
pub struct SourceProjectorFactory {
    pool: Arc<RenderPool>,
    accumulate: Arc<dyn AccumulateProjectorFactory>,
    cache_control: Arc<dyn CacheControl>,
    use_volatile_if_available: bool,
    prefetch_cells: bool,
    io_budget: Vec<Duration>,
}

impl SourceProjectorFactory {
    pub fn new(pool: Arc<RenderPool>, cache_control: Arc<dyn CacheControl>) -> Self {
        Self {
            pool,
            accumulate: Arc::new(AdditiveAccumulateProjectorFactory),
            cache_control,
            use_volatile_if_available: true,
            prefetch_cells: true,
            io_budget: vec![Duration::from_millis(100), Duration::from_millis(10)],
        }
    }

    pub fn with_accumulate(mut self, accumulate: Arc<dyn AccumulateProjectorFactory>) -> Self {
        self.accumulate = accumulate;
        self
    }

    pub fn with_volatile(mut self, use_volatile_if_available: bool) -> Self {
        self.use_volatile_if_available = use_volatile_if_available;
        self
    }

    pub fn with_prefetch(mut self, prefetch_cells: bool) -> Self {
        self.prefetch_cells = prefetch_cells;
        self
    }

    pub fn with_io_budget(mut self, io_budget: Vec<Duration>) -> Self {
        self.io_budget = io_budget;
        self
    }

    fn create_single_source_projector(
        &self,
        request: &FrameRequest<'_>,
        source: &SourceAndConverter,
        target: ScreenBuffer,
        mask: MaskArray,
        premultiply: bool,
    ) -> BuiltProjector {
        let spim_source = source.source.as_ref();
        let interpolation = (request.interpolation_for_source)(spim_source);
        let screen_transform = request.screen_transform();

        let volatile = if self.use_volatile_if_available {
            spim_source.volatile()
        } else {
            None
        };
        if let Some(volatile) = volatile {
            return self.create_volatile_projector(
                request,
                source,
                volatile,
                &screen_transform,
                interpolation,
                target,
                mask,
                premultiply,
            );
        }

        let level = best_mipmap_level(&screen_transform, spim_source, request.timepoint);
        tracing::debug!(
            source = spim_source.name(),
            level,
            screen_scale_index = request.screen_scale_index,
            "creating single-level projector"
        );
        let view = LevelView::new(
            spim_source,
            request.timepoint,
            level,
            interpolation,
            &screen_transform,
        );
        BuiltProjector {
            projector: Arc::new(SimpleProjector::new(
                view,
                Arc::clone(&source.converter),
                target,
                Arc::clone(&self.pool),
                premultiply,
            )),
            renew_hints_after_painting_once: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_volatile_projector(
        &self,
        request: &FrameRequest<'_>,
        source: &SourceAndConverter,
        volatile: &dyn VolatileSource,
        screen_transform: &AffineTransform3d,
        interpolation: Interpolation,
        target: ScreenBuffer,
        mask: MaskArray,
        premultiply: bool,
    ) -> BuiltProjector {
        let spim_source = source.source.as_ref();
        let hints = match spim_source.mipmap_ordering() {
            Some(ordering) => ordering.mipmap_hints(
                screen_transform,
                request.timepoint,
                request.previous_timepoint,
            ),
            None => DefaultMipmapOrdering::new(spim_source).mipmap_hints(
                screen_transform,
                request.timepoint,
                request.previous_timepoint,
            ),
        };
        let mut levels = hints.levels;

        if self.prefetch_cells {
            sort_prefetch_order(&mut levels);
            let requested = prefetch_levels(
                spim_source,
                volatile,
                &levels,
                &PrefetchTarget {
                    screen_transform: *screen_transform,
                    width: target.width(),
                    height: target.height(),
                    timepoint: request.timepoint,
                    interpolation,
                },
            );
            tracing::debug!(
                source = spim_source.name(),
                cells = requested,
                "prefetched visible cells"
            );
        }

        sort_render_order(&mut levels);
        let mut render_order = Vec::with_capacity(levels.len());
        for level in &levels {
            let render_hints = level
                .render_cache_hints
                .unwrap_or_else(|| volatile.default_cache_hints());
            volatile.set_cache_hints(request.timepoint, level.mipmap_level, render_hints);
            match LevelView::new(
                spim_source,
                request.timepoint,
                level.mipmap_level,
                interpolation,
                screen_transform,
            ) {
                Some(view) => render_order.push(view),
                None => tracing::debug!(
                    source = spim_source.name(),
                    level = level.mipmap_level,
                    "skipping level without invertible screen transform"
                ),
            }
        }
        tracing::debug!(
            source = spim_source.name(),
            levels = render_order.len(),
            renew_hints = hints.renew_hints_after_painting_once,
            premultiply,
            "creating volatile hierarchy projector"
        );

        BuiltProjector {
            projector: Arc::new(VolatileHierarchyProjector::new(
                render_order,
                Arc::clone(&source.converter),
                target,
                mask,
                Arc::clone(&self.pool),
                premultiply,
            )),
            renew_hints_after_painting_once: hints.renew_hints_after_painting_once,
        }
    }
}

impl ProjectorFactory for SourceProjectorFactory {
    fn create_projector(
        &self,
        request: &FrameRequest<'_>,
        target: ScreenBuffer,
        scratch: &ScratchArena,
    ) -> BuiltProjector {
        let built = match request.sources {
            [] => BuiltProjector {
                projector: Arc::new(EmptyProjector::new(target)),
                renew_hints_after_painting_once: false,
            },
            [source] => {
                let mask = scratch_mask(scratch, 0, &target);
                self.create_single_source_projector(request, source, target, mask, true)
            }
            sources => {
                let mut renew_hints_after_painting_once = false;
                let mut source_projectors = Vec::with_capacity(sources.len());
                let mut source_images = Vec::with_capacity(sources.len());
                for (source_index, source) in sources.iter().enumerate() {
                    let image = scratch
                        .render_image(request.screen_scale_index, source_index)
                        .filter(|image| image.dimensions() == target.dimensions())
                        .cloned()
                        .unwrap_or_else(|| ScreenBuffer::new(target.width(), target.height()));
                    let mask = scratch_mask(scratch, source_index, &target);
                    let built = self.create_single_source_projector(
                        request,
                        source,
                        image.clone(),
                        mask,
                        false,
                    );
                    renew_hints_after_painting_once |= built.renew_hints_after_painting_once;
                    source_projectors.push(built.projector);
                    source_images.push(image);
                }
                BuiltProjector {
                    projector: self.accumulate.create_accumulate_projector(
                        source_projectors,
                        source_images,
                        target,
                        Arc::clone(&self.pool),
                    ),
                    renew_hints_after_painting_once,
                }
            }
        };
        self.cache_control.reset_budget(&self.io_budget);
        built
    }
}

fn scratch_mask(scratch: &ScratchArena, source_index: usize, target: &ScreenBuffer) -> MaskArray {
    scratch
        .mask(source_index)
        .cloned()
        .unwrap_or_else(|| MaskArray::new(target.len()))
}
