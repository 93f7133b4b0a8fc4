use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use engine::RenderPool;
use rayon::prelude::*;
use render_protocol::Converter;
use screen_buffers::{MASK_UNTOUCHED, MaskArray, ScreenBuffer};

use crate::projector::{Cancelled, LevelView, Projector, ProjectorState, to_output};

/// Renders a volatile source from several pyramid levels at once.
///
/// Levels are ranked finest first. The mask records, per pixel, the rank of
/// the level that produced it, so repeated `map` calls only retry levels finer
/// than what a pixel already shows and coarse data stays visible where finer
/// data is still loading. The frame is valid once every pixel comes from the
/// finest level.
pub struct VolatileHierarchyProjector {
    levels: Vec<LevelView>,
    converter: Arc<dyn Converter>,
    target: ScreenBuffer,
    mask: MaskArray,
    pool: Arc<RenderPool>,
    premultiply: bool,
    mask_needs_reset: AtomicBool,
    state: ProjectorState,
}

impl VolatileHierarchyProjector {
    /// `render_order` lists the levels coarse to fine.
    pub(crate) fn new(
        render_order: Vec<LevelView>,
        converter: Arc<dyn Converter>,
        target: ScreenBuffer,
        mask: MaskArray,
        pool: Arc<RenderPool>,
        premultiply: bool,
    ) -> Self {
        let mut levels = render_order;
        levels.reverse();
        levels.truncate(usize::from(MASK_UNTOUCHED));
        Self {
            levels,
            converter,
            target,
            mask,
            pool,
            premultiply,
            mask_needs_reset: AtomicBool::new(true),
            state: ProjectorState::default(),
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn mipmap_levels(&self) -> Vec<usize> {
        self.levels.iter().map(|level| level.mipmap_level).collect()
    }
}

impl Projector for VolatileHierarchyProjector {
    fn map(&self, clear_untouched: bool) -> bool {
        let started = self.state.begin();
        let width = self.target.width() as usize;
        let len = self.target.len();
        if width == 0 || len == 0 {
            return self.state.finish(started, true);
        }

        let mut mask_guard = self.mask.lock();
        if mask_guard.len() < len {
            mask_guard.resize(len, MASK_UNTOUCHED);
        }
        if self.mask_needs_reset.swap(false, Ordering::AcqRel) {
            mask_guard[..len].fill(MASK_UNTOUCHED);
        }
        let mask: &mut [u8] = &mut mask_guard[..len];
        let mut pixel_guard = self.target.write();
        let pixels: &mut [u32] = &mut pixel_guard;

        let state = &self.state;
        let levels = &self.levels;
        let converter = self.converter.as_ref();
        let premultiply = self.premultiply;
        let not_finest = AtomicUsize::new(0);
        let result: Result<(), Cancelled> = self.pool.install(|| {
            pixels
                .par_chunks_mut(width)
                .zip(mask.par_chunks_mut(width))
                .enumerate()
                .try_for_each(|(y, (pixel_row, mask_row))| {
                    state.check()?;
                    let samplers: Vec<_> = levels.iter().map(|level| level.row(y)).collect();
                    let mut row_not_finest = 0;
                    let pixels_and_ranks = pixel_row.iter_mut().zip(mask_row.iter_mut());
                    for (x, (pixel, rank)) in pixels_and_ranks.enumerate() {
                        let tried = usize::from(*rank).min(samplers.len());
                        for (candidate, sampler) in samplers[..tried].iter().enumerate() {
                            let voxel = sampler.sample(x);
                            if voxel.valid {
                                *pixel = to_output(converter, voxel.value, premultiply);
                                *rank = candidate as u8;
                                break;
                            }
                        }
                        if *rank == MASK_UNTOUCHED && clear_untouched {
                            *pixel = 0;
                        }
                        if *rank != 0 {
                            row_not_finest += 1;
                        }
                    }
                    if row_not_finest > 0 {
                        not_finest.fetch_add(row_not_finest, Ordering::AcqRel);
                    }
                    Ok(())
                })
        });
        drop(pixel_guard);
        drop(mask_guard);

        if result.is_err() {
            return self.state.finish(started, false);
        }
        let valid = levels.is_empty() || not_finest.load(Ordering::Acquire) == 0;
        self.state.finish(started, valid)
    }

    fn cancel(&self) {
        self.state.cancel();
    }

    fn clear_cancel(&self) {
        self.state.clear_cancel();
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn last_frame_render_time(&self) -> Duration {
        self.state.last_frame_render_time()
    }
}
