use std::sync::Arc;
use std::time::Duration;

use engine::RenderPool;
use rayon::prelude::*;
use render_protocol::argb;
use screen_buffers::{PixelsRead, ScreenBuffer};

use crate::projector::{Cancelled, Projector, ProjectorState};

/// Builds the projector that composites per-source images into the target.
pub trait AccumulateProjectorFactory: Send + Sync {
    fn create_accumulate_projector(
        &self,
        source_projectors: Vec<Arc<dyn Projector>>,
        source_images: Vec<ScreenBuffer>,
        target: ScreenBuffer,
        pool: Arc<RenderPool>,
    ) -> Arc<dyn Projector>;
}

/// Combines the non-premultiplied pixels of all sources at one location into
/// one output pixel.
pub trait PixelAccumulator: Send + Sync + 'static {
    fn accumulate(&self, source_pixels: &[u32]) -> u32;
}

/// Premultiplies each source and adds the channels, saturating at 255.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveAccumulator;

impl PixelAccumulator for AdditiveAccumulator {
    fn accumulate(&self, source_pixels: &[u32]) -> u32 {
        let mut channels = [0_u32; 4];
        for &pixel in source_pixels {
            let premultiplied = argb::premultiply(pixel);
            channels[0] += argb::alpha(premultiplied);
            channels[1] += argb::red(premultiplied);
            channels[2] += argb::green(premultiplied);
            channels[3] += argb::blue(premultiplied);
        }
        argb::pack(channels[0], channels[1], channels[2], channels[3])
    }
}

/// Stacks sources with premultiplied "over"; the first source is at the bottom.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaOverAccumulator;

impl PixelAccumulator for AlphaOverAccumulator {
    fn accumulate(&self, source_pixels: &[u32]) -> u32 {
        let mut out = 0_u32;
        for &pixel in source_pixels {
            let top = argb::premultiply(pixel);
            let keep = 255 - argb::alpha(top);
            let blend = |top_channel: u32, bottom_channel: u32| {
                top_channel + (bottom_channel * keep + 127) / 255
            };
            out = argb::pack(
                blend(argb::alpha(top), argb::alpha(out)),
                blend(argb::red(top), argb::red(out)),
                blend(argb::green(top), argb::green(out)),
                blend(argb::blue(top), argb::blue(out)),
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveAccumulateProjectorFactory;

impl AccumulateProjectorFactory for AdditiveAccumulateProjectorFactory {
    fn create_accumulate_projector(
        &self,
        source_projectors: Vec<Arc<dyn Projector>>,
        source_images: Vec<ScreenBuffer>,
        target: ScreenBuffer,
        pool: Arc<RenderPool>,
    ) -> Arc<dyn Projector> {
        Arc::new(AccumulateProjector::new(
            source_projectors,
            source_images,
            target,
            pool,
            AdditiveAccumulator,
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaOverAccumulateProjectorFactory;

impl AccumulateProjectorFactory for AlphaOverAccumulateProjectorFactory {
    fn create_accumulate_projector(
        &self,
        source_projectors: Vec<Arc<dyn Projector>>,
        source_images: Vec<ScreenBuffer>,
        target: ScreenBuffer,
        pool: Arc<RenderPool>,
    ) -> Arc<dyn Projector> {
        Arc::new(AccumulateProjector::new(
            source_projectors,
            source_images,
            target,
            pool,
            AlphaOverAccumulator,
        ))
    }
}

/// Maps every source projector concurrently, then combines their images row
/// by row.
pub struct AccumulateProjector<A> {
    source_projectors: Vec<Arc<dyn Projector>>,
    source_images: Vec<ScreenBuffer>,
    target: ScreenBuffer,
    pool: Arc<RenderPool>,
    accumulator: A,
    state: ProjectorState,
}

impl<A: PixelAccumulator> AccumulateProjector<A> {
    pub fn new(
        source_projectors: Vec<Arc<dyn Projector>>,
        source_images: Vec<ScreenBuffer>,
        target: ScreenBuffer,
        pool: Arc<RenderPool>,
        accumulator: A,
    ) -> Self {
        Self {
            source_projectors,
            source_images,
            target,
            pool,
            accumulator,
            state: ProjectorState::default(),
        }
    }

    fn accumulate_rows(&self) -> bool {
        let width = self.target.width() as usize;
        if width == 0 {
            return true;
        }
        let source_guards: Vec<PixelsRead<'_>> =
            self.source_images.iter().map(ScreenBuffer::read).collect();
        let source_pixels: Vec<&[u32]> = source_guards.iter().map(|guard| &**guard).collect();
        let mut target_guard = self.target.write();
        let target: &mut [u32] = &mut target_guard;

        let state = &self.state;
        let accumulator = &self.accumulator;
        let source_pixels = &source_pixels;
        self.pool
            .install(|| {
                target
                    .par_chunks_mut(width)
                    .enumerate()
                    .try_for_each(|(y, row)| {
                        state.check()?;
                        let mut gathered = Vec::with_capacity(source_pixels.len());
                        for (x, pixel) in row.iter_mut().enumerate() {
                            let index = y * width + x;
                            gathered.clear();
                            gathered.extend(
                                source_pixels
                                    .iter()
                                    .map(|pixels| pixels.get(index).copied().unwrap_or(0)),
                            );
                            *pixel = accumulator.accumulate(&gathered);
                        }
                        Ok::<(), Cancelled>(())
                    })
            })
            .is_ok()
    }
}

impl<A: PixelAccumulator> Projector for AccumulateProjector<A> {
    fn map(&self, clear_untouched: bool) -> bool {
        let started = self.state.begin();
        let mapped: Vec<bool> = self.pool.install(|| {
            self.source_projectors
                .par_iter()
                .map(|projector| projector.map(clear_untouched))
                .collect()
        });
        if self.state.is_cancelled() || mapped.iter().any(|completed| !completed) {
            return self.state.finish(started, false);
        }

        if !self.accumulate_rows() {
            return self.state.finish(started, false);
        }
        let valid = self.source_projectors.iter().all(|projector| projector.is_valid());
        self.state.finish(started, valid)
    }

    fn cancel(&self) {
        self.state.cancel();
        for projector in &self.source_projectors {
            projector.cancel();
        }
    }

    fn clear_cancel(&self) {
        self.state.clear_cancel();
        for projector in &self.source_projectors {
            projector.clear_cancel();
        }
    }

    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn last_frame_render_time(&self) -> Duration {
        self.state.last_frame_render_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::EmptyProjector;

    struct FillProjector {
        target: ScreenBuffer,
        color: u32,
        valid: bool,
        state: ProjectorState,
    }

    impl FillProjector {
        fn new(target: &ScreenBuffer, color: u32, valid: bool) -> Arc<dyn Projector> {
            Arc::new(Self {
                target: target.clone(),
                color,
                valid,
                state: ProjectorState::default(),
            })
        }
    }

    impl Projector for FillProjector {
        fn map(&self, _clear_untouched: bool) -> bool {
            let started = self.state.begin();
            self.target.fill(self.color);
            self.state.finish(started, self.valid)
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

    fn pool() -> Arc<RenderPool> {
        Arc::new(RenderPool::new(2).expect("pool"))
    }

    #[test]
    fn additive_saturates_channels() {
        assert_eq!(
            AdditiveAccumulator.accumulate(&[0xff80_0010, 0xff90_0020]),
            0xffff_0030
        );
        assert_eq!(AdditiveAccumulator.accumulate(&[0x80ff_ffff, 0]), 0x8080_8080);
    }

    #[test]
    fn alpha_over_keeps_opaque_top() {
        assert_eq!(
            AlphaOverAccumulator.accumulate(&[0xff00_00ff, 0xffff_0000]),
            0xffff_0000
        );
        assert_eq!(AlphaOverAccumulator.accumulate(&[0xff00_00ff, 0x0000_0000]), 0xff00_00ff);
    }

    #[test]
    fn accumulates_all_sources_into_target() {
        let images = vec![ScreenBuffer::new(3, 2), ScreenBuffer::new(3, 2)];
        let projectors = vec![
            FillProjector::new(&images[0], 0xff10_0000, true),
            FillProjector::new(&images[1], 0xff00_2000, true),
        ];
        let target = ScreenBuffer::new(3, 2);
        let projector = AdditiveAccumulateProjectorFactory.create_accumulate_projector(
            projectors,
            images,
            target.clone(),
            pool(),
        );
        assert!(projector.map(true));
        assert!(projector.is_valid());
        assert!(target.to_vec().iter().all(|&pixel| pixel == 0xff10_2000));
    }

    #[test]
    fn invalid_source_makes_composite_invalid() {
        let images = vec![ScreenBuffer::new(2, 2), ScreenBuffer::new(2, 2)];
        let projectors = vec![
            FillProjector::new(&images[0], 0xff10_0000, true),
            FillProjector::new(&images[1], 0xff00_2000, false),
        ];
        let projector = AlphaOverAccumulateProjectorFactory.create_accumulate_projector(
            projectors,
            images,
            ScreenBuffer::new(2, 2),
            pool(),
        );
        assert!(projector.map(true));
        assert!(!projector.is_valid());
    }

    #[test]
    fn cancel_before_map_reaches_source_projectors() {
        let image = ScreenBuffer::new(2, 2);
        let source: Arc<dyn Projector> = Arc::new(EmptyProjector::new(image.clone()));
        let target = ScreenBuffer::new(2, 2);
        target.fill(0xff00_00ff);
        let projector = AccumulateProjector::new(
            vec![Arc::clone(&source)],
            vec![image],
            target.clone(),
            pool(),
            AdditiveAccumulator,
        );
        projector.cancel();
        assert!(!projector.map(true));
        assert!(!source.is_valid());
        assert_eq!(target.to_vec(), vec![0xff00_00ff; 4]);

        projector.clear_cancel();
        assert!(projector.map(true));
        assert!(source.is_valid());
        assert_eq!(target.to_vec(), vec![0; 4]);
    }
}
