use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use engine::RenderPool;
use rayon::prelude::*;
use render_protocol::{Converter, Interpolation, Sampler, Source, Timepoint, Voxel, argb};
use screen_buffers::ScreenBuffer;
use view::AffineTransform3d;

/// One frame's worth of pixel work for a target buffer.
///
/// `map` may be called repeatedly; `cancel` from another thread makes the
/// running `map` return `false` promptly. A cancel stays in effect until
/// `clear_cancel`, so one issued before `map` starts is not lost.
pub trait Projector: Send + Sync {
    /// Fills the target. With `clear_untouched`, pixels no data reached are
    /// cleared. Returns `false` if cancelled.
    fn map(&self, clear_untouched: bool) -> bool;

    fn cancel(&self);

    /// Re-arms a cancelled projector before it is mapped again.
    fn clear_cancel(&self);

    /// Whether the last `map` completed with fully loaded data.
    fn is_valid(&self) -> bool;

    fn last_frame_render_time(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cancelled;

/// Cancellation, validity and timing shared by every projector.
#[derive(Debug, Default)]
pub(crate) struct ProjectorState {
    cancelled: AtomicBool,
    valid: AtomicBool,
    render_nanos: AtomicU64,
}

impl ProjectorState {
    pub(crate) fn begin(&self) -> Instant {
        self.valid.store(false, Ordering::Release);
        Instant::now()
    }

    pub(crate) fn finish(&self, started: Instant, valid: bool) -> bool {
        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.render_nanos.store(elapsed, Ordering::Release);
        let completed = !self.is_cancelled();
        self.valid.store(completed && valid, Ordering::Release);
        completed
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub(crate) fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn last_frame_render_time(&self) -> Duration {
        Duration::from_nanos(self.render_nanos.load(Ordering::Acquire))
    }
}

/// A pyramid level sampled in target-buffer pixel coordinates.
pub(crate) struct LevelView {
    pub(crate) mipmap_level: usize,
    sampler: Arc<dyn Sampler>,
    buffer_to_source: AffineTransform3d,
}

impl LevelView {
    /// `screen_transform` maps world coordinates to target pixels. `None` if
    /// the level cannot be inverted onto the screen.
    pub(crate) fn new(
        source: &dyn Source,
        timepoint: Timepoint,
        mipmap_level: usize,
        interpolation: Interpolation,
        screen_transform: &AffineTransform3d,
    ) -> Option<Self> {
        let source_to_screen = source
            .source_transform(timepoint, mipmap_level)
            .pre_concatenate(screen_transform);
        let buffer_to_source = source_to_screen.inverse().ok()?;
        Some(Self {
            mipmap_level,
            sampler: source.interpolated(timepoint, mipmap_level, interpolation),
            buffer_to_source,
        })
    }

    pub(crate) fn row(&self, y: usize) -> RowSampler<'_> {
        RowSampler {
            sampler: self.sampler.as_ref(),
            origin: self.buffer_to_source.apply([0.0, y as f64, 0.0]),
            step: self.buffer_to_source.axis(0),
        }
    }
}

/// Samples along one buffer row by stepping in source space.
pub(crate) struct RowSampler<'a> {
    sampler: &'a dyn Sampler,
    origin: [f64; 3],
    step: [f64; 3],
}

impl RowSampler<'_> {
    pub(crate) fn sample(&self, x: usize) -> Voxel {
        let x = x as f64;
        self.sampler.sample([
            self.origin[0] + x * self.step[0],
            self.origin[1] + x * self.step[1],
            self.origin[2] + x * self.step[2],
        ])
    }
}

pub(crate) fn to_output(converter: &dyn Converter, value: f64, premultiply: bool) -> u32 {
    let color = converter.convert(value);
    if premultiply { argb::premultiply(color) } else { color }
}

/// Clears the target; used when no source is visible.
pub struct EmptyProjector {
    target: ScreenBuffer,
    state: ProjectorState,
}

impl EmptyProjector {
    pub fn new(target: ScreenBuffer) -> Self {
        Self {
            target,
            state: ProjectorState::default(),
        }
    }
}

impl Projector for EmptyProjector {
    fn map(&self, _clear_untouched: bool) -> bool {
        let started = self.state.begin();
        if self.state.check().is_ok() {
            self.target.fill(0);
        }
        self.state.finish(started, true)
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

/// Renders one source at a single pyramid level.
///
/// Placeholder samples are written as transparent and leave the frame
/// invalid. A level that cannot be mapped onto the screen renders nothing.
pub struct SimpleProjector {
    view: Option<LevelView>,
    converter: Arc<dyn Converter>,
    target: ScreenBuffer,
    pool: Arc<RenderPool>,
    premultiply: bool,
    state: ProjectorState,
}

impl SimpleProjector {
    pub(crate) fn new(
        view: Option<LevelView>,
        converter: Arc<dyn Converter>,
        target: ScreenBuffer,
        pool: Arc<RenderPool>,
        premultiply: bool,
    ) -> Self {
        Self {
            view,
            converter,
            target,
            pool,
            premultiply,
            state: ProjectorState::default(),
        }
    }
}

impl Projector for SimpleProjector {
    fn map(&self, _clear_untouched: bool) -> bool {
        let started = self.state.begin();
        let Some(view) = &self.view else {
            self.target.fill(0);
            return self.state.finish(started, true);
        };

        let width = self.target.width() as usize;
        if width == 0 {
            return self.state.finish(started, true);
        }
        let state = &self.state;
        let converter = self.converter.as_ref();
        let premultiply = self.premultiply;
        let all_valid = AtomicBool::new(true);
        let mut guard = self.target.write();
        let pixels: &mut [u32] = &mut guard;
        let result: Result<(), Cancelled> = self.pool.install(|| {
            pixels
                .par_chunks_mut(width)
                .enumerate()
                .try_for_each(|(y, row)| {
                    state.check()?;
                    let sampler = view.row(y);
                    let mut row_valid = true;
                    for (x, pixel) in row.iter_mut().enumerate() {
                        let voxel = sampler.sample(x);
                        if voxel.valid {
                            *pixel = to_output(converter, voxel.value, premultiply);
                        } else {
                            *pixel = 0;
                            row_valid = false;
                        }
                    }
                    if !row_valid {
                        all_valid.store(false, Ordering::Release);
                    }
                    Ok(())
                })
        });
        drop(guard);
        if result.is_err() {
            return self.state.finish(started, false);
        }
        self.state.finish(started, all_valid.load(Ordering::Acquire))
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

#[cfg(test)]
mod tests {
    use render_protocol::test_helpers::{ConstantConverter, GrayConverter, PyramidSource};

    use super::*;

    fn pool() -> Arc<RenderPool> {
        Arc::new(RenderPool::new(2).expect("pool"))
    }

    fn identity_view(source: &dyn Source) -> Option<LevelView> {
        let identity = AffineTransform3d::identity();
        LevelView::new(source, 0, 0, Interpolation::NearestNeighbor, &identity)
    }

    #[test]
    fn empty_projector_clears_target() {
        let target = ScreenBuffer::new(4, 3);
        target.fill(0xffff_ffff);
        let projector = EmptyProjector::new(target.clone());
        assert!(projector.map(true));
        assert!(projector.is_valid());
        assert!(target.to_vec().iter().all(|&pixel| pixel == 0));
    }

    #[test]
    fn simple_projector_samples_level_through_screen_transform() {
        let source = PyramidSource::new("ramp", [8, 8, 1], 1, |p| p[0]);
        let view = identity_view(&source);
        let target = ScreenBuffer::new(8, 2);
        let projector = SimpleProjector::new(
            view,
            Arc::new(GrayConverter::new(0.0, 255.0)),
            target.clone(),
            pool(),
            true,
        );
        assert!(projector.map(true));
        assert!(projector.is_valid());
        let pixels = target.to_vec();
        assert_eq!(pixels[0], 0xff00_0000);
        assert_eq!(pixels[3], 0xff03_0303);
        assert_eq!(pixels[8 + 7], 0xff07_0707);
    }

    #[test]
    fn simple_projector_premultiplies_on_request() {
        let source = PyramidSource::new("flat", [2, 2, 1], 1, |_| 1.0);
        let color = 0x80ff_0000;
        let straight = ScreenBuffer::new(2, 2);
        let premultiplied = ScreenBuffer::new(2, 2);
        for (target, premultiply) in [(&straight, false), (&premultiplied, true)] {
            let view = identity_view(&source);
            let converter = Arc::new(ConstantConverter(color));
            let projector =
                SimpleProjector::new(view, converter, target.clone(), pool(), premultiply);
            assert!(projector.map(false));
        }
        assert_eq!(straight.to_vec()[0], color);
        assert_eq!(premultiplied.to_vec()[0], argb::premultiply(color));
    }

    #[test]
    fn placeholder_samples_leave_frame_invalid() {
        let source = PyramidSource::new("v", [4, 4, 1], 1, |_| 1.0).into_volatile();
        let view = identity_view(&source);
        let target = ScreenBuffer::new(4, 4);
        let converter = Arc::new(ConstantConverter(0xffff_ffff));
        let projector = SimpleProjector::new(view, converter, target, pool(), true);
        assert!(projector.map(true));
        assert!(!projector.is_valid());
    }

    #[test]
    fn cancel_before_map_is_kept_until_cleared() {
        let source = PyramidSource::new("p", [16, 16, 1], 1, |_| 1.0);
        let view = identity_view(&source);
        let target = ScreenBuffer::new(16, 16);
        let projector = SimpleProjector::new(
            view,
            Arc::new(ConstantConverter(0xffff_ffff)),
            target.clone(),
            pool(),
            true,
        );
        projector.cancel();
        assert!(!projector.map(true));
        assert!(!projector.is_valid());
        assert!(target.to_vec().iter().all(|&pixel| pixel == 0));
        // A second map does not re-arm the projector by itself.
        assert!(!projector.map(false));

        projector.clear_cancel();
        assert!(projector.map(false));
        assert!(projector.is_valid());
        assert!(target.to_vec().iter().all(|&pixel| pixel == 0xffff_ffff));
    }

    #[test]
    fn cancelled_empty_projector_leaves_target_alone() {
        let target = ScreenBuffer::new(2, 2);
        target.fill(0xff00_00ff);
        let projector = EmptyProjector::new(target.clone());
        projector.cancel();
        assert!(!projector.map(true));
        assert_eq!(target.to_vec(), vec![0xff00_00ff; 4]);
    }
}
