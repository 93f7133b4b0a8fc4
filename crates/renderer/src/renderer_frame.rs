//! Frame orchestration.
//!
//! `paint` decides under the state lock whether a new projector is needed,
//! maps it outside the lock, then presents the result and schedules the next
//! refinement step.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use engine::{Interrupt, RenderPool};
use frame_scheduler::{
    FrameObservation, FrameOutcome, ScaleControllerConfig, ScaleRequest, ScreenScaleController,
};
use render_protocol::{
    CacheControl, Interpolation, RenderTarget, RepaintRequester, Source, SourceAndConverter,
    Timepoint,
};
use screen_buffers::{RenderId, ScratchArena, ScreenBuffer, ScreenScaleLadder};
use static_assertions::assert_impl_all;
use view::AffineTransform3d;

use crate::config::{RendererConfig, RendererConfigError};
use crate::projector::Projector;
use crate::projector_factory::{FrameRequest, ProjectorFactory, SourceProjectorFactory};

/// Pause before re-rendering a full-resolution frame that still shows
/// placeholder data.
const PLACEHOLDER_RETRY_PAUSE: Duration = Duration::from_millis(1);

struct CurrentProjector {
    projector: Arc<dyn Projector>,
    render_id: RenderId,
    buffer: ScreenBuffer,
    screen_scale_index: usize,
    viewer_transform: AffineTransform3d,
    presented: bool,
}

struct RendererState {
    ladder: ScreenScaleLadder,
    scratch: ScratchArena,
    controller: ScreenScaleController,
    request: ScaleRequest,
    current_screen_scale_index: usize,
    new_frame_request: bool,
    rendering_may_be_cancelled: bool,
    current: Option<CurrentProjector>,
    previous_timepoint: Option<Timepoint>,
    killed: bool,
}

/// Progressive renderer: every view change first lands a coarse image, then
/// refines one screen scale per paint until full resolution is shown.
pub struct MultiResolutionRenderer {
    display: Arc<dyn RenderTarget>,
    painter: Arc<dyn RepaintRequester>,
    cache_control: Arc<dyn CacheControl>,
    factory: Arc<dyn ProjectorFactory>,
    interrupt: Interrupt,
    state: Mutex<RendererState>,
}

assert_impl_all!(MultiResolutionRenderer: Send, Sync);

impl MultiResolutionRenderer {
    pub fn new(
        config: &RendererConfig,
        display: Arc<dyn RenderTarget>,
        painter: Arc<dyn RepaintRequester>,
        cache_control: Arc<dyn CacheControl>,
    ) -> Result<Self, RendererConfigError> {
        config.validate()?;
        let pool = Arc::new(RenderPool::new(config.num_rendering_threads)?);
        let factory = SourceProjectorFactory::new(pool, Arc::clone(&cache_control))
            .with_volatile(config.use_volatile_if_available)
            .with_prefetch(config.prefetch_cells)
            .with_io_budget(config.io_budget());
        Self::with_projector_factory(config, display, painter, cache_control, Arc::new(factory))
    }

    pub fn with_projector_factory(
        config: &RendererConfig,
        display: Arc<dyn RenderTarget>,
        painter: Arc<dyn RepaintRequester>,
        cache_control: Arc<dyn CacheControl>,
        factory: Arc<dyn ProjectorFactory>,
    ) -> Result<Self, RendererConfigError> {
        config.validate()?;
        let scales = config.screen_scales()?;
        let controller = ScreenScaleController::new(ScaleControllerConfig {
            target_render_time: config.target_render_time(),
            num_screen_scales: scales.len(),
        });
        let current_screen_scale_index = controller.max_screen_scale_index();
        Ok(Self {
            display,
            painter,
            cache_control,
            factory,
            interrupt: Interrupt::new(),
            state: Mutex::new(RendererState {
                ladder: ScreenScaleLadder::new(scales, config.double_buffered),
                scratch: ScratchArena::new(),
                controller,
                request: ScaleRequest::default(),
                current_screen_scale_index,
                new_frame_request: false,
                rendering_may_be_cancelled: false,
                current: None,
                previous_timepoint: None,
                killed: false,
            }),
        })
    }

    /// Renders the next frame of the refinement sequence.
    ///
    /// Returns `false` if the frame was cancelled, could not be started, or
    /// the renderer was killed.
    pub fn paint(
        &self,
        sources: &[SourceAndConverter],
        timepoint: Timepoint,
        viewer_transform: &AffineTransform3d,
        interpolation_for_source: &dyn Fn(&dyn Source) -> Interpolation,
    ) -> bool {
        let width = self.display.width();
        let height = self.display.height();
        if width == 0 || height == 0 {
            return false;
        }

        let (projector, create_projector) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.killed {
                return false;
            }

            let resized = match state.ladder.check_resize(width, height) {
                Ok(resized) => resized,
                Err(err) => {
                    tracing::warn!(width, height, %err, "cannot allocate screen buffers");
                    return false;
                }
            };

            let requested = state.request.get();
            state.rendering_may_be_cancelled =
                state.controller.rendering_may_be_cancelled(requested);

            let new_frame = state.new_frame_request;
            if new_frame {
                self.cache_control.prepare_next_frame();
                state.new_frame_request = false;
            }

            let create_projector = new_frame
                || resized
                || requested != state.current_screen_scale_index
                || state.current.is_none();

            if create_projector {
                let Some(render_id) = state.ladder.next_render_id() else {
                    tracing::warn!(requested, "no free render buffer; skipping frame");
                    return false;
                };
                let (Some(buffer), Some(screen_scale_transform)) = (
                    state.ladder.buffer(requested, render_id).cloned(),
                    state.ladder.screen_scale_transform(requested).copied(),
                ) else {
                    tracing::warn!(requested, ?render_id, "no buffer for requested screen scale");
                    return false;
                };

                state.current_screen_scale_index = requested;
                state.scratch.check_renew(sources.len(), &state.ladder);
                let frame_request = FrameRequest {
                    sources,
                    timepoint,
                    previous_timepoint: state.previous_timepoint,
                    viewer_transform: *viewer_transform,
                    screen_scale_index: requested,
                    screen_scale_transform,
                    interpolation_for_source,
                };
                let built = self
                    .factory
                    .create_projector(&frame_request, buffer.clone(), &state.scratch);
                state.previous_timepoint = Some(timepoint);
                if built.renew_hints_after_painting_once {
                    state.new_frame_request = true;
                }
                tracing::debug!(
                    screen_scale_index = requested,
                    render_id = render_id.index(),
                    sources = sources.len(),
                    new_frame,
                    resized,
                    "created projector"
                );
                state.current = Some(CurrentProjector {
                    projector: built.projector,
                    render_id,
                    buffer,
                    screen_scale_index: requested,
                    viewer_transform: *viewer_transform,
                    presented: false,
                });
            }

            state.request.take();
            let Some(current) = state.current.as_ref() else {
                return false;
            };
            // Cancels issued from here on must reach this map.
            current.projector.clear_cancel();
            (Arc::clone(&current.projector), create_projector)
        };

        let success = projector.map(create_projector);

        let (presentation, current_screen_scale_index, valid) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if state.killed {
                return false;
            }
            if !success {
                tracing::debug!(
                    screen_scale_index = state.current_screen_scale_index,
                    "frame cancelled"
                );
                return false;
            }

            // Only the first successful map of a projector is shown and timed;
            // later maps refresh the buffer already on screen.
            let mut presentation = None;
            if let Some(current) = state
                .current
                .as_mut()
                .filter(|current| !current.presented && Arc::ptr_eq(&current.projector, &projector))
            {
                current.presented = true;
                state.ladder.mark_presented(current.render_id);
                state.controller.observe(FrameObservation {
                    screen_scale_index: current.screen_scale_index,
                    render_time: projector.last_frame_render_time(),
                    outcome: FrameOutcome::Completed,
                });
                presentation = Some((current.buffer.clone(), current.viewer_transform));
            }
            (presentation, state.current_screen_scale_index, projector.is_valid())
        };

        // The sink may call back into the renderer, so it runs unlocked.
        if let Some((buffer, transform)) = presentation {
            if let Some(previous) = self.display.set_buffer_and_transform(buffer, transform) {
                let mut state = self.lock_state();
                if !state.killed {
                    state.ladder.release(&previous);
                }
            }
        }

        if current_screen_scale_index > 0 {
            self.request_repaint_at(current_screen_scale_index - 1);
        } else if !valid {
            if let Err(err) = self.interrupt.sleep(PLACEHOLDER_RETRY_PAUSE) {
                tracing::debug!(%err, "placeholder retry pause cut short");
            }
            self.request_repaint_at(current_screen_scale_index);
        }
        true
    }

    /// Requests a brand-new frame starting at the coarsest scale in use.
    pub fn request_repaint(&self) {
        let max_screen_scale_index = {
            let mut state = self.lock_state();
            if state.killed {
                return;
            }
            state.new_frame_request = true;
            state.controller.max_screen_scale_index()
        };
        self.request_repaint_at(max_screen_scale_index);
    }

    /// Requests a repaint at `screen_scale_index` (clamped to the coarsest
    /// scale), cancelling the running frame unless it started a refinement
    /// sequence.
    pub fn request_repaint_at(&self, screen_scale_index: usize) {
        {
            let mut state = self.lock_state();
            if state.killed {
                return;
            }
            let screen_scale_index = screen_scale_index.min(state.ladder.scales().coarsest_index());
            if state.rendering_may_be_cancelled {
                if let Some(current) = state.current.as_ref() {
                    current.projector.cancel();
                }
            }
            state.request.raise(screen_scale_index);
        }
        self.painter.request_repaint();
    }

    /// Drops every buffer, scratch array and projector. Later paints do
    /// nothing.
    pub fn kill(&self) {
        {
            let mut state = self.lock_state();
            state.killed = true;
            if let Some(current) = state.current.take() {
                current.projector.cancel();
            }
            state.ladder.clear();
            state.scratch.clear();
        }
        self.interrupt.interrupt();
        tracing::debug!("renderer killed");
    }

    /// Cuts short the placeholder retry pause of a running paint. The
    /// interrupt stays set until cleared through the returned handle.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn max_screen_scale_index(&self) -> usize {
        self.lock_state().controller.max_screen_scale_index()
    }

    pub fn current_screen_scale_index(&self) -> usize {
        self.lock_state().current_screen_scale_index
    }

    pub fn requested_screen_scale_index(&self) -> usize {
        self.lock_state().request.get()
    }

    pub fn is_killed(&self) -> bool {
        self.lock_state().killed
    }

    #[cfg(test)]
    pub(crate) fn free_render_ids(&self) -> Vec<RenderId> {
        self.lock_state().ladder.free_render_ids()
    }

    #[cfg(test)]
    pub(crate) fn buffer_size(&self, screen_scale_index: usize) -> Option<(u32, u32)> {
        self.lock_state().ladder.buffer_size(screen_scale_index)
    }

    #[cfg(test)]
    pub(crate) fn holds_frame_resources(&self) -> bool {
        let state = self.lock_state();
        state.current.is_some() || state.ladder.is_allocated() || !state.scratch.is_empty()
    }

    fn lock_state(&self) -> MutexGuard<'_, RendererState> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("renderer state lock poisoned"))
    }
}
