//! Adaptive screen-scale control for progressive rendering.
//!
//! `ScreenScaleController` tunes which screen scale starts a refinement
//! sequence so that the first image after a view change lands within the
//! target render time. `ScaleRequest` tracks the scale the next paint should
//! render.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleControllerConfig {
    pub target_render_time: Duration,
    pub num_screen_scales: usize,
}

impl Default for ScaleControllerConfig {
    fn default() -> Self {
        Self {
            target_render_time: Duration::from_millis(30),
            num_screen_scales: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameObservation {
    pub screen_scale_index: usize,
    pub render_time: Duration,
    pub outcome: FrameOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleUpdateReason {
    TooSlowAtCoarsest,
    FastAtCoarsest,
    FastAtSecondCoarsest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleDecision {
    pub max_screen_scale_index: usize,
    pub update_reason: Option<ScaleUpdateReason>,
}

#[derive(Debug, Clone)]
pub struct ScreenScaleController {
    config: ScaleControllerConfig,
    max_screen_scale_index: usize,
}

impl ScreenScaleController {
    /// Starts at the coarsest scale.
    pub fn new(config: ScaleControllerConfig) -> Self {
        if config.num_screen_scales == 0 {
            panic!("invalid scale controller config: num_screen_scales must be at least 1");
        }
        Self {
            config,
            max_screen_scale_index: config.num_screen_scales - 1,
        }
    }

    pub fn with_initial_max_index(mut self, max_screen_scale_index: usize) -> Self {
        self.max_screen_scale_index = max_screen_scale_index.min(self.coarsest_index());
        self
    }

    pub fn config(&self) -> ScaleControllerConfig {
        self.config
    }

    pub fn max_screen_scale_index(&self) -> usize {
        self.max_screen_scale_index
    }

    pub fn coarsest_index(&self) -> usize {
        self.config.num_screen_scales - 1
    }

    /// Whether a render started at `requested_screen_scale_index` may be
    /// cancelled by a later request.
    pub fn rendering_may_be_cancelled(&self, requested_screen_scale_index: usize) -> bool {
        requested_screen_scale_index < self.max_screen_scale_index
    }

    /// Feeds one finished frame into the controller.
    ///
    /// Both rules are evaluated against the index before this frame, so at
    /// most one step happens per observation.
    pub fn observe(&mut self, observation: FrameObservation) -> ScaleDecision {
        let update_reason = match observation.outcome {
            FrameOutcome::Cancelled => None,
            FrameOutcome::Completed => self.update_for(observation),
        };
        if let Some(reason) = update_reason {
            tracing::debug!(
                ?reason,
                max_screen_scale_index = self.max_screen_scale_index,
                render_time_ms = observation.render_time.as_secs_f64() * 1000.0,
                "adjusted coarsest screen scale"
            );
        }
        ScaleDecision {
            max_screen_scale_index: self.max_screen_scale_index,
            update_reason,
        }
    }

    fn update_for(&mut self, observation: FrameObservation) -> Option<ScaleUpdateReason> {
        let target = self.config.target_render_time;
        let max = self.max_screen_scale_index;
        let render_time = observation.render_time;

        if observation.screen_scale_index == max {
            if render_time > target && max < self.coarsest_index() {
                self.max_screen_scale_index += 1;
                return Some(ScaleUpdateReason::TooSlowAtCoarsest);
            }
            if render_time < target / 3 && max > 0 {
                self.max_screen_scale_index -= 1;
                return Some(ScaleUpdateReason::FastAtCoarsest);
            }
            return None;
        }

        if max > 0 && observation.screen_scale_index == max - 1 && render_time < target {
            self.max_screen_scale_index -= 1;
            return Some(ScaleUpdateReason::FastAtSecondCoarsest);
        }
        None
    }
}

impl Default for ScreenScaleController {
    fn default() -> Self {
        Self::new(ScaleControllerConfig::default())
    }
}

/// Highest-priority scale requested since the last paint took it.
///
/// Larger indices are coarser and win; taking the request resets it to full
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScaleRequest {
    requested_screen_scale_index: usize,
}

impl ScaleRequest {
    pub fn get(&self) -> usize {
        self.requested_screen_scale_index
    }

    pub fn raise(&mut self, screen_scale_index: usize) {
        self.requested_screen_scale_index =
            self.requested_screen_scale_index.max(screen_scale_index);
    }

    pub fn take(&mut self) -> usize {
        std::mem::take(&mut self.requested_screen_scale_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(target_ms: u64, num_screen_scales: usize) -> ScreenScaleController {
        ScreenScaleController::new(ScaleControllerConfig {
            target_render_time: Duration::from_millis(target_ms),
            num_screen_scales,
        })
    }

    fn completed(screen_scale_index: usize, render_ms: u64) -> FrameObservation {
        FrameObservation {
            screen_scale_index,
            render_time: Duration::from_millis(render_ms),
            outcome: FrameOutcome::Completed,
        }
    }

    #[test]
    fn starts_at_coarsest_scale() {
        let controller = controller(50, 3);
        assert_eq!(controller.max_screen_scale_index(), 2);
        assert_eq!(controller.coarsest_index(), 2);
    }

    #[test]
    fn slow_frames_saturate_at_coarsest() {
        let mut controller = controller(50, 4).with_initial_max_index(0);
        let mut previous = controller.max_screen_scale_index();
        for _ in 0..10 {
            let max = controller.max_screen_scale_index();
            let decision = controller.observe(completed(max, 120));
            assert!(decision.max_screen_scale_index >= previous);
            previous = decision.max_screen_scale_index;
        }
        assert_eq!(controller.max_screen_scale_index(), 3);
        let decision = controller.observe(completed(3, 120));
        assert_eq!(decision.update_reason, None);
    }

    #[test]
    fn fast_frames_descend_to_full_resolution() {
        let mut controller = controller(50, 4);
        let mut previous = controller.max_screen_scale_index();
        for _ in 0..10 {
            let max = controller.max_screen_scale_index();
            let decision = controller.observe(completed(max, 5));
            assert!(decision.max_screen_scale_index <= previous);
            previous = decision.max_screen_scale_index;
        }
        assert_eq!(controller.max_screen_scale_index(), 0);
    }

    #[test]
    fn slow_frame_at_full_resolution_steps_coarser() {
        let mut controller = controller(50, 3).with_initial_max_index(0);
        let decision = controller.observe(completed(0, 80));
        assert_eq!(decision.max_screen_scale_index, 1);
        assert_eq!(decision.update_reason, Some(ScaleUpdateReason::TooSlowAtCoarsest));
    }

    #[test]
    fn fast_frame_at_second_coarsest_steps_finer() {
        let mut controller = controller(50, 3).with_initial_max_index(1);
        let decision = controller.observe(completed(0, 10));
        assert_eq!(decision.max_screen_scale_index, 0);
        assert_eq!(
            decision.update_reason,
            Some(ScaleUpdateReason::FastAtSecondCoarsest)
        );

        let mut controller = self::controller(50, 3).with_initial_max_index(2);
        let decision = controller.observe(completed(1, 40));
        assert_eq!(decision.max_screen_scale_index, 1);
    }

    #[test]
    fn fast_frame_at_max_uses_one_third_threshold() {
        let mut controller = controller(60, 3).with_initial_max_index(1);
        let decision = controller.observe(completed(1, 10));
        assert_eq!(decision.max_screen_scale_index, 0);
        assert_eq!(decision.update_reason, Some(ScaleUpdateReason::FastAtCoarsest));

        let mut controller = self::controller(60, 3).with_initial_max_index(1);
        let decision = controller.observe(completed(1, 30));
        assert_eq!(decision.max_screen_scale_index, 1);
        assert_eq!(decision.update_reason, None);
    }

    #[test]
    fn cancelled_and_fine_frames_leave_index_unchanged() {
        let mut controller = controller(50, 4);
        let decision = controller.observe(FrameObservation {
            screen_scale_index: 3,
            render_time: Duration::from_millis(1),
            outcome: FrameOutcome::Cancelled,
        });
        assert_eq!(decision.max_screen_scale_index, 3);
        assert_eq!(decision.update_reason, None);

        let decision = controller.observe(completed(0, 1));
        assert_eq!(decision.max_screen_scale_index, 3);
    }

    #[test]
    fn only_renders_below_max_may_be_cancelled() {
        let controller = controller(50, 3).with_initial_max_index(1);
        assert!(controller.rendering_may_be_cancelled(0));
        assert!(!controller.rendering_may_be_cancelled(1));
        assert!(!controller.rendering_may_be_cancelled(2));
    }

    #[test]
    fn scale_request_never_lowers_and_resets_on_take() {
        let mut request = ScaleRequest::default();
        request.raise(2);
        request.raise(1);
        assert_eq!(request.get(), 2);
        assert_eq!(request.take(), 2);
        assert_eq!(request.get(), 0);
    }

    #[test]
    #[should_panic(expected = "num_screen_scales")]
    fn rejects_empty_ladder() {
        let _ = controller(50, 0);
    }
}
