use std::time::Duration;

use engine::RenderPoolError;
use screen_buffers::{ScreenScaleError, ScreenScales};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererConfigError {
    #[error("invalid screen scales: {0}")]
    ScreenScales(#[from] ScreenScaleError),
    #[error("target render time must be positive")]
    ZeroTargetRenderTime,
    #[error("rendering thread count must be at least 1")]
    ZeroRenderingThreads,
    #[error("rendering thread pool: {0}")]
    RenderPool(#[from] RenderPoolError),
    #[error("renderer config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tuning knobs of the progressive renderer. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Strictly decreasing; index 0 is full resolution.
    pub screen_scales: Vec<f64>,
    pub target_render_time_ms: u64,
    pub double_buffered: bool,
    pub num_rendering_threads: usize,
    pub use_volatile_if_available: bool,
    pub prefetch_cells: bool,
    /// Blocking-load budget per queue priority, reset before each new projector.
    pub io_budget_ms: Vec<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            screen_scales: vec![1.0, 0.75, 0.5, 0.25, 0.125],
            target_render_time_ms: 30,
            double_buffered: true,
            num_rendering_threads: 3,
            use_volatile_if_available: true,
            prefetch_cells: true,
            io_budget_ms: vec![100, 10],
        }
    }
}

impl RendererConfig {
    pub fn from_json_str(json: &str) -> Result<Self, RendererConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RendererConfigError> {
        self.screen_scales()?;
        if self.target_render_time_ms == 0 {
            return Err(RendererConfigError::ZeroTargetRenderTime);
        }
        if self.num_rendering_threads == 0 {
            return Err(RendererConfigError::ZeroRenderingThreads);
        }
        Ok(())
    }

    pub fn screen_scales(&self) -> Result<ScreenScales, ScreenScaleError> {
        ScreenScales::new(self.screen_scales.clone())
    }

    pub fn target_render_time(&self) -> Duration {
        Duration::from_millis(self.target_render_time_ms)
    }

    pub fn io_budget(&self) -> Vec<Duration> {
        self.io_budget_ms.iter().copied().map(Duration::from_millis).collect()
    }
}
