//! Headless host for the progressive renderer.
//!
//! Wires a painter thread, a `MultiResolutionRenderer` and an in-memory
//! display to synthetic volumes, then replays a few zoom steps and logs how
//! each refinement sequence lands on screen.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use engine::PainterThread;
use render_protocol::sample::{GrayConverter, PyramidSource};
use render_protocol::{
    CacheControl, Interpolation, IoBudget, RenderTarget, Source, SourceAndConverter,
};
use renderer::{MultiResolutionRenderer, RendererConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use view::AffineTransform3d;

mod display;

use display::LatestFrameTarget;

const VOLUME_SIZE: u64 = 512;
const VOLUME_LEVELS: usize = 4;
/// Simulated cost of one blocking level load.
const BLOCKING_LOAD_TIME: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(author, version, about = "Replay zoom steps through the progressive renderer")]
struct Arguments {
    /// Renderer settings as JSON; missing fields use defaults.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Number of view changes after the first image.
    #[arg(long, default_value_t = 3)]
    zoom_steps: usize,
    /// Zoom factor per view change, about the canvas center.
    #[arg(long, default_value_t = 1.5)]
    zoom: f64,
    /// Sample with n-linear interpolation instead of nearest neighbor.
    #[arg(long)]
    linear: bool,
    /// Add a second source whose levels arrive one by one.
    #[arg(long)]
    volatile: bool,
    /// Delay between level arrivals of the volatile source.
    #[arg(long, default_value_t = 40)]
    level_delay_ms: u64,
    /// Upper bound on how long one refinement sequence may take.
    #[arg(long, default_value_t = 5)]
    settle_timeout_secs: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arguments = Arguments::parse();
    let config = load_config(arguments.config.as_deref())?;
    info!(?config, width = arguments.width, height = arguments.height, "starting viewer");

    let cache_control = Arc::new(IoBudget::new());
    let (sources, volatile) = synthetic_sources(arguments.volatile, &cache_control);
    let (display, presented) = LatestFrameTarget::new(arguments.width, arguments.height);
    let display = Arc::new(display);
    let viewer_transform = Arc::new(Mutex::new(AffineTransform3d::identity()));
    let renderer_slot: Arc<OnceLock<Arc<MultiResolutionRenderer>>> = Arc::new(OnceLock::new());
    let interpolation = if arguments.linear {
        Interpolation::NLinear
    } else {
        Interpolation::NearestNeighbor
    };

    let (painter, repaint_handle) = {
        let renderer_slot = Arc::clone(&renderer_slot);
        let viewer_transform = Arc::clone(&viewer_transform);
        let sources = sources.clone();
        PainterThread::spawn("painter", move || {
            let Some(renderer) = renderer_slot.get() else {
                return;
            };
            let transform = *viewer_transform
                .lock()
                .unwrap_or_else(|_| panic!("viewer transform lock poisoned"));
            renderer.paint(&sources, 0, &transform, &|_: &dyn Source| interpolation);
        })
        .context("spawn painter thread")?
    };

    let renderer = Arc::new(
        MultiResolutionRenderer::new(
            &config,
            Arc::clone(&display) as Arc<dyn RenderTarget>,
            Arc::new(repaint_handle),
            cache_control as Arc<dyn CacheControl>,
        )
        .context("create renderer")?,
    );
    renderer_slot
        .set(Arc::clone(&renderer))
        .map_err(|_| anyhow!("renderer installed twice"))?;

    let loader = volatile.map(|source| {
        let renderer = Arc::clone(&renderer);
        let delay = Duration::from_millis(arguments.level_delay_ms);
        thread::spawn(move || load_levels_coarse_to_fine(&source, &renderer, delay))
    });

    let settle_timeout = Duration::from_secs(arguments.settle_timeout_secs);
    renderer.request_repaint();
    settle(&renderer, &display, &presented, settle_timeout, 0);

    let center_x = f64::from(arguments.width) / 2.0;
    let center_y = f64::from(arguments.height) / 2.0;
    for step in 1..=arguments.zoom_steps {
        {
            let mut transform = viewer_transform
                .lock()
                .unwrap_or_else(|_| panic!("viewer transform lock poisoned"));
            *transform = transform
                .zoom_about_point(arguments.zoom, center_x, center_y)
                .with_context(|| format!("zoom by {}", arguments.zoom))?;
        }
        renderer.request_repaint();
        settle(&renderer, &display, &presented, settle_timeout, step);
    }

    if let Some(loader) = loader {
        if loader.join().is_err() {
            warn!("level loader panicked");
        }
    }
    renderer.kill();
    painter.shutdown();
    let presented_frames = display.presented_frames();
    let shown_transform = display.shown_transform();
    info!(
        frames = presented_frames,
        shown_transform = ?shown_transform,
        max_screen_scale_index = renderer.max_screen_scale_index(),
        "viewer finished"
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RendererConfig> {
    let Some(path) = path else {
        return Ok(RendererConfig::default());
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    RendererConfig::from_json_str(&json)
        .with_context(|| format!("parse config {}", path.display()))
}

/// A smooth gradient plus, optionally, a ring pattern whose pyramid levels
/// start out unloaded. Levels hinted for blocking loads draw on `budget`.
fn synthetic_sources(
    with_volatile: bool,
    budget: &Arc<IoBudget>,
) -> (Vec<SourceAndConverter>, Option<Arc<PyramidSource>>) {
    let size = VOLUME_SIZE as f64;
    let dimensions = [VOLUME_SIZE, VOLUME_SIZE, 1];
    let gradient = PyramidSource::new("gradient", dimensions, VOLUME_LEVELS, move |p| {
        (p[0] + p[1]) / (2.0 * size)
    });
    let mut sources = vec![SourceAndConverter::new(
        Arc::new(gradient),
        Arc::new(GrayConverter::new(0.0, 1.0)),
    )];
    if !with_volatile {
        return (sources, None);
    }

    let rings = Arc::new(
        PyramidSource::new("rings", dimensions, VOLUME_LEVELS, move |p| {
            let dx = p[0] - size / 2.0;
            let dy = p[1] - size / 2.0;
            (dx.hypot(dy) / 16.0).sin().abs()
        })
        .into_volatile()
        .with_io_budget(Arc::clone(budget), BLOCKING_LOAD_TIME),
    );
    sources.push(SourceAndConverter::new(
        Arc::clone(&rings) as Arc<dyn Source>,
        Arc::new(GrayConverter::new(0.0, 4.0)),
    ));
    (sources, Some(rings))
}

fn load_levels_coarse_to_fine(
    source: &PyramidSource,
    renderer: &MultiResolutionRenderer,
    delay: Duration,
) {
    for level in (0..source.num_mipmap_levels()).rev() {
        thread::sleep(delay);
        if source.is_loaded(level) {
            continue;
        }
        source.set_loaded(level, true);
        info!(source = source.name(), level, "level loaded");
        renderer.request_repaint_at(0);
    }
}

/// Blocks until the display announces a full-resolution frame, then logs the
/// frame sizes presented in this sequence.
fn settle(
    renderer: &MultiResolutionRenderer,
    display: &LatestFrameTarget,
    presented: &Receiver<(u32, u32)>,
    timeout: Duration,
    step: usize,
) {
    let started = Instant::now();
    let full_size = (display.width(), display.height());
    let mut sizes = Vec::new();
    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        match presented.recv_timeout(remaining) {
            Ok(size) => {
                sizes.push(size);
                if size == full_size {
                    info!(
                        step,
                        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                        max_screen_scale_index = renderer.max_screen_scale_index(),
                        ?sizes,
                        "refinement settled"
                    );
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(step, frames = sizes.len(), "refinement did not settle in time");
                return;
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(step, "display dropped before refinement settled");
                return;
            }
        }
    }
}
