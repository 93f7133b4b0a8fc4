//! Renderer crate root.
//!
//! This module defines the public API (`MultiResolutionRenderer`,
//! `RendererConfig`, the `Projector` family) and wires the internal modules
//! used by the frame pipeline.
//!
//! Internal architecture overview:
//! - `config`: serde-backed renderer settings and their validation.
//! - `projector`: the `Projector` contract plus empty and single-level projectors.
//! - `volatile_projector`: multi-level rendering over placeholder-aware sources.
//! - `accumulate`: compositing of per-source images into the output buffer.
//! - `projector_factory`: picks and builds the projector for a frame request.
//! - `renderer_frame`: the paint loop, refinement scheduling and teardown.

mod accumulate;
mod config;
mod projector;
mod projector_factory;
mod renderer_frame;
mod volatile_projector;

pub use accumulate::{
    AccumulateProjector, AccumulateProjectorFactory, AdditiveAccumulateProjectorFactory,
    AdditiveAccumulator, AlphaOverAccumulateProjectorFactory, AlphaOverAccumulator,
    PixelAccumulator,
};
pub use config::{RendererConfig, RendererConfigError};
pub use projector::{EmptyProjector, Projector, SimpleProjector};
pub use projector_factory::{BuiltProjector, FrameRequest, ProjectorFactory, SourceProjectorFactory};
pub use renderer_frame::MultiResolutionRenderer;
pub use volatile_projector::VolatileHierarchyProjector;
