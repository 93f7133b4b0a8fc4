//! Thread plumbing for the progressive renderer.
//!
//! - `RenderPool`: rayon workers that run pixel work.
//! - `PainterThread` / `RepaintHandle`: the thread that drives `paint` calls
//!   and the coalescing signal that wakes it.
//! - `Interrupt`: interruptible sleep used to pace placeholder retries.

mod interrupt;
mod painter;
mod pool;

pub use interrupt::{Interrupt, Interrupted};
pub use painter::{PainterThread, PainterThreadError, RepaintHandle};
pub use pool::{RenderPool, RenderPoolError};
