//! Recording collaborators for renderer tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use screen_buffers::ScreenBuffer;
use view::AffineTransform3d;

use crate::{CacheControl, RenderTarget, RepaintRequester};

pub use crate::sample::{ConstantConverter, GrayConverter, PyramidSource};


#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub dimensions: (u32, u32),
    pub transform: AffineTransform3d,
    pub pixels: Vec<u32>,
}

/// Display sink that keeps a copy of every presented frame.
#[derive(Debug)]
pub struct RecordingRenderTarget {
    width: AtomicU32,
    height: AtomicU32,
    shown: Mutex<Option<ScreenBuffer>>,
    frames: Mutex<Vec<PresentedFrame>>,
}

impl RecordingRenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
            shown: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }

    pub fn frames(&self) -> Vec<PresentedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(|_| panic!("frame log lock poisoned"))
            .clone()
    }

    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.frames
            .lock()
            .unwrap_or_else(|_| panic!("frame log lock poisoned"))
            .last()
            .cloned()
    }

    pub fn shown_buffer(&self) -> Option<ScreenBuffer> {
        self.shown
            .lock()
            .unwrap_or_else(|_| panic!("shown buffer lock poisoned"))
            .clone()
    }
}

impl RenderTarget for RecordingRenderTarget {
    fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    fn set_buffer_and_transform(
        &self,
        buffer: ScreenBuffer,
        transform: AffineTransform3d,
    ) -> Option<ScreenBuffer> {
        self.frames
            .lock()
            .unwrap_or_else(|_| panic!("frame log lock poisoned"))
            .push(PresentedFrame {
                dimensions: buffer.dimensions(),
                transform,
                pixels: buffer.to_vec(),
            });
        self.shown
            .lock()
            .unwrap_or_else(|_| panic!("shown buffer lock poisoned"))
            .replace(buffer)
    }
}

#[derive(Debug, Default)]
pub struct CountingRepaintRequester {
    count: AtomicUsize,
}

impl CountingRepaintRequester {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl RepaintRequester for CountingRepaintRequester {
    fn request_repaint(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
pub struct RecordingCacheControl {
    prepared: AtomicUsize,
    budgets: Mutex<Vec<Vec<Duration>>>,
}

impl RecordingCacheControl {
    pub fn prepared_frames(&self) -> usize {
        self.prepared.load(Ordering::Acquire)
    }

    pub fn budgets(&self) -> Vec<Vec<Duration>> {
        self.budgets
            .lock()
            .unwrap_or_else(|_| panic!("budget log lock poisoned"))
            .clone()
    }
}

impl CacheControl for RecordingCacheControl {
    fn prepare_next_frame(&self) {
        self.prepared.fetch_add(1, Ordering::AcqRel);
    }

    fn reset_budget(&self, budget: &[Duration]) {
        self.budgets
            .lock()
            .unwrap_or_else(|_| panic!("budget log lock poisoned"))
            .push(budget.to_vec());
    }
}

