//! In-memory display for the headless host.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};
use render_protocol::RenderTarget;
use screen_buffers::ScreenBuffer;
use view::AffineTransform3d;

/// Display sink that keeps only the buffer on screen and announces every
/// presentation with the presented frame's dimensions.
#[derive(Debug)]
pub struct LatestFrameTarget {
    width: AtomicU32,
    height: AtomicU32,
    shown: Mutex<Option<(ScreenBuffer, AffineTransform3d)>>,
    presented: AtomicUsize,
    frame_sender: Sender<(u32, u32)>,
}

impl LatestFrameTarget {
    pub fn new(width: u32, height: u32) -> (Self, Receiver<(u32, u32)>) {
        let (frame_sender, frame_receiver) = unbounded();
        let target = Self {
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
            shown: Mutex::new(None),
            presented: AtomicUsize::new(0),
            frame_sender,
        };
        (target, frame_receiver)
    }

    pub fn presented_frames(&self) -> usize {
        self.presented.load(Ordering::Acquire)
    }

    pub fn shown_transform(&self) -> Option<AffineTransform3d> {
        self.lock_shown().as_ref().map(|(_, transform)| *transform)
    }

    fn lock_shown(&self) -> std::sync::MutexGuard<'_, Option<(ScreenBuffer, AffineTransform3d)>> {
        self.shown
            .lock()
            .unwrap_or_else(|_| panic!("shown frame lock poisoned"))
    }
}

impl RenderTarget for LatestFrameTarget {
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
        let dimensions = buffer.dimensions();
        let previous = self
            .lock_shown()
            .replace((buffer, transform))
            .map(|(previous, _)| previous);
        self.presented.fetch_add(1, Ordering::AcqRel);
        // The host may have stopped listening; the frame is still shown.
        let _ = self.frame_sender.send(dimensions);
        previous
    }
}
