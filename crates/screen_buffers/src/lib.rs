//! Screen-scale buffers and scratch storage for progressive rendering.
//!
//! - `scales`: validated ladder of screen scale factors.
//! - `ladder`: per-(scale, slot) output buffers, canvas-to-buffer transforms and
//!   the double-buffer render-id rotation.
//! - `scratch`: per-source render images and masks used by multi-source frames.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use static_assertions::assert_impl_all;

mod ladder;
mod scales;
mod scratch;

pub use ladder::ScreenScaleLadder;
pub use scales::{ScreenScaleError, ScreenScales};
pub use scratch::ScratchArena;

/// Number of buffer slots per scale when double buffering.
pub const DOUBLE_BUFFER_SLOTS: usize = 3;

/// Mask value for a pixel that no mipmap level has produced yet.
pub const MASK_UNTOUCHED: u8 = u8::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderId(u8);

impl RenderId {
    pub const ALL: [RenderId; DOUBLE_BUFFER_SLOTS] = [RenderId(0), RenderId(1), RenderId(2)];

    pub fn new(index: usize) -> Option<Self> {
        if index < DOUBLE_BUFFER_SLOTS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// FIFO of render ids whose buffers are free to be rendered into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderIdQueue {
    free: VecDeque<RenderId>,
}

impl Default for RenderIdQueue {
    fn default() -> Self {
        let mut queue = Self {
            free: VecDeque::with_capacity(DOUBLE_BUFFER_SLOTS),
        };
        queue.reset();
        queue
    }
}

impl RenderIdQueue {
    pub fn reset(&mut self) {
        self.free.clear();
        self.free.extend(RenderId::ALL);
    }

    pub fn clear(&mut self) {
        self.free.clear();
    }

    pub fn peek(&self) -> Option<RenderId> {
        self.free.front().copied()
    }

    /// Removes `render_id` from the free list; returns whether it was free.
    pub fn take(&mut self, render_id: RenderId) -> bool {
        if self.free.front() == Some(&render_id) {
            self.free.pop_front();
            return true;
        }
        let Some(position) = self.free.iter().position(|free| *free == render_id) else {
            return false;
        };
        self.free.remove(position);
        true
    }

    /// Appends `render_id` unless it is already free.
    pub fn release(&mut self, render_id: RenderId) -> bool {
        if self.free.contains(&render_id) {
            return false;
        }
        self.free.push_back(render_id);
        true
    }

    pub fn to_vec(&self) -> Vec<RenderId> {
        self.free.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

/// Where a ladder buffer lives: its scale, slot and allocation generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot {
    pub scale_index: usize,
    pub render_id: RenderId,
    pub generation: u64,
}

/// Packed ARGB pixels viewed at a given size.
///
/// Cloning is cheap and shares the backing store. Several buffers of
/// different sizes may view the same store; each sees the first
/// `width * height` pixels.
#[derive(Debug, Clone)]
pub struct ScreenBuffer {
    store: Arc<RwLock<Vec<u32>>>,
    width: u32,
    height: u32,
    slot: Option<BufferSlot>,
}

assert_impl_all!(ScreenBuffer: Send, Sync);
assert_impl_all!(MaskArray: Send, Sync);

impl ScreenBuffer {
    /// A buffer with its own backing store and no ladder slot.
    pub fn new(width: u32, height: u32) -> Self {
        let len = pixel_count(width, height);
        Self {
            store: Arc::new(RwLock::new(vec![0; len])),
            width,
            height,
            slot: None,
        }
    }

    /// A view of `template`'s store at a new size if it is large enough,
    /// otherwise a fresh allocation.
    pub fn sharing_or_new(width: u32, height: u32, template: &ScreenBuffer) -> Self {
        let len = pixel_count(width, height);
        let capacity = template.read_store().len();
        if len > capacity {
            return Self::new(width, height);
        }
        Self {
            store: Arc::clone(&template.store),
            width,
            height,
            slot: None,
        }
    }

    pub(crate) fn with_slot(mut self, slot: BufferSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        pixel_count(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot(&self) -> Option<BufferSlot> {
        self.slot
    }

    pub fn shares_storage_with(&self, other: &ScreenBuffer) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    pub fn read(&self) -> PixelsRead<'_> {
        PixelsRead {
            guard: self.read_store(),
            len: self.len(),
        }
    }

    pub fn write(&self) -> PixelsWrite<'_> {
        PixelsWrite {
            guard: self
                .store
                .write()
                .unwrap_or_else(|_| panic!("pixel store write lock poisoned")),
            len: self.len(),
        }
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.read().to_vec()
    }

    pub fn fill(&self, value: u32) {
        self.write().fill(value);
    }

    fn read_store(&self) -> RwLockReadGuard<'_, Vec<u32>> {
        self.store
            .read()
            .unwrap_or_else(|_| panic!("pixel store read lock poisoned"))
    }
}

pub struct PixelsRead<'a> {
    guard: RwLockReadGuard<'a, Vec<u32>>,
    len: usize,
}

impl Deref for PixelsRead<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.guard[..self.len]
    }
}

pub struct PixelsWrite<'a> {
    guard: RwLockWriteGuard<'a, Vec<u32>>,
    len: usize,
}

impl Deref for PixelsWrite<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.guard[..self.len]
    }
}

impl DerefMut for PixelsWrite<'_> {
    fn deref_mut(&mut self) -> &mut [u32] {
        &mut self.guard[..self.len]
    }
}

/// Per-source mask recording which mipmap rank produced each pixel.
#[derive(Debug, Clone)]
pub struct MaskArray(Arc<Mutex<Vec<u8>>>);

impl MaskArray {
    pub fn new(len: usize) -> Self {
        Self(Arc::new(Mutex::new(vec![MASK_UNTOUCHED; len])))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.0
            .lock()
            .unwrap_or_else(|_| panic!("mask array lock poisoned"))
    }

    pub fn same_array(&self, other: &MaskArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    (width as usize)
        .checked_mul(height as usize)
        .unwrap_or_else(|| panic!("buffer size {width}x{height} overflows usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_id_queue_rotates_and_rejects_duplicates() {
        let mut queue = RenderIdQueue::default();
        assert_eq!(queue.to_vec(), RenderId::ALL.to_vec());

        assert!(queue.take(RenderId::ALL[0]));
        assert!(queue.take(RenderId::ALL[1]));
        assert!(queue.release(RenderId::ALL[0]));
        assert!(!queue.release(RenderId::ALL[0]));
        assert_eq!(queue.to_vec(), vec![RenderId::ALL[2], RenderId::ALL[0]]);
        assert_eq!(queue.peek(), Some(RenderId::ALL[2]));
    }

    #[test]
    fn render_id_rejects_out_of_range_index() {
        assert_eq!(RenderId::new(2).map(RenderId::index), Some(2));
        assert_eq!(RenderId::new(3), None);
    }

    #[test]
    fn shared_buffers_view_prefix_of_template_store() {
        let finest = ScreenBuffer::new(4, 4);
        let coarse = ScreenBuffer::sharing_or_new(2, 2, &finest);
        assert!(coarse.shares_storage_with(&finest));
        assert_eq!(coarse.len(), 4);

        coarse.fill(7);
        let finest_pixels = finest.to_vec();
        assert_eq!(&finest_pixels[..4], &[7, 7, 7, 7]);
        assert_eq!(finest_pixels[4], 0);
    }

    #[test]
    fn oversized_view_allocates_its_own_store() {
        let small = ScreenBuffer::new(2, 2);
        let large = ScreenBuffer::sharing_or_new(3, 3, &small);
        assert!(!large.shares_storage_with(&small));
        assert_eq!(large.len(), 9);
    }
}
