use view::AffineTransform3d;

use crate::{
    BufferSlot, DOUBLE_BUFFER_SLOTS, RenderId, RenderIdQueue, ScreenBuffer, ScreenScaleError,
    ScreenScales,
};

/// Output buffers for every screen scale plus their canvas-to-buffer transforms.
///
/// Buffers are stored in a flat arena indexed by `(scale, slot)` and are only
/// ever replaced wholesale when the canvas size changes.
#[derive(Debug)]
pub struct ScreenScaleLadder {
    scales: ScreenScales,
    double_buffered: bool,
    canvas_size: Option<(u32, u32)>,
    generation: u64,
    buffers: Vec<ScreenBuffer>,
    transforms: Vec<AffineTransform3d>,
    render_ids: RenderIdQueue,
}

impl ScreenScaleLadder {
    pub fn new(scales: ScreenScales, double_buffered: bool) -> Self {
        Self {
            scales,
            double_buffered,
            canvas_size: None,
            generation: 0,
            buffers: Vec::new(),
            transforms: Vec::new(),
            render_ids: RenderIdQueue::default(),
        }
    }

    pub fn scales(&self) -> &ScreenScales {
        &self.scales
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffered
    }

    pub fn slots_per_scale(&self) -> usize {
        if self.double_buffered {
            DOUBLE_BUFFER_SLOTS
        } else {
            1
        }
    }

    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        self.canvas_size
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reallocates every buffer and transform if the canvas size changed.
    ///
    /// Returns `true` when a reallocation happened; the render-id queue is then
    /// back to `{0, 1, 2}`.
    pub fn check_resize(
        &mut self,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Result<bool, ScreenScaleError> {
        if self.canvas_size == Some((canvas_width, canvas_height)) && !self.buffers.is_empty() {
            return Ok(false);
        }

        let slots = self.slots_per_scale();
        let generation = self.generation + 1;
        let mut buffers = Vec::with_capacity(self.scales.len() * slots);
        let mut transforms = Vec::with_capacity(self.scales.len());
        for scale_index in 0..self.scales.len() {
            let Some((width, height)) =
                self.scales.buffer_size(scale_index, canvas_width, canvas_height)
            else {
                continue;
            };
            for slot in 0..slots {
                let buffer = if scale_index == 0 {
                    ScreenBuffer::new(width, height)
                } else {
                    ScreenBuffer::sharing_or_new(width, height, &buffers[slot])
                };
                let render_id = RenderId::ALL[slot];
                buffers.push(buffer.with_slot(BufferSlot {
                    scale_index,
                    render_id,
                    generation,
                }));
            }
            transforms.push(AffineTransform3d::screen_scale(
                f64::from(width) / f64::from(canvas_width),
                f64::from(height) / f64::from(canvas_height),
            )?);
        }

        self.buffers = buffers;
        self.transforms = transforms;
        self.generation = generation;
        self.canvas_size = Some((canvas_width, canvas_height));
        self.render_ids.reset();
        Ok(true)
    }

    pub fn buffer(&self, scale_index: usize, render_id: RenderId) -> Option<&ScreenBuffer> {
        let slot = if self.double_buffered {
            render_id.index()
        } else {
            0
        };
        if slot >= self.slots_per_scale() {
            return None;
        }
        self.buffers.get(scale_index * self.slots_per_scale() + slot)
    }

    pub fn buffer_size(&self, scale_index: usize) -> Option<(u32, u32)> {
        self.buffers
            .get(scale_index * self.slots_per_scale())
            .map(ScreenBuffer::dimensions)
    }

    pub fn screen_scale_transform(&self, scale_index: usize) -> Option<&AffineTransform3d> {
        self.transforms.get(scale_index)
    }

    /// Render id of the buffer the next projector should target.
    pub fn next_render_id(&self) -> Option<RenderId> {
        if self.double_buffered {
            self.render_ids.peek()
        } else {
            Some(RenderId::ALL[0])
        }
    }

    /// Marks `render_id` as handed to the display sink.
    pub fn mark_presented(&mut self, render_id: RenderId) {
        if self.double_buffered {
            self.render_ids.take(render_id);
        }
    }

    /// Returns a buffer released by the display sink to the free list.
    ///
    /// Buffers from an earlier allocation generation are dropped.
    pub fn release(&mut self, buffer: &ScreenBuffer) -> bool {
        if !self.double_buffered {
            return false;
        }
        let Some(slot) = buffer.slot() else {
            return false;
        };
        if slot.generation != self.generation || self.buffers.is_empty() {
            return false;
        }
        self.render_ids.release(slot.render_id)
    }

    pub fn free_render_ids(&self) -> Vec<RenderId> {
        self.render_ids.to_vec()
    }

    /// Drops all buffers and transforms; the next `check_resize` reallocates.
    pub fn clear(&mut self) {
        self.buffers = Vec::new();
        self.transforms = Vec::new();
        self.canvas_size = None;
        self.render_ids.clear();
    }

    pub fn is_allocated(&self) -> bool {
        !self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder(double_buffered: bool) -> ScreenScaleLadder {
        ScreenScaleLadder::new(
            ScreenScales::new(vec![1.0, 0.5, 0.25]).expect("valid ladder"),
            double_buffered,
        )
    }

    #[test]
    fn resize_allocates_every_scale_and_resets_queue() {
        let mut ladder = ladder(true);
        for (width, height) in [(100, 100), (64, 30), (7, 300), (100, 100)] {
            assert!(ladder.check_resize(width, height).expect("resize"));
            for (scale_index, scale) in [1.0_f64, 0.5, 0.25].into_iter().enumerate() {
                let expected = (
                    ((scale * f64::from(width)).round() as u32).max(1),
                    ((scale * f64::from(height)).round() as u32).max(1),
                );
                for render_id in RenderId::ALL {
                    let buffer = ladder.buffer(scale_index, render_id).expect("buffer");
                    assert_eq!(buffer.dimensions(), expected);
                }
            }
            assert_eq!(ladder.free_render_ids(), RenderId::ALL.to_vec());
        }
    }

    #[test]
    fn unchanged_size_does_not_reallocate() {
        let mut ladder = ladder(true);
        assert!(ladder.check_resize(40, 20).expect("resize"));
        ladder.mark_presented(RenderId::ALL[0]);
        assert!(!ladder.check_resize(40, 20).expect("resize"));
        assert_eq!(ladder.free_render_ids(), vec![RenderId::ALL[1], RenderId::ALL[2]]);
    }

    #[test]
    fn coarse_scales_share_finest_store_per_slot() {
        let mut ladder = ladder(true);
        ladder.check_resize(16, 16).expect("resize");
        for render_id in RenderId::ALL {
            let finest = ladder.buffer(0, render_id).expect("finest");
            let coarse = ladder.buffer(2, render_id).expect("coarse");
            assert!(coarse.shares_storage_with(finest));
        }
        let slot_0 = ladder.buffer(0, RenderId::ALL[0]).expect("slot 0");
        let slot_1 = ladder.buffer(0, RenderId::ALL[1]).expect("slot 1");
        assert!(!slot_0.shares_storage_with(slot_1));
    }

    #[test]
    fn transforms_match_buffer_ratio() {
        let mut ladder = ladder(false);
        ladder.check_resize(100, 50).expect("resize");
        let transform = ladder.screen_scale_transform(1).expect("transform");
        assert!((transform.get(0, 0) - 0.5).abs() < 1e-12);
        assert!((transform.get(1, 1) - 0.5).abs() < 1e-12);
        assert!((transform.get(0, 3) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn release_ignores_stale_generations() {
        let mut ladder = ladder(true);
        ladder.check_resize(10, 10).expect("resize");
        let old = ladder.buffer(0, RenderId::ALL[0]).expect("buffer").clone();
        ladder.mark_presented(RenderId::ALL[0]);
        ladder.check_resize(20, 20).expect("resize");
        ladder.mark_presented(RenderId::ALL[0]);
        assert!(!ladder.release(&old));
        assert_eq!(ladder.free_render_ids(), vec![RenderId::ALL[1], RenderId::ALL[2]]);

        let current = ladder.buffer(0, RenderId::ALL[0]).expect("buffer").clone();
        assert!(ladder.release(&current));
        assert_eq!(
            ladder.free_render_ids(),
            vec![RenderId::ALL[1], RenderId::ALL[2], RenderId::ALL[0]]
        );
    }

    #[test]
    fn single_buffered_ladder_always_targets_slot_zero() {
        let mut ladder = ladder(false);
        ladder.check_resize(10, 10).expect("resize");
        assert_eq!(ladder.next_render_id(), Some(RenderId::ALL[0]));
        ladder.mark_presented(RenderId::ALL[0]);
        assert_eq!(ladder.next_render_id(), Some(RenderId::ALL[0]));
        assert!(ladder.buffer(2, RenderId::ALL[0]).is_some());
    }

    #[test]
    fn clear_releases_all_buffers() {
        let mut ladder = ladder(true);
        ladder.check_resize(10, 10).expect("resize");
        ladder.clear();
        assert!(!ladder.is_allocated());
        assert!(ladder.buffer(0, RenderId::ALL[0]).is_none());
        assert_eq!(ladder.next_render_id(), None);
    }
}
