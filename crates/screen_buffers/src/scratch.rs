use crate::{MaskArray, ScreenBuffer, ScreenScaleLadder};

/// Per-source render images and masks reused across frames.
///
/// Render images exist only when more than one source is visible; a single
/// source renders straight into the output buffer. Masks exist for every
/// visible source and are sized to the finest scale.
#[derive(Debug, Default)]
pub struct ScratchArena {
    num_sources: usize,
    num_scales: usize,
    finest_size: (u32, u32),
    render_images: Vec<ScreenBuffer>,
    masks: Vec<MaskArray>,
}

impl ScratchArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reallocates render images and masks if the source count or the ladder's
    /// finest buffer size changed. Returns whether anything was replaced.
    pub fn check_renew(&mut self, num_sources: usize, ladder: &ScreenScaleLadder) -> bool {
        let Some(finest_size) = ladder.buffer_size(0) else {
            return false;
        };
        let renewed_images = self.check_renew_render_images(num_sources, finest_size, ladder);
        let renewed_masks = self.check_renew_masks(num_sources, finest_size);
        self.finest_size = finest_size;
        renewed_images || renewed_masks
    }

    fn check_renew_render_images(
        &mut self,
        num_sources: usize,
        finest_size: (u32, u32),
        ladder: &ScreenScaleLadder,
    ) -> bool {
        let image_sources = if num_sources > 1 { num_sources } else { 0 };
        let current_sources = if self.num_scales == 0 {
            0
        } else {
            self.render_images.len() / self.num_scales
        };
        let num_scales = ladder.scales().len();
        if image_sources == current_sources
            && num_scales == self.num_scales
            && (image_sources == 0 || finest_size == self.finest_size)
        {
            return false;
        }

        let mut render_images = Vec::with_capacity(num_scales * image_sources);
        for scale_index in 0..num_scales {
            let Some((width, height)) = ladder.buffer_size(scale_index) else {
                continue;
            };
            for source_index in 0..image_sources {
                let image = if scale_index == 0 {
                    ScreenBuffer::new(width, height)
                } else {
                    ScreenBuffer::sharing_or_new(width, height, &render_images[source_index])
                };
                render_images.push(image);
            }
        }
        self.render_images = render_images;
        self.num_scales = num_scales;
        true
    }

    fn check_renew_masks(&mut self, num_sources: usize, finest_size: (u32, u32)) -> bool {
        let size = finest_size.0 as usize * finest_size.1 as usize;
        if num_sources == self.masks.len()
            && (num_sources == 0 || self.masks[0].len() >= size)
        {
            self.num_sources = num_sources;
            return false;
        }
        self.masks = (0..num_sources).map(|_| MaskArray::new(size)).collect();
        self.num_sources = num_sources;
        true
    }

    pub fn num_sources(&self) -> usize {
        self.num_sources
    }

    pub fn render_image(&self, scale_index: usize, source_index: usize) -> Option<&ScreenBuffer> {
        if self.num_sources < 2 || source_index >= self.num_sources {
            return None;
        }
        self.render_images
            .get(scale_index * self.num_sources + source_index)
    }

    pub fn mask(&self, source_index: usize) -> Option<&MaskArray> {
        self.masks.get(source_index)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.render_images.is_empty() && self.masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScreenScales;

    fn allocated_ladder(width: u32, height: u32) -> ScreenScaleLadder {
        let mut ladder = ScreenScaleLadder::new(
            ScreenScales::new(vec![1.0, 0.5]).expect("valid ladder"),
            true,
        );
        ladder.check_resize(width, height).expect("resize");
        ladder
    }

    #[test]
    fn single_source_gets_mask_but_no_render_images() {
        let ladder = allocated_ladder(8, 8);
        let mut scratch = ScratchArena::new();
        assert!(scratch.check_renew(1, &ladder));
        assert!(scratch.mask(0).is_some());
        assert!(scratch.render_image(0, 0).is_none());
        assert!(!scratch.check_renew(1, &ladder));
    }

    #[test]
    fn multiple_sources_get_images_for_every_scale() {
        let ladder = allocated_ladder(8, 6);
        let mut scratch = ScratchArena::new();
        assert!(scratch.check_renew(3, &ladder));
        for source_index in 0..3 {
            let finest = scratch.render_image(0, source_index).expect("finest");
            let coarse = scratch.render_image(1, source_index).expect("coarse");
            assert_eq!(finest.dimensions(), (8, 6));
            assert_eq!(coarse.dimensions(), (4, 3));
            assert!(coarse.shares_storage_with(finest));
            assert_eq!(scratch.mask(source_index).expect("mask").len(), 48);
        }
    }

    #[test]
    fn renews_wholesale_on_resize_and_source_count_change() {
        let mut ladder = allocated_ladder(8, 8);
        let mut scratch = ScratchArena::new();
        scratch.check_renew(2, &ladder);
        let first_mask = scratch.mask(0).expect("mask").clone();

        assert!(!scratch.check_renew(2, &ladder));
        assert!(scratch.mask(0).expect("mask").same_array(&first_mask));

        ladder.check_resize(16, 16).expect("resize");
        assert!(scratch.check_renew(2, &ladder));
        assert!(!scratch.mask(0).expect("mask").same_array(&first_mask));
        assert_eq!(scratch.render_image(0, 1).expect("image").dimensions(), (16, 16));

        assert!(scratch.check_renew(0, &ladder));
        assert!(scratch.is_empty());
    }
}
