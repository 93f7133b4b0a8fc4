use thiserror::Error;
use view::AffineTransformError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScreenScaleError {
    #[error("screen scale ladder must contain at least one scale")]
    Empty,
    #[error("screen scale {index} ({scale}) must be finite and positive")]
    InvalidScale { index: usize, scale: f64 },
    #[error("screen scale {index} ({scale}) is not smaller than the previous scale ({previous})")]
    NotDecreasing {
        index: usize,
        scale: f64,
        previous: f64,
    },
    #[error("screen scale transform: {0}")]
    Transform(#[from] AffineTransformError),
}

/// Strictly decreasing scale factors; index 0 is the finest.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenScales(Vec<f64>);

impl ScreenScales {
    pub fn new(scales: Vec<f64>) -> Result<Self, ScreenScaleError> {
        if scales.is_empty() {
            return Err(ScreenScaleError::Empty);
        }
        for (index, &scale) in scales.iter().enumerate() {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ScreenScaleError::InvalidScale { index, scale });
            }
            if index > 0 && scale >= scales[index - 1] {
                return Err(ScreenScaleError::NotDecreasing {
                    index,
                    scale,
                    previous: scales[index - 1],
                });
            }
        }
        Ok(Self(scales))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn coarsest_index(&self) -> usize {
        self.0.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Buffer size for `index` on a canvas of `canvas_width` × `canvas_height`.
    pub fn buffer_size(
        &self,
        index: usize,
        canvas_width: u32,
        canvas_height: u32,
    ) -> Option<(u32, u32)> {
        let scale = self.get(index)?;
        Some((
            scaled_extent(scale, canvas_width),
            scaled_extent(scale, canvas_height),
        ))
    }
}

fn scaled_extent(scale: f64, extent: u32) -> u32 {
    let scaled = (scale * f64::from(extent)).round();
    if scaled < 1.0 {
        1
    } else if scaled >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        scaled as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_strictly_decreasing_scales() {
        let scales = ScreenScales::new(vec![1.0, 0.5, 0.25]).expect("valid ladder");
        assert_eq!(scales.len(), 3);
        assert_eq!(scales.coarsest_index(), 2);
        assert_eq!(scales.buffer_size(1, 101, 40), Some((51, 20)));
    }

    #[test]
    fn rejects_invalid_ladders() {
        assert_eq!(ScreenScales::new(Vec::new()), Err(ScreenScaleError::Empty));
        assert_eq!(
            ScreenScales::new(vec![1.0, 1.0]),
            Err(ScreenScaleError::NotDecreasing {
                index: 1,
                scale: 1.0,
                previous: 1.0
            })
        );
        assert!(matches!(
            ScreenScales::new(vec![1.0, -0.5]),
            Err(ScreenScaleError::InvalidScale { index: 1, .. })
        ));
    }

    #[test]
    fn tiny_scales_keep_one_pixel() {
        let scales = ScreenScales::new(vec![1.0, 0.001]).expect("valid ladder");
        assert_eq!(scales.buffer_size(1, 10, 10), Some((1, 1)));
    }
}
