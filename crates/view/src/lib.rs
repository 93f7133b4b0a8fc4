//! Affine transforms shared by viewer, source and screen-scale mappings.
//!
//! `AffineTransform3d` is a row-major 3×4 matrix. Composition follows the
//! usual convention: `a.concatenate(&b)` yields `a ∘ b` (apply `b` first) and
//! `a.pre_concatenate(&b)` yields `b ∘ a` (apply `a` first).

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AffineTransformError {
    #[error("affine transform contains a non-finite value")]
    NonFiniteValue,
    #[error("affine transform is singular and cannot be inverted")]
    Singular,
    #[error("scale factor must be finite and positive")]
    InvalidScale,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform3d {
    rows: [[f64; 4]; 3],
}

impl Default for AffineTransform3d {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform3d {
    pub const fn identity() -> Self {
        Self {
            rows: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
        }
    }

    pub fn from_rows(rows: [[f64; 4]; 3]) -> Result<Self, AffineTransformError> {
        if rows.iter().flatten().any(|value| !value.is_finite()) {
            return Err(AffineTransformError::NonFiniteValue);
        }
        Ok(Self { rows })
    }

    pub fn scaling(scale_x: f64, scale_y: f64, scale_z: f64) -> Result<Self, AffineTransformError> {
        for scale in [scale_x, scale_y, scale_z] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(AffineTransformError::InvalidScale);
            }
        }
        Ok(Self {
            rows: [
                [scale_x, 0.0, 0.0, 0.0],
                [0.0, scale_y, 0.0, 0.0],
                [0.0, 0.0, scale_z, 0.0],
            ],
        })
    }

    pub fn translation(offset: [f64; 3]) -> Result<Self, AffineTransformError> {
        let mut transform = Self::identity();
        transform.set_translation(offset)?;
        Ok(transform)
    }

    /// Canvas-to-buffer mapping for one screen scale.
    ///
    /// Pixel centers stay aligned: canvas pixel `i` covers `[i - 0.5, i + 0.5]`
    /// and maps onto the buffer pixel whose footprint contains it.
    pub fn screen_scale(scale_x: f64, scale_y: f64) -> Result<Self, AffineTransformError> {
        let mut transform = Self::scaling(scale_x, scale_y, 1.0)?;
        transform.rows[0][3] = 0.5 * scale_x - 0.5;
        transform.rows[1][3] = 0.5 * scale_y - 0.5;
        Ok(transform)
    }

    pub fn rows(&self) -> [[f64; 4]; 3] {
        self.rows
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.rows[row][column]
    }

    pub fn translation_part(&self) -> [f64; 3] {
        [self.rows[0][3], self.rows[1][3], self.rows[2][3]]
    }

    pub fn set_translation(&mut self, offset: [f64; 3]) -> Result<(), AffineTransformError> {
        if offset.iter().any(|value| !value.is_finite()) {
            return Err(AffineTransformError::NonFiniteValue);
        }
        for (row, value) in self.rows.iter_mut().zip(offset) {
            row[3] = value;
        }
        Ok(())
    }

    /// Image of the unit vector along `axis`, without translation.
    pub fn axis(&self, axis: usize) -> [f64; 3] {
        [self.rows[0][axis], self.rows[1][axis], self.rows[2][axis]]
    }

    pub fn apply(&self, point: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (target, row) in out.iter_mut().zip(&self.rows) {
            *target = row[0] * point[0] + row[1] * point[1] + row[2] * point[2] + row[3];
        }
        out
    }

    /// Returns `self ∘ other`.
    pub fn concatenate(&self, other: &Self) -> Self {
        multiply(self, other)
    }

    /// Returns `other ∘ self`.
    pub fn pre_concatenate(&self, other: &Self) -> Self {
        multiply(other, self)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.rows;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    pub fn inverse(&self) -> Result<Self, AffineTransformError> {
        let det = self.determinant();
        if !det.is_finite() {
            return Err(AffineTransformError::NonFiniteValue);
        }
        // Singularity is judged against the size of the linear part, so
        // uniformly tiny or huge transforms stay invertible.
        let scale = self
            .rows
            .iter()
            .flat_map(|row| &row[..3])
            .fold(0.0_f64, |max, value| max.max(value.abs()));
        if det.abs() <= f64::EPSILON * scale.powi(3) {
            return Err(AffineTransformError::Singular);
        }

        let m = &self.rows;
        let mut linear = [[0.0; 3]; 3];
        linear[0][0] = (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det;
        linear[0][1] = (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det;
        linear[0][2] = (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det;
        linear[1][0] = (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det;
        linear[1][1] = (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det;
        linear[1][2] = (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det;
        linear[2][0] = (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det;
        linear[2][1] = (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det;
        linear[2][2] = (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det;

        let translation = self.translation_part();
        let mut rows = [[0.0; 4]; 3];
        for (row_index, row) in rows.iter_mut().enumerate() {
            row[..3].copy_from_slice(&linear[row_index]);
            row[3] = -(linear[row_index][0] * translation[0]
                + linear[row_index][1] * translation[1]
                + linear[row_index][2] * translation[2]);
        }
        Self::from_rows(rows)
    }

    /// Scales about a fixed screen point, keeping that point in place.
    pub fn zoom_about_point(
        &self,
        zoom_factor: f64,
        point_x: f64,
        point_y: f64,
    ) -> Result<Self, AffineTransformError> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(AffineTransformError::InvalidScale);
        }
        if !point_x.is_finite() || !point_y.is_finite() {
            return Err(AffineTransformError::NonFiniteValue);
        }
        let to_origin = Self::translation([-point_x, -point_y, 0.0])?;
        let zoom = Self::scaling(zoom_factor, zoom_factor, zoom_factor)?;
        let back = Self::translation([point_x, point_y, 0.0])?;
        let zoomed = self.pre_concatenate(&to_origin).pre_concatenate(&zoom);
        Self::from_rows(zoomed.pre_concatenate(&back).rows)
    }
}

fn multiply(left: &AffineTransform3d, right: &AffineTransform3d) -> AffineTransform3d {
    let a = &left.rows;
    let b = &right.rows;
    let mut rows = [[0.0; 4]; 3];
    for row in 0..3 {
        for column in 0..4 {
            let mut value = a[row][0] * b[0][column]
                + a[row][1] * b[1][column]
                + a[row][2] * b[2][column];
            if column == 3 {
                value += a[row][3];
            }
            rows[row][column] = value;
        }
    }
    AffineTransform3d { rows }
}
