//! Canonical cube normalisation of point coordinates.
use ndarray::{Array2, ArrayD};

use crate::constants::PSR_PADDING;

/// Maps mesh-space coordinates into the unit-cube-relative range used by
/// the PSR grids: `p / 2 / padding + 0.5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalCube {
    pub padding: f32,
}

impl CanonicalCube {
    pub fn new(padding: f32) -> Self {
        Self { padding }
    }

    /// Cube with the fixed PSR padding
    pub fn psr() -> Self {
        Self::new(PSR_PADDING)
    }

    /// Normalise a single coordinate
    pub fn normalize(&self, value: f32) -> f32 {
        value / 2.0 / self.padding + 0.5
    }

    /// Normalise a point list in place
    pub fn normalize_points(&self, points: &mut [[f32; 3]]) {
        for point in points {
            for value in point.iter_mut() {
                *value = self.normalize(*value);
            }
        }
    }

    /// Normalise every coordinate of an array
    pub fn normalize_array(&self, array: &ArrayD<f32>) -> ArrayD<f32> {
        array.mapv(|v| self.normalize(v))
    }
}

impl Default for CanonicalCube {
    fn default() -> Self {
        Self::psr()
    }
}

/// Map PSR-style point inputs into `(0, 1)`: `p / scale + 0.5`.
pub fn rescale(array: &ArrayD<f32>, scale: f32) -> ArrayD<f32> {
    array.mapv(|v| v / scale + 0.5)
}

/// Pack `[x, y, z]` rows into an `[N, 3]` array.
pub fn points_to_array(points: &[[f32; 3]]) -> Array2<f32> {
    Array2::from_shape_fn((points.len(), 3), |(i, j)| points[i][j])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn psr_cube_maps_padded_extent_to_unit_range() {
        let cube = CanonicalCube::psr();
        assert!((cube.normalize(-PSR_PADDING) - 0.0).abs() < 1e-6);
        assert!((cube.normalize(PSR_PADDING) - 1.0).abs() < 1e-6);
        assert_eq!(cube.normalize(0.0), 0.5);
    }

    #[test]
    fn rescale_is_elementwise() {
        let points = arr2(&[[0.6f32, -0.6, 0.0]]).into_dyn();
        let scaled = rescale(&points, 1.2);
        let expected = [1.0f32, 0.0, 0.5];
        for (got, want) in scaled.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }
}
