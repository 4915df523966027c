//! Boundary to the external differentiable Poisson solver.
//!
//! The solver turns oriented point samples in `[0, 1]^3` into a dense
//! `res^3` indicator grid. Its numerics live outside this crate; fields only
//! depend on this trait.

use ndarray::{Array3, ArrayView2};

use crate::error::{FieldError, Result};

/// Grid computation operator consumed by [`crate::fields::FullPsrFieldAbc`].
pub trait PsrSolver: Send + Sync {
    /// Compute a `resolution^3` grid from `[N, 3]` points and normals.
    fn solve(
        &self,
        points: ArrayView2<'_, f32>,
        normals: ArrayView2<'_, f32>,
        resolution: usize,
    ) -> Result<Array3<f32>>;
}

impl<F> PsrSolver for F
where
    F: Fn(ArrayView2<'_, f32>, ArrayView2<'_, f32>, usize) -> Result<Array3<f32>> + Send + Sync,
{
    fn solve(
        &self,
        points: ArrayView2<'_, f32>,
        normals: ArrayView2<'_, f32>,
        resolution: usize,
    ) -> Result<Array3<f32>> {
        self(points, normals, resolution)
    }
}

/// Run `solver` and check the grid it returns is `resolution^3`.
pub fn solve_checked(
    solver: &dyn PsrSolver,
    points: ArrayView2<'_, f32>,
    normals: ArrayView2<'_, f32>,
    resolution: usize,
) -> Result<Array3<f32>> {
    if points.shape() != normals.shape() || points.ncols() != 3 {
        return Err(FieldError::ShapeMismatch {
            expected: vec![points.nrows(), 3],
            got: normals.shape().to_vec(),
        });
    }

    let grid = solver.solve(points, normals, resolution)?;
    let expected = [resolution, resolution, resolution];
    if grid.shape() != expected.as_slice() {
        return Err(FieldError::ShapeMismatch {
            expected: expected.to_vec(),
            got: grid.shape().to_vec(),
        });
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn closures_act_as_solvers() {
        let solver = |_: ArrayView2<'_, f32>,
                      _: ArrayView2<'_, f32>,
                      res: usize|
         -> Result<Array3<f32>> { Ok(Array3::<f32>::ones((res, res, res))) };
        let pts = Array2::<f32>::zeros((5, 3));
        let grid = solve_checked(&solver, pts.view(), pts.view(), 4).unwrap();
        assert_eq!(grid.shape(), &[4, 4, 4]);
    }

    #[test]
    fn wrong_resolution_is_rejected() {
        let solver = |_: ArrayView2<'_, f32>,
                      _: ArrayView2<'_, f32>,
                      _: usize|
         -> Result<Array3<f32>> { Ok(Array3::<f32>::zeros((2, 2, 2))) };
        let pts = Array2::<f32>::zeros((5, 3));
        let err = solve_checked(&solver, pts.view(), pts.view(), 8).unwrap_err();
        assert!(matches!(err, FieldError::ShapeMismatch { .. }));
    }
}
