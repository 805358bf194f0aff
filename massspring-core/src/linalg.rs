//! Small vector helpers and the dense solve used by the implicit schemes.

use glam::{DMat3, DVec3};
use nalgebra::{DMatrix, DVector};

/// Spatial dimension of every point in the system.
pub const DIM: usize = 3;

/// A point or vector in 3D space.
pub type Point = DVec3;

/// Outer product `a bᵀ`.
pub fn outer(a: DVec3, b: DVec3) -> DMat3 {
    DMat3::from_cols(a * b.x, a * b.y, a * b.z)
}

/// Reads the 3-vector stored at block `index` of a flat slice.
pub fn block(values: &[f64], index: usize) -> DVec3 {
    DVec3::from_slice(&values[index * DIM..(index + 1) * DIM])
}

/// Writes a 3-vector into block `index` of a flat slice.
pub fn set_block(values: &mut [f64], index: usize, v: DVec3) {
    v.write_to_slice(&mut values[index * DIM..(index + 1) * DIM]);
}

/// Adds a 3x3 block into a dense matrix with its top-left corner at `(row, col)`.
pub fn add_block(matrix: &mut DMatrix<f64>, row: usize, col: usize, m: DMat3) {
    for c in 0..DIM {
        let column = m.col(c);
        for r in 0..DIM {
            matrix[(row + r, col + c)] += column[r];
        }
    }
}

/// `y + alpha * x`, elementwise.
pub fn axpy(y: &[f64], alpha: f64, x: &[f64]) -> Vec<f64> {
    y.iter().zip(x).map(|(&yi, &xi)| yi + alpha * xi).collect()
}

/// Euclidean norm of a flat vector.
pub fn norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Solves the dense system `matrix · x = rhs` by LU decomposition with partial pivoting.
///
/// Returns `None` if the matrix is singular.
pub fn solve_dense(matrix: DMatrix<f64>, rhs: &[f64]) -> Option<Vec<f64>> {
    let b = DVector::from_column_slice(rhs);
    matrix.lu().solve(&b).map(|x| x.iter().copied().collect())
}
