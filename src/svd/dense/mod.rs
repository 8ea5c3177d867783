use anyhow::anyhow;
use ndarray::{Array1, Array2, ArrayView2};

use crate::dense::{to_nalgebra, to_ndarray};

pub struct SVD {
    u: Array2<f64>,
    s: Array1<f64>,
    vt: Array2<f64>,
}

impl SVD {
    /// Thin SVD of `array`, singular triplets ordered by decreasing value.
    pub fn new(array: &ArrayView2<f64>) -> anyhow::Result<Self> {
        let matrix = to_nalgebra(array.view());
        let svd = nalgebra::linalg::SVD::new(matrix, true, true);

        let u = svd.u.ok_or_else(|| anyhow!("SVD did not produce U"))?;
        let vt = svd.v_t.ok_or_else(|| anyhow!("SVD did not produce V^T"))?;
        let u = to_ndarray(u);
        let vt = to_ndarray(vt);
        let s: Vec<f64> = svd.singular_values.iter().cloned().collect();

        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

        let mut sorted_u = Array2::zeros(u.dim());
        let mut sorted_vt = Array2::zeros(vt.dim());
        let mut sorted_s = Array1::zeros(s.len());
        for (i, &idx) in order.iter().enumerate() {
            sorted_s[i] = s[idx];
            sorted_u.column_mut(i).assign(&u.column(idx));
            sorted_vt.row_mut(i).assign(&vt.row(idx));
        }

        Ok(SVD {
            u: sorted_u,
            s: sorted_s,
            vt: sorted_vt,
        })
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn s(&self) -> &Array1<f64> {
        &self.s
    }

    pub fn vt(&self) -> &Array2<f64> {
        &self.vt
    }

    pub fn into_parts(self) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        (self.u, self.s, self.vt)
    }

    // Reconstruct the original matrix
    pub fn reconstruct(&self) -> Array2<f64> {
        let s_diag = Array2::from_diag(&self.s);
        self.u.dot(&s_diag).dot(&self.vt)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    use super::*;

    #[test]
    fn test_simple_svd() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let svd = SVD::new(&a.view()).unwrap();
        let s = svd.s();
        let vt = svd.vt();
        let u = svd.u();

        assert_eq!(u.shape(), &[2, 2]);
        assert_eq!(s.len(), 2);
        assert_eq!(vt.shape(), &[2, 2]);

        assert_abs_diff_eq!(s[0], 5.4649857, epsilon = 1e-6);
        assert_abs_diff_eq!(s[1], 0.3659662, epsilon = 1e-6);

        let reconstructed = svd.reconstruct();
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(reconstructed[[i, j]], a[[i, j]], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_rectangular_svd_is_thin() {
        let a = array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0]];
        let svd = SVD::new(&a.view()).unwrap();
        assert_eq!(svd.u().shape(), &[2, 2]);
        assert_eq!(svd.s().len(), 2);
        assert_eq!(svd.vt().shape(), &[2, 3]);
        assert!(svd.s()[0] >= svd.s()[1]);

        let reconstructed = svd.reconstruct();
        for (x, y) in reconstructed.iter().zip(a.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }
}
