//! Sinusoidal position encoding with a precomputed table.
//!
//! ```text
//! PE[pos, 2i]     = sin(pos · ω_i)
//! PE[pos, 2i + 1] = cos(pos · ω_i)
//! ω_i = exp(-(2i) · ln(10000) / d_model)
//! ```
//!
//! Odd widths are supported: the final column is a sine with no cosine partner.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{Result, SurrogateError};

/// Base of the frequency progression.
pub const POSITIONAL_BASE: f64 = 10_000.0;

/// Additive sinusoidal position table `(max_len, d_model)`.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    table: Array2<f32>,
}

impl PositionalEncoding {
    /// Precompute the table for positions `0..max_len`.
    pub fn new(d_model: usize, max_len: usize) -> Result<Self> {
        if d_model == 0 || max_len == 0 {
            return Err(SurrogateError::Config(format!(
                "positional encoding needs d_model > 0 and max_len > 0 \
                 (d_model={d_model}, max_len={max_len})"
            )));
        }

        let log_base = POSITIONAL_BASE.ln();
        let table = Array2::from_shape_fn((max_len, d_model), |(pos, col)| {
            let pair = (col / 2) as f64;
            let omega = (-(2.0 * pair) * log_base / d_model as f64).exp();
            let angle = pos as f64 * omega;
            if col % 2 == 0 {
                angle.sin() as f32
            } else {
                angle.cos() as f32
            }
        });

        Ok(Self { table })
    }

    /// Model width
    pub fn d_model(&self) -> usize {
        self.table.ncols()
    }

    /// Largest supported sequence length
    pub fn max_len(&self) -> usize {
        self.table.nrows()
    }

    /// The first `len` rows of the table.
    pub fn table(&self, len: usize) -> Result<ArrayView2<'_, f32>> {
        if len > self.max_len() {
            return Err(SurrogateError::SequenceTooLong {
                len,
                max_len: self.max_len(),
            });
        }
        Ok(self.table.slice(s![..len, ..]))
    }

    /// Add position encodings to `(B, L, d_model)`.
    pub fn apply(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (_, len, width) = x.dim();
        self.check_width(width)?;
        let table = self.table(len)?;

        let mut out = x.to_owned();
        for mut item in out.axis_iter_mut(Axis(0)) {
            item += &table;
        }
        Ok(out)
    }

    /// Add position encodings to a single unbatched sequence `(L, d_model)`.
    pub fn apply_2d(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        self.check_width(x.ncols())?;
        let table = self.table(x.nrows())?;
        Ok(&x + &table)
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.d_model() {
            return Err(SurrogateError::dimension_mismatch(
                format!("width {}", self.d_model()),
                format!("width {width}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_table_values() {
        let pe = PositionalEncoding::new(8, 16).unwrap();
        let table = pe.table(16).unwrap();

        // position 0: sin(0) = 0, cos(0) = 1
        for col in 0..8 {
            let expected = if col % 2 == 0 { 0.0_f32 } else { 1.0 };
            assert_abs_diff_eq!(table[[0, col]], expected, epsilon = 1e-7);
        }
        // first pair has ω = 1
        assert_abs_diff_eq!(table[[3, 0]], 3.0_f32.sin(), epsilon = 1e-6);
        assert_abs_diff_eq!(table[[3, 1]], 3.0_f32.cos(), epsilon = 1e-6);
        // second pair has ω = 10000^(-2/8) = 0.1
        assert_abs_diff_eq!(table[[5, 2]], 0.5_f32.sin(), epsilon = 1e-6);
    }

    #[test]
    fn test_odd_width() {
        let pe = PositionalEncoding::new(5, 4).unwrap();
        let table = pe.table(4).unwrap();
        assert_eq!(table.dim(), (4, 5));
        let omega = (-(4.0_f64) * POSITIONAL_BASE.ln() / 5.0).exp();
        assert_abs_diff_eq!(table[[2, 4]], (2.0 * omega).sin() as f32, epsilon = 1e-6);
    }

    #[test]
    fn test_apply_broadcasts_over_batch() {
        let pe = PositionalEncoding::new(4, 10).unwrap();
        let x = Array3::<f32>::zeros((3, 6, 4));
        let out = pe.apply(x.view()).unwrap();
        let table = pe.table(6).unwrap();
        for item in out.axis_iter(Axis(0)) {
            assert_eq!(item, table);
        }
    }

    #[test]
    fn test_sequence_too_long() {
        let pe = PositionalEncoding::new(128, 1000).unwrap();
        assert!(pe.apply_2d(Array2::zeros((1000, 128)).view()).is_ok());

        let err = pe.apply_2d(Array2::zeros((1001, 128)).view()).unwrap_err();
        assert_eq!(
            err,
            SurrogateError::SequenceTooLong {
                len: 1001,
                max_len: 1000
            }
        );
    }

    #[test]
    fn test_width_mismatch() {
        let pe = PositionalEncoding::new(16, 8).unwrap();
        let err = pe.apply(Array3::zeros((1, 4, 8)).view()).unwrap_err();
        assert!(matches!(err, SurrogateError::DimensionMismatch { .. }));
    }
}
