//! Numeric kernels shared by the attention, encoder and decoder layers.
//!
//! All kernels operate on `ndarray` containers along the last axis and are
//! numerically stabilized: softmax subtracts the lane maximum, sigmoid
//! branches on sign, and normalization floors the denominator.

use ndarray::{Array, Array2, ArrayView1, ArrayView2, Axis, Dimension};

use crate::error::{Result, SurrogateError};

/// Epsilon added to the standard deviation in layer normalization.
pub const LAYER_NORM_EPS: f32 = 1e-6;

/// Negative slope of the leaky ReLU applied to graph attention logits.
pub const LEAKY_RELU_SLOPE: f32 = 0.01;

/// Element-wise ReLU in place.
pub fn relu_inplace<D: Dimension>(x: &mut Array<f32, D>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Leaky ReLU: `max(slope * x, x)`.
#[inline]
pub fn leaky_relu(x: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        LEAKY_RELU_SLOPE * x
    }
}

/// Sigmoid that never overflows and always lands in `[0, 1]`.
#[inline]
pub fn stable_sigmoid(x: f32) -> f32 {
    if x.is_nan() {
        return 0.5;
    }
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softmax over the last axis, in place.
///
/// Each lane has its maximum subtracted before exponentiation.
pub fn softmax_last_axis_inplace<D: Dimension>(x: &mut Array<f32, D>) {
    let last = Axis(x.ndim() - 1);
    for mut lane in x.lanes_mut(last) {
        let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            continue;
        }
        lane.mapv_inplace(|v| (v - max).exp());
        let sum = lane.sum();
        if sum > 0.0 {
            lane.mapv_inplace(|v| v / sum);
        }
    }
}

/// Layer normalization over the last axis, in place: `(x - mean) / (std + eps)`.
///
/// No learned gain or bias; population standard deviation.
pub fn layer_norm_inplace<D: Dimension>(x: &mut Array<f32, D>, eps: f32) {
    let last = Axis(x.ndim() - 1);
    for mut lane in x.lanes_mut(last) {
        let n = lane.len() as f32;
        if n == 0.0 {
            continue;
        }
        let mean = lane.sum() / n;
        let variance = lane.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / n;
        let denom = variance.sqrt() + eps;
        lane.mapv_inplace(|v| (v - mean) / denom);
    }
}

/// Segment softmax: normalize each column of `logits` independently within
/// the rows that share a segment id.
///
/// `logits` is `(num_items, num_heads)` and `segments[i]` is the segment of
/// row `i`. Segments with no rows are untouched, and rows sharing a segment
/// (e.g. duplicate edges) each get their own share.
///
/// # Errors
/// `DimensionMismatch` if `segments` does not have one entry per row, and
/// `InvalidAdjacency` if a segment id is `>= num_segments`.
pub fn segment_softmax(
    logits: ArrayView2<'_, f32>,
    segments: ArrayView1<'_, usize>,
    num_segments: usize,
) -> Result<Array2<f32>> {
    let (num_items, num_heads) = logits.dim();
    if segments.len() != num_items {
        return Err(SurrogateError::dimension_mismatch(
            format!("{num_items} segment ids"),
            format!("{} segment ids", segments.len()),
        ));
    }
    if let Some(edge) = segments.iter().position(|&seg| seg >= num_segments) {
        return Err(SurrogateError::InvalidAdjacency {
            edge,
            node: segments[edge],
            num_nodes: num_segments,
        });
    }

    let mut max = Array2::<f32>::from_elem((num_segments, num_heads), f32::NEG_INFINITY);
    for (row, &seg) in logits.outer_iter().zip(segments.iter()) {
        for (m, &v) in max.row_mut(seg).iter_mut().zip(row.iter()) {
            *m = m.max(v);
        }
    }

    let mut weights = Array2::<f32>::zeros((num_items, num_heads));
    let mut sums = Array2::<f32>::zeros((num_segments, num_heads));
    for ((mut out, row), &seg) in weights
        .outer_iter_mut()
        .zip(logits.outer_iter())
        .zip(segments.iter())
    {
        for h in 0..num_heads {
            let e = (row[h] - max[[seg, h]]).exp();
            out[h] = e;
            sums[[seg, h]] += e;
        }
    }

    for (mut out, &seg) in weights.outer_iter_mut().zip(segments.iter()) {
        for h in 0..num_heads {
            let s = sums[[seg, h]];
            if s > 0.0 {
                out[h] /= s;
            }
        }
    }

    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let mut x = array![[1.0_f32, 2.0, 3.0], [1000.0, 1000.0, -1000.0]];
        softmax_last_axis_inplace(&mut x);
        for row in x.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_abs_diff_eq!(x[[1, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(x[[1, 2]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_softmax_3d_last_axis() {
        let mut x = Array3::<f32>::zeros((2, 3, 4));
        softmax_last_axis_inplace(&mut x);
        assert!(x.iter().all(|&v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_layer_norm_zero_mean_unit_std() {
        let mut x = array![[1.0_f32, 2.0, 3.0, 4.0]];
        layer_norm_inplace(&mut x, LAYER_NORM_EPS);
        let row = x.row(0);
        assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-5);
        let var = row.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_layer_norm_constant_lane_is_finite() {
        let mut x = array![[5.0_f32, 5.0, 5.0]];
        layer_norm_inplace(&mut x, LAYER_NORM_EPS);
        assert!(x.iter().all(|v| v.is_finite() && v.abs() < 1e-3));
    }

    #[test]
    fn test_sigmoid_bounds() {
        for x in [-1e30_f32, -100.0, -1.0, 0.0, 1.0, 100.0, 1e30] {
            let s = stable_sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({x}) = {s}");
        }
        assert_abs_diff_eq!(stable_sigmoid(0.0), 0.5);
        assert_eq!(stable_sigmoid(f32::NAN), 0.5);
    }

    #[test]
    fn test_leaky_relu() {
        assert_eq!(leaky_relu(2.0), 2.0);
        assert_abs_diff_eq!(leaky_relu(-2.0), -0.02, epsilon = 1e-7);
    }

    #[test]
    fn test_segment_softmax_groups() {
        // rows 0,1 -> segment 1; row 2 -> segment 2; segment 0 empty
        let logits = array![[0.0_f32, 1.0], [0.0, 3.0], [5.0, -5.0]];
        let segments = array![1_usize, 1, 2];
        let w = segment_softmax(logits.view(), segments.view(), 3).unwrap();

        assert_abs_diff_eq!(w[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(w[[1, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(w[[0, 1]] + w[[1, 1]], 1.0, epsilon = 1e-6);
        assert!(w[[1, 1]] > w[[0, 1]]);
        assert_abs_diff_eq!(w[[2, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w[[2, 1]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_segment_softmax_rejects_bad_segments() {
        let logits = array![[0.0_f32], [1.0]];

        let short = array![0_usize];
        let err = segment_softmax(logits.view(), short.view(), 2).unwrap_err();
        assert!(matches!(err, SurrogateError::DimensionMismatch { .. }));

        let out_of_range = array![0_usize, 2];
        let err = segment_softmax(logits.view(), out_of_range.view(), 2).unwrap_err();
        assert_eq!(
            err,
            SurrogateError::InvalidAdjacency {
                edge: 1,
                node: 2,
                num_nodes: 2
            }
        );
    }
}
