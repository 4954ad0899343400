//! Row/axis normalization of probability vectors and matrices.

use ndarray::{ArrayBase, Axis, DataMut, Dimension, RemoveAxis};

/// Rescale every lane of `a` along `axis` so that it sums to 1, in place.
///
/// Lanes summing to zero are left untouched so that structurally empty rows
/// of a transition matrix stay empty instead of turning into NaN.
pub fn normalize<S, D>(a: &mut ArrayBase<S, D>, axis: Axis)
where
    S: DataMut<Elem = f64>,
    D: Dimension + RemoveAxis,
{
    for mut lane in a.lanes_mut(axis) {
        let sum: f64 = lane.sum();
        if sum != 0.0 {
            lane.mapv_inplace(|v| v / sum);
        }
    }
}

/// Whether every lane along `axis` sums to 1 within `tol`.
pub fn is_stochastic<S, D>(a: &ArrayBase<S, D>, axis: Axis, tol: f64) -> bool
where
    S: ndarray::Data<Elem = f64>,
    D: Dimension + RemoveAxis,
{
    a.iter().all(|v| v.is_finite() && *v >= 0.0)
        && a.lanes(axis).into_iter().all(|lane| (lane.sum() - 1.0).abs() <= tol)
}
