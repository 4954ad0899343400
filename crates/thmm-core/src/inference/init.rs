//! Data-driven starting values for the emission parameters.
//!
//! Means come from Lloyd's k-means seeded with distinct observations drawn
//! from the estimator RNG; spreads come from the pooled data covariance.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::index::sample;
use rand::Rng;
use thmm_common::{Error, Result};
use thmm_math::linalg::spd_inverse;

/// Maximum Lloyd iterations.
const KMEANS_MAX_ITER: usize = 100;

fn squared_distance(a: ndarray::ArrayView1<f64>, b: ndarray::ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Cluster centres of `obs`, shape `(k, F)`.
///
/// Centres that lose every point keep their previous position. When there
/// are fewer distinct rows than `k`, some centres coincide.
pub fn kmeans<R: Rng + ?Sized>(obs: ArrayView2<f64>, k: usize, rng: &mut R) -> Result<Array2<f64>> {
    let (t_len, f) = obs.dim();
    if t_len == 0 {
        return Err(Error::EmptyObservations);
    }
    if k == 0 {
        return Err(Error::Configuration("k-means needs at least one cluster".into()));
    }

    let mut centres = Array2::zeros((k, f));
    let seeds: Vec<usize> = if t_len >= k {
        sample(rng, t_len, k).into_vec()
    } else {
        (0..k).map(|c| c % t_len).collect()
    };
    for (c, &row) in seeds.iter().enumerate() {
        centres.row_mut(c).assign(&obs.row(row));
    }

    let mut labels = vec![usize::MAX; t_len];
    for _ in 0..KMEANS_MAX_ITER {
        let mut changed = false;
        for (t, x) in obs.outer_iter().enumerate() {
            let nearest = centres
                .outer_iter()
                .map(|c| squared_distance(x, c))
                .enumerate()
                .fold((0, f64::INFINITY), |acc, cur| if cur.1 < acc.1 { cur } else { acc })
                .0;
            if labels[t] != nearest {
                labels[t] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = Array2::<f64>::zeros((k, f));
        let mut counts = vec![0usize; k];
        for (x, &label) in obs.outer_iter().zip(labels.iter()) {
            let mut row = sums.row_mut(label);
            row += &x;
            counts[label] += 1;
        }
        for (c, &n) in counts.iter().enumerate() {
            if n > 0 {
                let mean = sums.row(c).mapv(|v| v / n as f64);
                centres.row_mut(c).assign(&mean);
            }
        }
    }
    Ok(centres)
}

/// Per-feature variance of all observations (maximum likelihood).
pub fn pooled_variance(obs: ArrayView2<f64>) -> Result<Array1<f64>> {
    if obs.nrows() == 0 {
        return Err(Error::EmptyObservations);
    }
    let var = obs.var_axis(Axis(0), 0.0);
    if let Some((j, v)) = var.iter().enumerate().find(|(_, v)| !(v.is_finite() && **v > 0.0)) {
        return Err(Error::Numerical(format!(
            "observations have variance {v} in feature {j}; cannot initialise spreads"
        )));
    }
    Ok(var)
}

/// Covariance matrix of all observations (maximum likelihood).
pub fn pooled_covariance(obs: ArrayView2<f64>) -> Result<Array2<f64>> {
    let t_len = obs.nrows();
    let mean = obs.mean_axis(Axis(0)).ok_or(Error::EmptyObservations)?;
    let centred = &obs - &mean;
    Ok(centred.t().dot(&centred) / t_len as f64)
}

/// Inverse of the pooled covariance, the starting precision of every state.
pub fn pooled_precision(obs: ArrayView2<f64>) -> Result<Array2<f64>> {
    let cov = pooled_covariance(obs)?;
    spd_inverse(cov.view()).ok_or_else(|| Error::NotPositiveDefinite {
        name: "pooled covariance".into(),
        state: 0,
    })
}
