//! Log-space forward-backward and Viterbi recursions.
//!
//! These are the generic HMM primitives: they know nothing about tying and
//! operate on whatever (expanded) start vector, transition matrix and
//! emission log-likelihoods they are given. Structural zeros in the
//! transition matrix are `-inf` in log space and stay impossible.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thmm_common::{Error, Result};
use thmm_math::{log_prob, log_sum_exp};

/// Output of one forward-backward pass over a single sequence.
#[derive(Debug, Clone)]
pub struct Posteriors {
    /// Total log-likelihood `log p(x_1..x_T)`.
    pub log_likelihood: f64,
    /// State occupancies `γ[t, i]`, shape `(T, K)`.
    pub gamma: Array2<f64>,
    /// Expected transition counts `Σ_t ξ_t[i, j]`, shape `(K, K)`.
    pub xi_sum: Array2<f64>,
}

fn check_shapes(start: &ArrayView1<f64>, trans: &ArrayView2<f64>, log_emission: &ArrayView2<f64>) -> Result<()> {
    let k = start.len();
    if trans.dim() != (k, k) {
        return Err(Error::shape(
            "transition matrix",
            format!("({k}, {k})"),
            format!("{:?}", trans.shape()),
        ));
    }
    if log_emission.ncols() != k {
        return Err(Error::shape(
            "emission log-probabilities",
            format!("{k} columns"),
            format!("{:?}", log_emission.shape()),
        ));
    }
    if log_emission.nrows() == 0 {
        return Err(Error::EmptyObservations);
    }
    Ok(())
}

/// Forward pass, returning `log α` of shape `(T, K)`.
fn forward(log_start: &Array1<f64>, log_trans: &Array2<f64>, log_emission: ArrayView2<f64>) -> Array2<f64> {
    let (t_len, k) = log_emission.dim();
    let mut alpha = Array2::from_elem((t_len, k), f64::NEG_INFINITY);
    let mut work = vec![0.0; k];

    for j in 0..k {
        alpha[[0, j]] = log_start[j] + log_emission[[0, j]];
    }
    for t in 1..t_len {
        for j in 0..k {
            for i in 0..k {
                work[i] = alpha[[t - 1, i]] + log_trans[[i, j]];
            }
            alpha[[t, j]] = log_sum_exp(&work) + log_emission[[t, j]];
        }
    }
    alpha
}

/// Backward pass, returning `log β` of shape `(T, K)`.
fn backward(log_trans: &Array2<f64>, log_emission: ArrayView2<f64>) -> Array2<f64> {
    let (t_len, k) = log_emission.dim();
    let mut beta = Array2::zeros((t_len, k));
    let mut work = vec![0.0; k];

    for t in (0..t_len.saturating_sub(1)).rev() {
        for i in 0..k {
            for j in 0..k {
                work[j] = log_trans[[i, j]] + log_emission[[t + 1, j]] + beta[[t + 1, j]];
            }
            beta[[t, i]] = log_sum_exp(&work);
        }
    }
    beta
}

/// Posterior state occupancies and expected transition counts.
///
/// Fails with [`Error::Numerical`] when the sequence has zero probability
/// under the model.
pub fn forward_backward(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    log_emission: ArrayView2<f64>,
) -> Result<Posteriors> {
    check_shapes(&startprob, &transmat, &log_emission)?;
    let log_start = startprob.mapv(log_prob);
    let log_trans = transmat.mapv(log_prob);

    let alpha = forward(&log_start, &log_trans, log_emission);
    let beta = backward(&log_trans, log_emission);

    let (t_len, k) = log_emission.dim();
    let log_likelihood = total_likelihood(&alpha)?;

    let gamma = (&alpha + &beta).mapv(|v| (v - log_likelihood).exp());

    let mut xi_sum = Array2::zeros((k, k));
    for t in 0..t_len - 1 {
        for i in 0..k {
            let a = alpha[[t, i]];
            if a == f64::NEG_INFINITY {
                continue;
            }
            for j in 0..k {
                let lt = log_trans[[i, j]];
                if lt == f64::NEG_INFINITY {
                    continue;
                }
                xi_sum[[i, j]] +=
                    (a + lt + log_emission[[t + 1, j]] + beta[[t + 1, j]] - log_likelihood).exp();
            }
        }
    }

    Ok(Posteriors {
        log_likelihood,
        gamma,
        xi_sum,
    })
}

/// Log-likelihood only (forward pass). Same failure contract as
/// [`forward_backward`].
pub fn log_likelihood(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    log_emission: ArrayView2<f64>,
) -> Result<f64> {
    check_shapes(&startprob, &transmat, &log_emission)?;
    let alpha = forward(&startprob.mapv(log_prob), &transmat.mapv(log_prob), log_emission);
    total_likelihood(&alpha)
}

fn total_likelihood(alpha: &Array2<f64>) -> Result<f64> {
    let last = alpha.index_axis(Axis(0), alpha.nrows() - 1).to_vec();
    let log_likelihood = log_sum_exp(&last);
    if !log_likelihood.is_finite() {
        return Err(Error::Numerical(format!(
            "observation sequence has likelihood {log_likelihood} under the current parameters"
        )));
    }
    Ok(log_likelihood)
}

/// Most likely state path and its joint log-probability.
pub fn viterbi(
    startprob: ArrayView1<f64>,
    transmat: ArrayView2<f64>,
    log_emission: ArrayView2<f64>,
) -> Result<(f64, Vec<usize>)> {
    check_shapes(&startprob, &transmat, &log_emission)?;
    let log_trans = transmat.mapv(log_prob);
    let (t_len, k) = log_emission.dim();

    let mut delta = Array2::from_elem((t_len, k), f64::NEG_INFINITY);
    let mut backptr = Array2::<usize>::zeros((t_len, k));
    for j in 0..k {
        delta[[0, j]] = log_prob(startprob[j]) + log_emission[[0, j]];
    }
    for t in 1..t_len {
        for j in 0..k {
            let (best_i, best) = (0..k)
                .map(|i| (i, delta[[t - 1, i]] + log_trans[[i, j]]))
                .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
            delta[[t, j]] = best + log_emission[[t, j]];
            backptr[[t, j]] = best_i;
        }
    }

    let (mut state, log_prob_path) = delta
        .row(t_len - 1)
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
    if !log_prob_path.is_finite() {
        return Err(Error::Numerical(
            "no state path has positive probability".into(),
        ));
    }

    let mut path = vec![0; t_len];
    path[t_len - 1] = state;
    for t in (1..t_len).rev() {
        state = backptr[[t, state]];
        path[t - 1] = state;
    }
    Ok((log_prob_path, path))
}
