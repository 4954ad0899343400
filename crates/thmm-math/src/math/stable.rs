//! Numerically stable primitives for log-domain HMM recursions.

/// ln(2*pi).
pub const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Stable log(sum(exp(values))).
///
/// Returns NEG_INFINITY for empty input or all -inf inputs.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let mut sum = 0.0;
    for v in values {
        sum += (*v - max).exp();
    }
    max + sum.ln()
}

/// Log of a probability, mapping exact zeros to NEG_INFINITY.
///
/// Structural zeros of the tied transition matrix must stay impossible in
/// the log domain instead of becoming a large negative finite number.
pub fn log_prob(p: f64) -> f64 {
    if p <= 0.0 {
        f64::NEG_INFINITY
    } else {
        p.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
        if a.is_nan() || b.is_nan() {
            return false;
        }
        (a - b).abs() <= tol
    }

    #[test]
    fn log_sum_exp_basic() {
        let v = [0.0, 0.0];
        let out = log_sum_exp(&v);
        assert!(approx_eq(out, 2.0f64.ln(), 1e-12));
    }

    #[test]
    fn log_sum_exp_dominance() {
        let v = [-1000.0, 0.0];
        let out = log_sum_exp(&v);
        assert!(approx_eq(out, 0.0, 1e-12));
    }

    #[test]
    fn log_sum_exp_all_neg_inf() {
        let v = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        let out = log_sum_exp(&v);
        assert!(out.is_infinite() && out.is_sign_negative());
    }

    #[test]
    fn log_sum_exp_ignores_impossible_terms() {
        let v = [f64::NEG_INFINITY, 0.5f64.ln(), 0.25f64.ln()];
        assert!(approx_eq(log_sum_exp(&v), 0.75f64.ln(), 1e-12));
    }

    #[test]
    fn log_sum_exp_nan_propagates() {
        let out = log_sum_exp(&[0.0, f64::NAN]);
        assert!(out.is_nan());
    }

    #[test]
    fn log_prob_zero_is_impossible() {
        assert_eq!(log_prob(0.0), f64::NEG_INFINITY);
        assert!(approx_eq(log_prob(1.0), 0.0, 1e-15));
        assert!(approx_eq(LN_2PI, (2.0 * std::f64::consts::PI).ln(), 1e-15));
    }
}
