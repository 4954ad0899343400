//! The tied-state Gaussian HMM estimator.
//!
//! [`TiedHmm`] owns the unique-space parameters. Every pass expands them
//! through the [`TiedLayout`], runs the log-space recursions over the
//! expanded lattice, and folds the expected statistics back per unique
//! state before the M-step.
//!
//! All setters validate their input completely before assigning, so a
//! failed call leaves the estimator unchanged. An estimator instance is not
//! meant to be trained from several callers at once.

use super::emission::{broadcast_variances, Covariance, EmissionModel};
use super::expand::{Reduction, TiedLayout};
use super::forward_backward::{forward_backward, log_likelihood, viterbi};
use super::init::{kmeans, pooled_precision, pooled_variance};
use super::priors::{coerce_means, PriorStore};
use crate::config::ThmmConfig;
use crate::logging::{event_names, Stage};
use ndarray::{s, Array1, Array2, Array3, ArrayView, ArrayView1, ArrayView2, ArrayView3, Axis, Dimension, Ix1, Ix2};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thmm_common::{CovarianceKind, Error, ParamKind, ParamsMask, Result};
use thmm_math::dirichlet::{map_estimate, DirichletParams};
use thmm_math::is_stochastic;
use thmm_math::linalg::spd_inverse;

/// Occupancy plus prior weight below which a state keeps its parameters.
pub const MIN_OCCUPANCY: f64 = 1e-10;

/// Tolerance for probability vectors passed to setters.
const PROBABILITY_TOL: f64 = 1e-8;

/// Log-likelihood trajectory of one `fit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// E-steps performed.
    pub iterations: usize,
    /// Log-likelihood of the data before each M-step.
    pub log_likelihoods: Vec<f64>,
    /// Whether the gain dropped below `tol` before `n_iter` ran out.
    pub converged: bool,
}

impl FitReport {
    pub fn final_log_likelihood(&self) -> Option<f64> {
        self.log_likelihoods.last().copied()
    }
}

/// Expected sufficient statistics accumulated over all sequences.
struct SufficientStats {
    log_likelihood: f64,
    /// Expanded start occupancies.
    start: Array1<f64>,
    /// Expanded transition counts.
    trans: Array2<f64>,
    /// Per unique state: `Σ γ`, `Σ γ x`, `Σ γ x xᵀ`.
    occupancy: Array1<f64>,
    obs_sum: Array2<f64>,
    obs_outer: Array3<f64>,
}

impl SufficientStats {
    fn new(layout: &TiedLayout, n_features: usize) -> Self {
        let k = layout.n_components();
        let n = layout.n_unique();
        Self {
            log_likelihood: 0.0,
            start: Array1::zeros(k),
            trans: Array2::zeros((k, k)),
            occupancy: Array1::zeros(n),
            obs_sum: Array2::zeros((n, n_features)),
            obs_outer: Array3::zeros((n, n_features, n_features)),
        }
    }
}

/// Row ranges of the individual sequences in a stacked observation array.
fn split_sequences(n_rows: usize, lengths: Option<&[usize]>) -> Result<Vec<Range<usize>>> {
    let Some(lengths) = lengths else {
        return Ok(vec![0..n_rows]);
    };
    if lengths.iter().any(|&l| l == 0) {
        return Err(Error::EmptyObservations);
    }
    let total: usize = lengths.iter().sum();
    if total != n_rows {
        return Err(Error::shape(
            "lengths",
            format!("sum {n_rows}"),
            format!("sum {total}"),
        ));
    }
    let mut start = 0;
    Ok(lengths
        .iter()
        .map(|&l| {
            let range = start..start + l;
            start += l;
            range
        })
        .collect())
}

/// Dirichlet MAP update that keeps `old` when the posterior has no mass.
fn dirichlet_update(
    prior: &DirichletParams,
    counts: ArrayView1<f64>,
    old: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let mass: f64 = prior
        .alpha
        .iter()
        .zip(counts.iter())
        .map(|(a, n)| (a - 1.0 + n).max(0.0))
        .sum();
    if mass < MIN_OCCUPANCY {
        return Ok(old.to_owned());
    }
    map_estimate(prior, &counts.to_vec())
        .ok_or_else(|| Error::Numerical("expected counts are not finite and non-negative".into()))
}

fn outer(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array2<f64> {
    let col = a.insert_axis(Axis(1));
    let row = b.insert_axis(Axis(0));
    &col * &row
}

/// Tied-state Gaussian hidden Markov model.
#[derive(Debug, Clone)]
pub struct TiedHmm {
    layout: TiedLayout,
    n_features: usize,
    n_iter: usize,
    tol: f64,
    params: ParamsMask,
    init_params: ParamsMask,
    default_advance: f64,
    startprob: Array1<f64>,
    transmat: Array2<f64>,
    advance: Array1<f64>,
    emission: EmissionModel,
    priors: PriorStore,
    rng: StdRng,
}

impl TiedHmm {
    /// Build an estimator with uniform start and transition probabilities,
    /// zero means and unit spreads.
    pub fn new(config: &ThmmConfig) -> Result<Self> {
        config.validate()?;
        let layout = TiedLayout::new(config.n_unique, config.n_tied)?;
        let n = config.n_unique;
        let f = config.n_features;

        let covariance = match config.covariance {
            CovarianceKind::Diagonal => Covariance::Diagonal(Array2::ones((n, f))),
            CovarianceKind::Full => {
                let mut p = Array3::zeros((n, f, f));
                for mut m in p.outer_iter_mut() {
                    m.diag_mut().fill(1.0);
                }
                Covariance::Full(p)
            }
        };

        Ok(Self {
            layout,
            n_features: f,
            n_iter: config.n_iter,
            tol: config.tol,
            params: config.params,
            init_params: config.init_params,
            default_advance: config.advance_prob,
            startprob: Array1::from_elem(n, 1.0 / n as f64),
            transmat: Array2::from_elem((n, n), 1.0 / n as f64),
            advance: Array1::from_elem(n, config.advance_prob),
            emission: EmissionModel::new(Array2::zeros((n, f)), covariance)?,
            priors: PriorStore::from_config(layout, f, &config.priors),
            rng: StdRng::seed_from_u64(config.seed()),
        })
    }

    /// Univariate diagonal model with default settings.
    pub fn with_states(n_unique: usize, n_tied: usize) -> Result<Self> {
        Self::new(&ThmmConfig::new(n_unique).with_n_tied(n_tied))
    }

    // ------------------------------------------------------------------
    // Shape and control accessors
    // ------------------------------------------------------------------

    pub fn layout(&self) -> &TiedLayout {
        &self.layout
    }

    pub fn n_unique(&self) -> usize {
        self.layout.n_unique()
    }

    pub fn n_tied(&self) -> usize {
        self.layout.n_tied()
    }

    pub fn n_components(&self) -> usize {
        self.layout.n_components()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn set_n_iter(&mut self, n_iter: usize) {
        self.n_iter = n_iter;
    }

    pub fn tol(&self) -> f64 {
        self.tol
    }

    pub fn set_tol(&mut self, tol: f64) -> Result<()> {
        if !tol.is_finite() || tol < 0.0 {
            return Err(Error::Configuration(format!(
                "tol must be finite and >= 0, got {tol}"
            )));
        }
        self.tol = tol;
        Ok(())
    }

    pub fn params(&self) -> ParamsMask {
        self.params
    }

    /// Select the parameter kinds updated by the M-step, e.g. `"st"`.
    pub fn set_params(&mut self, params: &str) -> Result<()> {
        self.params = params.parse()?;
        Ok(())
    }

    pub fn init_params(&self) -> ParamsMask {
        self.init_params
    }

    /// Select the parameter kinds re-initialised by `fit`; `""` keeps the
    /// current values.
    pub fn set_init_params(&mut self, init_params: &str) -> Result<()> {
        self.init_params = init_params.parse()?;
        Ok(())
    }

    pub fn covariance_kind(&self) -> CovarianceKind {
        self.emission.kind()
    }

    // ------------------------------------------------------------------
    // Unique-space parameters
    // ------------------------------------------------------------------

    pub fn startprob(&self) -> ArrayView1<'_, f64> {
        self.startprob.view()
    }

    pub fn set_startprob(&mut self, startprob: ArrayView1<f64>) -> Result<()> {
        let n = self.n_unique();
        if startprob.len() != n {
            return Err(Error::shape(
                "startprob",
                format!("({n},)"),
                format!("{:?}", startprob.shape()),
            ));
        }
        if !is_stochastic(&startprob, Axis(0), PROBABILITY_TOL) {
            return Err(Error::Configuration(
                "startprob must be non-negative and sum to 1".into(),
            ));
        }
        self.startprob = startprob.to_owned();
        Ok(())
    }

    pub fn transmat(&self) -> ArrayView2<'_, f64> {
        self.transmat.view()
    }

    pub fn set_transmat(&mut self, transmat: ArrayView2<f64>) -> Result<()> {
        let n = self.n_unique();
        if transmat.dim() != (n, n) {
            return Err(Error::shape(
                "transmat",
                format!("({n}, {n})"),
                format!("{:?}", transmat.shape()),
            ));
        }
        if !is_stochastic(&transmat, Axis(1), PROBABILITY_TOL) {
            return Err(Error::Configuration(
                "transmat rows must be non-negative and sum to 1".into(),
            ));
        }
        self.transmat = transmat.to_owned();
        Ok(())
    }

    /// Per unique state, the probability that an inner replica advances.
    pub fn advance_prob(&self) -> ArrayView1<'_, f64> {
        self.advance.view()
    }

    pub fn set_advance_prob(&mut self, advance: ArrayView1<f64>) -> Result<()> {
        let n = self.n_unique();
        if advance.len() != n {
            return Err(Error::shape(
                "advance_prob",
                format!("({n},)"),
                format!("{:?}", advance.shape()),
            ));
        }
        if let Some(a) = advance.iter().find(|a| !(**a > 0.0 && **a <= 1.0)) {
            return Err(Error::Configuration(format!(
                "advance_prob entries must lie in (0, 1], got {a}"
            )));
        }
        self.advance = advance.to_owned();
        Ok(())
    }

    /// Means, shape `(n_unique, n_features)`.
    pub fn mu(&self) -> ArrayView2<'_, f64> {
        self.emission.means()
    }

    /// Set means from `(n_unique,)` (one feature) or `(n_unique, n_features)`.
    pub fn set_mu<D: Dimension>(&mut self, mu: ArrayView<f64, D>) -> Result<()> {
        let means = coerce_means("mu", mu, self.n_unique(), self.n_features)?;
        self.emission = EmissionModel::new(means, self.emission.covariance().clone())?;
        Ok(())
    }

    /// Per-feature variances, shape `(n_unique, n_features)`.
    ///
    /// For full models this is the diagonal of each covariance matrix.
    pub fn var(&self) -> Array2<f64> {
        self.emission.variances()
    }

    /// Set diagonal variances from `(n_unique,)` (same variance for every
    /// feature) or `(n_unique, n_features)`. Switches to a diagonal model.
    pub fn set_var<D: Dimension>(&mut self, var: ArrayView<f64, D>) -> Result<()> {
        let n = self.n_unique();
        let f = self.n_features;
        let shape = var.shape().to_vec();
        let var = var.into_dyn();
        let diag = match var.ndim() {
            1 => var
                .into_dimensionality::<Ix1>()
                .ok()
                .filter(|v| v.len() == n)
                .map(|v| broadcast_variances(v, f)),
            2 => var
                .into_dimensionality::<Ix2>()
                .ok()
                .filter(|v| v.dim() == (n, f))
                .map(|v| v.to_owned()),
            _ => None,
        }
        .ok_or_else(|| {
            Error::shape("var", format!("({n},) or ({n}, {f})"), format!("shape {shape:?}"))
        })?;
        self.emission = EmissionModel::new(self.emission.means().to_owned(), Covariance::Diagonal(diag))?;
        Ok(())
    }

    /// Precision matrices, shape `(n_unique, F, F)`; `diag(1 / var)` for
    /// diagonal models.
    pub fn precision(&self) -> Array3<f64> {
        self.emission.precisions()
    }

    /// Set full precision matrices. Switches to a full model.
    pub fn set_precision(&mut self, precision: ArrayView3<f64>) -> Result<()> {
        self.emission = EmissionModel::new(
            self.emission.means().to_owned(),
            Covariance::Full(precision.to_owned()),
        )?;
        Ok(())
    }

    pub fn emission(&self) -> &EmissionModel {
        &self.emission
    }

    pub fn priors(&self) -> &PriorStore {
        &self.priors
    }

    /// Prior setters validate against `n_unique` themselves.
    pub fn priors_mut(&mut self) -> &mut PriorStore {
        &mut self.priors
    }

    // ------------------------------------------------------------------
    // Expanded views
    // ------------------------------------------------------------------

    pub fn expanded_startprob(&self) -> Result<Array1<f64>> {
        self.layout.expand_startprob(self.startprob.view())
    }

    pub fn expanded_transmat(&self) -> Result<Array2<f64>> {
        self.layout
            .expand_transmat(self.transmat.view(), self.advance.view())
    }

    pub fn expanded_mu_prior(&self) -> &Array2<f64> {
        self.priors.expanded_mu_prior()
    }

    pub fn expanded_precision_prior(&self) -> &Array3<f64> {
        self.priors.expanded_precision_prior()
    }

    // ------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------

    fn validate_observations(&self, obs: &ArrayView2<f64>) -> Result<()> {
        if obs.nrows() == 0 {
            return Err(Error::EmptyObservations);
        }
        if obs.ncols() != self.n_features {
            return Err(Error::shape(
                "observations",
                format!("{} columns", self.n_features),
                format!("{:?}", obs.shape()),
            ));
        }
        if obs.iter().any(|x| !x.is_finite()) {
            return Err(Error::Numerical("observations must be finite".into()));
        }
        Ok(())
    }

    /// Log-likelihood and expanded posteriors `(T, n_components)`.
    ///
    /// Pure: calling it twice on the same data gives identical results.
    pub fn score_samples(
        &self,
        obs: ArrayView2<f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(f64, Array2<f64>)> {
        self.validate_observations(&obs)?;
        let ranges = split_sequences(obs.nrows(), lengths)?;
        let start = self.expanded_startprob()?;
        let trans = self.expanded_transmat()?;
        let log_e = self.emission.log_prob(obs, &self.layout)?;

        let mut total = 0.0;
        let mut posteriors = Array2::zeros((obs.nrows(), self.n_components()));
        for range in ranges {
            let post = forward_backward(start.view(), trans.view(), log_e.slice(s![range.clone(), ..]))?;
            total += post.log_likelihood;
            posteriors.slice_mut(s![range, ..]).assign(&post.gamma);
        }
        tracing::trace!(
            event = event_names::SCORE_COMPUTED,
            stage = %Stage::Score,
            log_likelihood = total,
            "scored observations"
        );
        Ok((total, posteriors))
    }

    /// Summed log-likelihood of the sequences.
    ///
    /// Like [`score_samples`](Self::score_samples), fails with
    /// [`Error::Numerical`] if any sequence is impossible under the current
    /// parameters.
    pub fn score(&self, obs: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<f64> {
        self.validate_observations(&obs)?;
        let ranges = split_sequences(obs.nrows(), lengths)?;
        let start = self.expanded_startprob()?;
        let trans = self.expanded_transmat()?;
        let log_e = self.emission.log_prob(obs, &self.layout)?;
        ranges.into_iter().try_fold(0.0, |acc, range| {
            Ok(acc + log_likelihood(start.view(), trans.view(), log_e.slice(s![range, ..]))?)
        })
    }

    /// Viterbi path over the expanded states and its log-probability.
    pub fn decode(
        &self,
        obs: ArrayView2<f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(f64, Vec<usize>)> {
        self.validate_observations(&obs)?;
        let ranges = split_sequences(obs.nrows(), lengths)?;
        let start = self.expanded_startprob()?;
        let trans = self.expanded_transmat()?;
        let log_e = self.emission.log_prob(obs, &self.layout)?;

        let mut total = 0.0;
        let mut path = Vec::with_capacity(obs.nrows());
        for range in ranges {
            let (lp, p) = viterbi(start.view(), trans.view(), log_e.slice(s![range, ..]))?;
            total += lp;
            path.extend(p);
        }
        Ok((total, path))
    }

    /// Most likely unique state for every observation.
    pub fn predict(&self, obs: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<Vec<usize>> {
        let (_, path) = self.decode(obs, lengths)?;
        Ok(path.into_iter().map(|i| self.layout.unique_of(i)).collect())
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Draw `n_samples` observations and their expanded hidden states.
    ///
    /// With `random_state` the draw uses a fresh generator seeded from it and
    /// is reproducible; otherwise the estimator's own generator advances.
    pub fn sample(
        &mut self,
        n_samples: usize,
        random_state: Option<u64>,
    ) -> Result<(Array2<f64>, Vec<usize>)> {
        match random_state {
            Some(seed) => self.sample_with(n_samples, &mut StdRng::seed_from_u64(seed)),
            None => {
                let mut rng = self.rng.clone();
                let out = self.sample_with(n_samples, &mut rng);
                self.rng = rng;
                out
            }
        }
    }

    /// Draw from the model using a caller-supplied generator.
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Vec<usize>)> {
        let start = self.expanded_startprob()?;
        let trans = self.expanded_transmat()?;
        let invalid = |what: &str, e: rand::distr::weighted::Error| {
            Error::Numerical(format!("invalid {what} distribution: {e}"))
        };
        let start_dist = WeightedIndex::<f64>::new(start.iter()).map_err(|e| invalid("start", e))?;
        let rows = trans
            .outer_iter()
            .map(|row| WeightedIndex::<f64>::new(row.iter()).map_err(|e| invalid("transition", e)))
            .collect::<Result<Vec<_>>>()?;

        let mut obs = Array2::zeros((n_samples, self.n_features));
        let mut states = Vec::with_capacity(n_samples);
        if n_samples > 0 {
            let mut state = start_dist.sample(&mut *rng);
            for t in 0..n_samples {
                if t > 0 {
                    state = rows[state].sample(&mut *rng);
                }
                let x = self.emission.sample(state, &self.layout, &mut *rng)?;
                obs.row_mut(t).assign(&x);
                states.push(state);
            }
        }

        tracing::debug!(
            event = event_names::SAMPLE_DRAWN,
            stage = %Stage::Sample,
            n_samples,
            "sampled sequence"
        );
        Ok((obs, states))
    }

    // ------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------

    /// Run EM for up to `n_iter` iterations.
    ///
    /// Parameter kinds in `init_params` are re-initialised from the data
    /// first; only kinds in `params` are updated. Stops early once the
    /// log-likelihood gain drops below `tol`.
    pub fn fit(&mut self, obs: ArrayView2<f64>, lengths: Option<&[usize]>) -> Result<FitReport> {
        self.validate_observations(&obs)?;
        let ranges = split_sequences(obs.nrows(), lengths)?;
        if !self.init_params.is_empty() {
            self.init_parameters(obs)?;
        }

        tracing::info!(
            event = event_names::FIT_STARTED,
            stage = %Stage::Fit,
            n_samples = obs.nrows(),
            n_sequences = ranges.len(),
            n_components = self.n_components(),
            params = %self.params,
            n_iter = self.n_iter,
            "starting EM"
        );

        let mut report = FitReport {
            iterations: 0,
            log_likelihoods: Vec::with_capacity(self.n_iter),
            converged: false,
        };
        for iteration in 0..self.n_iter {
            let stats = self.accumulate(obs, &ranges)?;
            let ll = stats.log_likelihood;
            let delta = report.log_likelihoods.last().map(|prev| ll - prev);
            report.log_likelihoods.push(ll);
            report.iterations = iteration + 1;

            tracing::debug!(
                event = event_names::FIT_ITERATION,
                stage = %Stage::Fit,
                iteration,
                log_likelihood = ll,
                delta = delta.unwrap_or(f64::NAN),
                "EM iteration"
            );

            if delta.is_some_and(|d| d < self.tol) {
                report.converged = true;
                tracing::info!(
                    event = event_names::FIT_CONVERGED,
                    stage = %Stage::Fit,
                    iteration,
                    log_likelihood = ll,
                    "log-likelihood gain below tolerance"
                );
                break;
            }
            self.maximize(&stats)?;
        }

        tracing::info!(
            event = event_names::FIT_FINISHED,
            stage = %Stage::Fit,
            iterations = report.iterations,
            converged = report.converged,
            log_likelihood = report.final_log_likelihood().unwrap_or(f64::NAN),
            "EM finished"
        );
        Ok(report)
    }

    /// Data-driven initialisation of the kinds in `init_params`.
    fn init_parameters(&mut self, obs: ArrayView2<f64>) -> Result<()> {
        let n = self.n_unique();
        let mask = self.init_params;

        let startprob = if mask.contains(ParamKind::StartProb) {
            Array1::from_elem(n, 1.0 / n as f64)
        } else {
            self.startprob.clone()
        };
        let transmat = if mask.contains(ParamKind::TransMat) {
            Array2::from_elem((n, n), 1.0 / n as f64)
        } else {
            self.transmat.clone()
        };
        let advance = if mask.contains(ParamKind::Weights) {
            Array1::from_elem(n, self.default_advance)
        } else {
            self.advance.clone()
        };
        let means = if mask.contains(ParamKind::Means) {
            kmeans(obs, n, &mut self.rng)?
        } else {
            self.emission.means().to_owned()
        };
        let covariance = if mask.contains(ParamKind::Precisions) {
            match self.emission.kind() {
                CovarianceKind::Diagonal => {
                    let var = pooled_variance(obs)?;
                    let mut out = Array2::zeros((n, self.n_features));
                    for mut row in out.outer_iter_mut() {
                        row.assign(&var);
                    }
                    Covariance::Diagonal(out)
                }
                CovarianceKind::Full => {
                    let precision = pooled_precision(obs)?;
                    let mut out = Array3::zeros((n, self.n_features, self.n_features));
                    for mut p in out.outer_iter_mut() {
                        p.assign(&precision);
                    }
                    Covariance::Full(out)
                }
            }
        } else {
            self.emission.covariance().clone()
        };

        let emission = EmissionModel::new(means, covariance)?;
        self.startprob = startprob;
        self.transmat = transmat;
        self.advance = advance;
        self.emission = emission;

        tracing::debug!(
            event = event_names::PARAMS_INITIALIZED,
            stage = %Stage::Init,
            init_params = %mask,
            "initialised parameters from data"
        );
        Ok(())
    }

    /// E-step over every sequence.
    fn accumulate(&self, obs: ArrayView2<f64>, ranges: &[Range<usize>]) -> Result<SufficientStats> {
        let start = self.expanded_startprob()?;
        let trans = self.expanded_transmat()?;
        let log_e = self.emission.log_prob(obs, &self.layout)?;
        let mut stats = SufficientStats::new(&self.layout, self.n_features);

        for range in ranges {
            let post = forward_backward(
                start.view(),
                trans.view(),
                log_e.slice(s![range.clone(), ..]),
            )?;
            stats.log_likelihood += post.log_likelihood;
            stats.start += &post.gamma.row(0);
            stats.trans += &post.xi_sum;

            // (n_unique, len): occupancy summed over replicas
            let gamma = self
                .layout
                .contract("posteriors", &post.gamma.t(), Reduction::Sum)?;
            let seg = obs.slice(s![range.clone(), ..]);
            stats.occupancy += &gamma.sum_axis(Axis(1));
            stats.obs_sum += &gamma.dot(&seg);
            for (u, g) in gamma.outer_iter().enumerate() {
                let weighted = &seg * &g.insert_axis(Axis(1));
                let mut outer_u = stats.obs_outer.index_axis_mut(Axis(0), u);
                outer_u += &weighted.t().dot(&seg);
            }
        }
        Ok(stats)
    }

    fn log_skipped(&self, u: usize, kind: ParamKind, occupancy: f64) {
        tracing::warn!(
            event = event_names::STATE_SKIPPED,
            stage = %Stage::Fit,
            state = u,
            param = kind.name(),
            occupancy,
            "state has no posterior mass; keeping previous parameters"
        );
    }

    /// M-step for the kinds in `params`; assigns only once every update
    /// has succeeded.
    fn maximize(&mut self, stats: &SufficientStats) -> Result<()> {
        let n = self.n_unique();

        let startprob = if self.params.contains(ParamKind::StartProb) {
            let counts = self
                .layout
                .contract("start occupancy", &stats.start, Reduction::Sum)?;
            dirichlet_update(
                &self.priors.startprob_dirichlet()?,
                counts.view(),
                self.startprob.view(),
            )?
        } else {
            self.startprob.clone()
        };

        let (trans_counts, advance_counts) = self.layout.contract_transitions(stats.trans.view())?;

        let mut transmat = self.transmat.clone();
        if self.params.contains(ParamKind::TransMat) {
            for u in 0..n {
                let row = dirichlet_update(
                    &self.priors.transmat_dirichlet(u)?,
                    trans_counts.row(u),
                    self.transmat.row(u),
                )?;
                transmat.row_mut(u).assign(&row);
            }
        }

        let mut advance = self.advance.clone();
        if self.params.contains(ParamKind::Weights) && self.n_tied() > 1 {
            let flat = DirichletParams::uniform(2)
                .ok_or_else(|| Error::Numerical("invalid advance prior".into()))?;
            for u in 0..n {
                let old = Array1::from(vec![self.advance[u], 1.0 - self.advance[u]]);
                let est = dirichlet_update(&flat, advance_counts.row(u), old.view())?;
                advance[u] = est[0];
            }
        }

        let mut means = self.emission.means().to_owned();
        if self.params.contains(ParamKind::Means) {
            let mu_prior = self.priors.mu_prior();
            let mu_weight = self.priors.mu_weight();
            for u in 0..n {
                let denom = mu_weight[u] + stats.occupancy[u];
                if denom < MIN_OCCUPANCY {
                    self.log_skipped(u, ParamKind::Means, stats.occupancy[u]);
                    continue;
                }
                let num = &mu_prior.row(u) * mu_weight[u] + &stats.obs_sum.row(u);
                means.row_mut(u).assign(&(num / denom));
            }
        }

        let covariance = if self.params.contains(ParamKind::Precisions) {
            self.update_covariance(stats, means.view())?
        } else {
            self.emission.covariance().clone()
        };

        let emission = EmissionModel::new(means, covariance)?;
        self.startprob = startprob;
        self.transmat = transmat;
        self.advance = advance;
        self.emission = emission;
        Ok(())
    }

    /// Covariance update with the Wishart-like prior:
    /// `Σ = (w P0⁻¹ + S + κ (μ - μ0)(μ - μ0)ᵀ) / (w + N)`.
    fn update_covariance(&self, stats: &SufficientStats, means: ArrayView2<f64>) -> Result<Covariance> {
        let n = self.n_unique();
        let mu_prior = self.priors.mu_prior();
        let mu_weight = self.priors.mu_weight();
        let precision_weight = self.priors.precision_weight();
        let mut covariance = self.emission.covariance().clone();

        for u in 0..n {
            let occupancy = stats.occupancy[u];
            let w = precision_weight[u];
            if w + occupancy < MIN_OCCUPANCY {
                self.log_skipped(u, ParamKind::Precisions, occupancy);
                continue;
            }

            let mu = means.row(u);
            let sum = stats.obs_sum.row(u);
            // Σ γ (x - μ)(x - μ)ᵀ
            let mut scatter = stats.obs_outer.index_axis(Axis(0), u).to_owned();
            scatter -= &outer(mu, sum);
            scatter -= &outer(sum, mu);
            scatter += &(outer(mu, mu) * occupancy);

            let diff = &mu - &mu_prior.row(u);
            let mut num = scatter + outer(diff.view(), diff.view()) * mu_weight[u];
            if w > 0.0 {
                num += &(self.priors.prior_covariance(u)? * w);
            }
            let cov = num / (w + occupancy);

            match &mut covariance {
                Covariance::Diagonal(var) => {
                    let d = cov.diag();
                    if let Some(v) = d.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
                        return Err(Error::Numerical(format!(
                            "updated variance of unique state {u} is {v}"
                        )));
                    }
                    var.row_mut(u).assign(&d);
                }
                Covariance::Full(precision) => {
                    let p = spd_inverse(cov.view()).ok_or_else(|| Error::NotPositiveDefinite {
                        name: "updated covariance".into(),
                        state: u,
                    })?;
                    precision.index_axis_mut(Axis(0), u).assign(&p);
                }
            }
        }
        Ok(covariance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn plain_model() -> TiedHmm {
        let mut h = TiedHmm::with_states(2, 1).unwrap();
        h.set_startprob(array![0.6, 0.4].view()).unwrap();
        h.set_transmat(array![[0.7, 0.3], [0.4, 0.6]].view()).unwrap();
        h.set_mu(array![0.7, -2.0].view()).unwrap();
        h.set_var(array![0.2, 0.2].view()).unwrap();
        h
    }

    #[test]
    fn test_construction_rejects_zero_sizes() {
        assert!(TiedHmm::with_states(0, 1).is_err());
        let err = TiedHmm::with_states(2, 0).unwrap_err();
        assert_eq!(err.category(), thmm_common::ErrorCategory::Config);
    }

    #[test]
    fn test_defaults() {
        let h = TiedHmm::with_states(3, 2).unwrap();
        assert_eq!(h.n_components(), 6);
        assert_eq!(h.startprob(), Array1::from_elem(3, 1.0 / 3.0));
        assert_eq!(h.params(), ParamsMask::all());
        assert_eq!(h.covariance_kind(), CovarianceKind::Diagonal);
        assert_eq!(h.expanded_transmat().unwrap().dim(), (6, 6));
    }

    #[test]
    fn test_setters_are_atomic() {
        let mut h = plain_model();
        assert!(h.set_startprob(array![0.6, 0.6].view()).is_err());
        assert!(h.set_startprob(array![0.2, 0.3, 0.5].view()).is_err());
        assert_eq!(h.startprob(), array![0.6, 0.4]);

        assert!(h.set_transmat(array![[0.5, 0.5]].view()).is_err());
        assert_eq!(h.transmat(), array![[0.7, 0.3], [0.4, 0.6]]);

        assert!(h.set_mu(array![1.0, 2.0, 3.0].view()).is_err());
        assert_eq!(h.mu(), array![[0.7], [-2.0]]);

        assert!(matches!(h.set_var(array![0.2, -1.0].view()), Err(Error::Numerical(_))));
        assert_eq!(h.var(), array![[0.2], [0.2]]);

        assert!(h.set_advance_prob(array![0.0, 1.0].view()).is_err());
        assert_eq!(h.advance_prob(), array![1.0, 1.0]);
    }

    #[test]
    fn test_params_parsing() {
        let mut h = plain_model();
        h.set_params("st").unwrap();
        assert!(h.params().contains(ParamKind::TransMat));
        assert!(!h.params().contains(ParamKind::Means));
        assert!(matches!(h.set_params("stq"), Err(Error::InvalidParamCode('q'))));
        assert_eq!(h.params().to_string(), "st");
        h.set_init_params("").unwrap();
        assert!(h.init_params().is_empty());
    }

    #[test]
    fn test_precision_switches_kind() {
        let mut h = plain_model();
        h.set_precision(array![[[5.0]], [[2.0]]].view()).unwrap();
        assert_eq!(h.covariance_kind(), CovarianceKind::Full);
        let var = h.var();
        assert!((var[[0, 0]] - 0.2).abs() < 1e-12);
        assert!((var[[1, 0]] - 0.5).abs() < 1e-12);

        let err = h.set_precision(array![[[1.0]], [[0.0]]].view()).unwrap_err();
        assert!(matches!(err, Error::NotPositiveDefinite { state: 1, .. }));
        assert_eq!(h.covariance_kind(), CovarianceKind::Full);

        h.set_var(array![1.0, 4.0].view()).unwrap();
        assert_eq!(h.covariance_kind(), CovarianceKind::Diagonal);
        assert_eq!(h.precision()[[1, 0, 0]], 0.25);
    }

    #[test]
    fn test_score_samples_is_deterministic() {
        let mut h = plain_model();
        let (x, _) = h.sample(200, Some(1)).unwrap();
        let (a, pa) = h.score_samples(x.view(), None).unwrap();
        let (b, pb) = h.score_samples(x.view(), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(pa, pb);
        assert!((h.score(x.view(), None).unwrap() - a).abs() < 1e-9);
    }

    #[test]
    fn test_lengths_split_sequences() {
        let mut h = plain_model();
        let (x, _) = h.sample(60, Some(2)).unwrap();
        let whole_first = h.score(x.slice(s![..25, ..]), None).unwrap();
        let whole_second = h.score(x.slice(s![25.., ..]), None).unwrap();
        let split = h.score(x.view(), Some(&[25, 35])).unwrap();
        assert!((split - (whole_first + whole_second)).abs() < 1e-9);

        assert!(matches!(
            h.score(x.view(), Some(&[25, 30])),
            Err(Error::Shape { .. })
        ));
        assert!(matches!(
            h.score(x.view(), Some(&[0, 60])),
            Err(Error::EmptyObservations)
        ));
    }

    #[test]
    fn test_observation_validation() {
        let h = plain_model();
        let empty = Array2::<f64>::zeros((0, 1));
        assert!(matches!(h.score(empty.view(), None), Err(Error::EmptyObservations)));
        let wide = Array2::<f64>::zeros((3, 2));
        assert!(matches!(h.score(wide.view(), None), Err(Error::Shape { .. })));
        let nan = array![[0.0], [f64::NAN]];
        assert!(h.score(nan.view(), None).is_err());
    }

    #[test]
    fn test_predict_maps_to_unique_states() {
        let mut h = TiedHmm::with_states(2, 3).unwrap();
        h.set_mu(array![0.0, 10.0].view()).unwrap();
        h.set_var(array![1.0, 1.0].view()).unwrap();
        h.set_startprob(array![1.0, 0.0].view()).unwrap();
        let obs = array![[0.1], [-0.2], [0.3], [9.8], [10.1], [10.0], [10.2]];
        let (_, path) = h.decode(obs.view(), None).unwrap();
        assert_eq!(path, vec![0, 1, 2, 3, 4, 5, 5]);
        assert_eq!(h.predict(obs.view(), None).unwrap(), vec![0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_fit_report_and_held_parameters() {
        let mut h = plain_model();
        let (x, _) = h.sample(300, Some(5)).unwrap();
        h.set_params("t").unwrap();
        h.set_init_params("").unwrap();
        h.set_n_iter(3);
        h.set_tol(0.0).unwrap();
        let report = h.fit(x.view(), None).unwrap();
        assert!(report.iterations >= 2 && report.iterations <= 3);
        assert_eq!(report.log_likelihoods.len(), report.iterations);
        assert_eq!(h.startprob(), array![0.6, 0.4]);
        assert_eq!(h.mu(), array![[0.7], [-2.0]]);
        assert_eq!(h.var(), array![[0.2], [0.2]]);
        assert!(is_stochastic(&h.transmat(), Axis(1), 1e-9));
    }

    #[test]
    fn test_unvisited_state_keeps_parameters() {
        let mut h = TiedHmm::with_states(2, 1).unwrap();
        h.set_startprob(array![1.0, 0.0].view()).unwrap();
        h.set_transmat(array![[1.0, 0.0], [0.5, 0.5]].view()).unwrap();
        h.set_mu(array![0.0, 50.0].view()).unwrap();
        h.set_var(array![1.0, 3.0].view()).unwrap();
        h.set_init_params("").unwrap();
        h.set_params("stmp").unwrap();
        h.set_n_iter(1);
        let obs = array![[0.5], [-0.5], [1.0], [-1.0]];
        h.fit(obs.view(), None).unwrap();
        assert_eq!(h.mu()[[1, 0]], 50.0);
        assert_eq!(h.var()[[1, 0]], 3.0);
        assert_eq!(h.transmat().row(1), array![0.5, 0.5]);
        assert!(h.mu()[[0, 0]].abs() < 1e-12);
        assert!((h.var()[[0, 0]] - 0.625).abs() < 1e-12);
    }

    #[test]
    fn test_mean_prior_pulls_estimate() {
        let mut h = TiedHmm::with_states(1, 1).unwrap();
        h.set_init_params("").unwrap();
        h.set_params("m").unwrap();
        h.set_n_iter(1);
        h.priors_mut().set_mu_prior(array![0.0].view()).unwrap();
        h.priors_mut().set_mu_weight(array![4.0].view()).unwrap();
        let obs = array![[2.0], [2.0], [2.0], [2.0]];
        h.fit(obs.view(), None).unwrap();
        // (4 * 0 + 8) / (4 + 4)
        assert!((h.mu()[[0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_precision_prior_pulls_variance() {
        let mut h = TiedHmm::with_states(1, 1).unwrap();
        h.set_init_params("").unwrap();
        h.set_params("p").unwrap();
        h.set_n_iter(1);
        h.priors_mut().set_precision_prior(array![0.5].view()).unwrap();
        h.priors_mut().set_precision_weight(array![2.0].view()).unwrap();
        let obs = array![[1.0], [-1.0]];
        h.fit(obs.view(), None).unwrap();
        // (2 * 2 + 2) / (2 + 2)
        assert!((h.var()[[0, 0]] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_full_precision_prior_update() {
        let config = ThmmConfig::new(1)
            .with_n_features(2)
            .with_covariance(CovarianceKind::Full);
        let mut h = TiedHmm::new(&config).unwrap();
        h.set_init_params("").unwrap();
        h.set_params("p").unwrap();
        h.set_n_iter(1);
        let p0 = array![[[2.0, 0.5], [0.5, 1.0]]];
        h.priors_mut().set_precision_prior(p0.view()).unwrap();
        h.priors_mut().set_precision_weight(array![3.0].view()).unwrap();
        h.priors_mut().set_mu_prior(array![[1.0, 0.0]].view()).unwrap();
        h.priors_mut().set_mu_weight(array![2.0].view()).unwrap();

        let obs = array![[1.0, 0.0], [0.0, 1.0], [-1.0, -1.0]];
        h.fit(obs.view(), None).unwrap();

        // means stay at zero, so S = Σ x xᵀ and μ - μ0 = (-1, 0)
        let scatter = obs.t().dot(&obs);
        let shrink = array![[2.0, 0.0], [0.0, 0.0]];
        let prior_cov = spd_inverse(p0.index_axis(Axis(0), 0)).unwrap();
        let cov = (prior_cov * 3.0 + scatter + shrink) / (3.0 + 3.0);
        let expected = spd_inverse(cov.view()).unwrap();

        let precision = h.precision();
        for ((i, j), &e) in expected.indexed_iter() {
            assert!((precision[[0, i, j]] - e).abs() < 1e-10, "({i}, {j})");
        }
        assert_eq!(h.mu(), array![[0.0, 0.0]]);
    }

    #[test]
    fn test_set_precision_rejects_asymmetric() {
        let config = ThmmConfig::new(1)
            .with_n_features(2)
            .with_covariance(CovarianceKind::Full);
        let mut h = TiedHmm::new(&config).unwrap();
        let before = h.precision();
        let err = h
            .set_precision(array![[[2.0, 5.0], [0.0, 2.0]]].view())
            .unwrap_err();
        assert!(matches!(err, Error::Numerical(_)));
        assert_eq!(h.precision(), before);
    }

    #[test]
    fn test_impossible_sequence_fails_both_scorers() {
        let h = plain_model();
        // every Gaussian density underflows to zero
        let far = array![[1e200], [1e200]];
        assert!(matches!(h.score(far.view(), None), Err(Error::Numerical(_))));
        assert!(matches!(
            h.score_samples(far.view(), None),
            Err(Error::Numerical(_))
        ));
    }

    #[test]
    fn test_init_params_reinitialise() {
        let mut h = TiedHmm::new(&ThmmConfig::new(2).with_random_state(4)).unwrap();
        let obs = array![[0.0], [0.2], [-0.2], [8.0], [8.2], [7.8]];
        h.set_params("").unwrap();
        h.set_n_iter(1);
        h.fit(obs.view(), None).unwrap();
        let mut means: Vec<f64> = h.mu().iter().copied().collect();
        means.sort_by(|a, b| a.total_cmp(b));
        assert!(means[0].abs() < 1e-9);
        assert!((means[1] - 8.0).abs() < 1e-9);
        let pooled = obs.var_axis(Axis(0), 0.0)[0];
        assert!((h.var()[[0, 0]] - pooled).abs() < 1e-12);
        assert_eq!(h.startprob(), array![0.5, 0.5]);
    }

    #[test]
    fn test_sample_reproducible_and_advances_rng() {
        let mut h = plain_model();
        let (a, sa) = h.sample(50, Some(11)).unwrap();
        let (b, sb) = h.sample(50, Some(11)).unwrap();
        assert_eq!(a, b);
        assert_eq!(sa, sb);

        let (c, _) = h.sample(50, None).unwrap();
        let (d, _) = h.sample(50, None).unwrap();
        assert_ne!(c, d);

        let (empty, states) = h.sample(0, None).unwrap();
        assert_eq!(empty.dim(), (0, 1));
        assert!(states.is_empty());
    }
}
