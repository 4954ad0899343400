//! Mapping between the unique parameter space and the tied state lattice.
//!
//! Unique state `u` owns the contiguous block of expanded indices
//! `[u * n_tied, (u + 1) * n_tied)`. Replica 0 of the block is the *entry*
//! replica, replica `n_tied - 1` the *exit* replica:
//!
//! ```text
//!   unique u:   [entry] -a-> [ . ] -a-> ... -a-> [exit] --A[u,v]--> entry of v
//!                  ^1-a         ^1-a                 ^A[u,u]
//! ```
//!
//! Inner replicas advance with probability `a = advance[u]` and stay
//! otherwise. The exit replica carries the unique transition row: it stays
//! with `A[u,u]` and enters group `v` with `A[u,v]`. With `n_tied = 1` the
//! lattice is the plain unique chain.

use ndarray::{Array, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, RemoveAxis};
use std::ops::Range;
use thmm_common::{Error, Result};

/// How an expanded array is folded back to unique space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Add all replicas (counts and sufficient statistics).
    Sum,
    /// Read the entry replica (replicated parameter values).
    First,
}

/// Index arithmetic of the tied lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiedLayout {
    n_unique: usize,
    n_tied: usize,
}

impl TiedLayout {
    /// Fails with a configuration error if either size is zero.
    pub fn new(n_unique: usize, n_tied: usize) -> Result<Self> {
        if n_unique < 1 {
            return Err(Error::Configuration(format!(
                "n_unique must be >= 1, got {n_unique}"
            )));
        }
        if n_tied < 1 {
            return Err(Error::Configuration(format!(
                "n_tied must be >= 1, got {n_tied}"
            )));
        }
        Ok(Self { n_unique, n_tied })
    }

    pub fn n_unique(&self) -> usize {
        self.n_unique
    }

    pub fn n_tied(&self) -> usize {
        self.n_tied
    }

    /// Size of the expanded state space, `n_unique * n_tied`.
    pub fn n_components(&self) -> usize {
        self.n_unique * self.n_tied
    }

    /// Expanded indices owned by unique state `u`.
    pub fn range(&self, u: usize) -> Range<usize> {
        u * self.n_tied..(u + 1) * self.n_tied
    }

    /// Unique state that expanded state `i` replicates.
    pub fn unique_of(&self, i: usize) -> usize {
        i / self.n_tied
    }

    /// Position of expanded state `i` inside its sub-chain.
    pub fn replica_of(&self, i: usize) -> usize {
        i % self.n_tied
    }

    pub fn entry(&self, u: usize) -> usize {
        u * self.n_tied
    }

    pub fn exit(&self, u: usize) -> usize {
        u * self.n_tied + self.n_tied - 1
    }

    fn check_leading<S, D>(&self, name: &str, a: &ArrayBase<S, D>, expected: usize) -> Result<()>
    where
        S: Data,
        D: RemoveAxis,
    {
        let actual = a.shape().first().copied().unwrap_or(0);
        if a.ndim() == 0 || actual != expected {
            return Err(Error::shape(
                name,
                format!("leading dimension {expected}"),
                format!("shape {:?}", a.shape()),
            ));
        }
        Ok(())
    }

    /// Replicate every row of a unique-space array `n_tied` times.
    ///
    /// Row `i` of the input becomes rows `i * n_tied .. (i + 1) * n_tied`.
    pub fn expand<A, S, D>(&self, name: &str, a: &ArrayBase<S, D>) -> Result<Array<A, D>>
    where
        A: Clone,
        S: Data<Elem = A>,
        D: RemoveAxis,
    {
        self.check_leading(name, a, self.n_unique)?;
        Ok(self.replicate(a))
    }

    /// [`expand`](Self::expand) for arrays already known to be unique-shaped.
    pub(crate) fn replicate<A, S, D>(&self, a: &ArrayBase<S, D>) -> Array<A, D>
    where
        A: Clone,
        S: Data<Elem = A>,
        D: RemoveAxis,
    {
        let indices: Vec<usize> = (0..self.n_components()).map(|i| self.unique_of(i)).collect();
        a.select(Axis(0), &indices)
    }

    /// Fold an expanded array back to unique space along axis 0.
    pub fn contract<S, D>(
        &self,
        name: &str,
        a: &ArrayBase<S, D>,
        reduction: Reduction,
    ) -> Result<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: RemoveAxis,
    {
        self.check_leading(name, a, self.n_components())?;
        let entries: Vec<usize> = (0..self.n_unique).map(|u| self.entry(u)).collect();
        let mut out = a.select(Axis(0), &entries);
        if reduction == Reduction::Sum {
            for k in 1..self.n_tied {
                let replicas: Vec<usize> = entries.iter().map(|e| e + k).collect();
                out += &a.select(Axis(0), &replicas);
            }
        }
        Ok(out)
    }

    /// Expanded start distribution: all of `startprob[u]` on the entry replica.
    pub fn expand_startprob(&self, startprob: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_leading("startprob", &startprob, self.n_unique)?;
        let mut out = Array1::zeros(self.n_components());
        for (u, &p) in startprob.iter().enumerate() {
            out[self.entry(u)] = p;
        }
        Ok(out)
    }

    /// Expanded transition matrix of the tied sub-chain topology.
    pub fn expand_transmat(
        &self,
        transmat: ArrayView2<f64>,
        advance: ArrayView1<f64>,
    ) -> Result<Array2<f64>> {
        let n = self.n_unique;
        if transmat.dim() != (n, n) {
            return Err(Error::shape(
                "transmat",
                format!("({n}, {n})"),
                format!("{:?}", transmat.shape()),
            ));
        }
        self.check_leading("advance_prob", &advance, n)?;

        let k = self.n_components();
        let mut out = Array2::zeros((k, k));
        for u in 0..n {
            for i in self.entry(u)..self.exit(u) {
                out[[i, i]] = 1.0 - advance[u];
                out[[i, i + 1]] = advance[u];
            }
            let exit = self.exit(u);
            for v in 0..n {
                let target = if v == u { exit } else { self.entry(v) };
                out[[exit, target]] = transmat[[u, v]];
            }
        }
        Ok(out)
    }

    /// Split expected expanded transition counts into unique-space counts.
    ///
    /// Returns `(transitions, advance)` where `transitions[u, v]` is read from
    /// the exit replica of `u`, and `advance[u] = [advanced, stayed]` sums the
    /// inner replicas of `u`.
    pub fn contract_transitions(&self, xi: ArrayView2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let k = self.n_components();
        if xi.dim() != (k, k) {
            return Err(Error::shape(
                "transition counts",
                format!("({k}, {k})"),
                format!("{:?}", xi.shape()),
            ));
        }

        let n = self.n_unique;
        let mut transitions = Array2::zeros((n, n));
        let mut advance = Array2::zeros((n, 2));
        for u in 0..n {
            let exit = self.exit(u);
            for v in 0..n {
                let target = if v == u { exit } else { self.entry(v) };
                transitions[[u, v]] = xi[[exit, target]];
            }
            for i in self.entry(u)..exit {
                advance[[u, 0]] += xi[[i, i + 1]];
                advance[[u, 1]] += xi[[i, i]];
            }
        }
        Ok((transitions, advance))
    }
}
