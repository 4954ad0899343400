//! Parameter kinds and the per-kind enable mask.
//!
//! Each parameter kind has a single-character code so masks can be written
//! compactly in configuration files (`"stmpw"`), but inside the estimator a
//! mask is a small flag set, never a string.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A kind of estimator parameter that can be updated or initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Start probabilities (`s`).
    StartProb,
    /// Unique-state transition matrix (`t`).
    TransMat,
    /// Emission means (`m`).
    Means,
    /// Emission variances or precision matrices (`p`).
    Precisions,
    /// Advance weights of the tied sub-chains (`w`).
    Weights,
}

impl ParamKind {
    /// Number of parameter kinds.
    pub const COUNT: usize = 5;

    /// All kinds in mask order.
    pub const ALL: [ParamKind; 5] = [
        ParamKind::StartProb,
        ParamKind::TransMat,
        ParamKind::Means,
        ParamKind::Precisions,
        ParamKind::Weights,
    ];

    /// Single-character code used in mask strings.
    pub fn code(&self) -> char {
        match self {
            ParamKind::StartProb => 's',
            ParamKind::TransMat => 't',
            ParamKind::Means => 'm',
            ParamKind::Precisions => 'p',
            ParamKind::Weights => 'w',
        }
    }

    /// Parse a single mask character.
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            's' => Some(ParamKind::StartProb),
            't' => Some(ParamKind::TransMat),
            'm' => Some(ParamKind::Means),
            'p' => Some(ParamKind::Precisions),
            'w' => Some(ParamKind::Weights),
            _ => None,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::StartProb => "startprob",
            ParamKind::TransMat => "transmat",
            ParamKind::Means => "means",
            ParamKind::Precisions => "precisions",
            ParamKind::Weights => "weights",
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Set of parameter kinds taking part in an M-step or an initialisation.
///
/// Kinds absent from the mask are held fixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParamsMask {
    bits: u8,
}

impl ParamsMask {
    /// Mask with no kinds enabled.
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// Mask with every kind enabled.
    pub fn all() -> Self {
        ParamKind::ALL.iter().fold(Self::empty(), |m, k| m.with(*k))
    }

    /// Return a copy with `kind` enabled.
    pub fn with(mut self, kind: ParamKind) -> Self {
        self.bits |= kind.bit();
        self
    }

    /// Return a copy with `kind` disabled.
    pub fn without(mut self, kind: ParamKind) -> Self {
        self.bits &= !kind.bit();
        self
    }

    /// Whether `kind` is enabled.
    pub fn contains(&self, kind: ParamKind) -> bool {
        self.bits & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Enabled kinds in mask order.
    pub fn kinds(&self) -> impl Iterator<Item = ParamKind> + '_ {
        ParamKind::ALL.into_iter().filter(|k| self.contains(*k))
    }
}

impl FromIterator<ParamKind> for ParamsMask {
    fn from_iter<I: IntoIterator<Item = ParamKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |m, k| m.with(k))
    }
}

impl FromStr for ParamsMask {
    type Err = Error;

    /// Parse a mask string. Repeated characters are accepted; unknown ones
    /// are a configuration error.
    fn from_str(s: &str) -> Result<Self> {
        s.chars()
            .map(|c| ParamKind::from_code(c).ok_or(Error::InvalidParamCode(c)))
            .collect()
    }
}

impl TryFrom<String> for ParamsMask {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ParamsMask> for String {
    fn from(mask: ParamsMask) -> Self {
        mask.to_string()
    }
}

impl fmt::Display for ParamsMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in self.kinds() {
            write!(f, "{}", kind.code())?;
        }
        Ok(())
    }
}

/// Parameterisation of the Gaussian emission covariance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceKind {
    /// Per-feature variances, shape (n_unique, n_features).
    #[default]
    Diagonal,
    /// Full precision matrices, shape (n_unique, n_features, n_features).
    Full,
}

impl fmt::Display for CovarianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceKind::Diagonal => write!(f, "diagonal"),
            CovarianceKind::Full => write!(f, "full"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for kind in ParamKind::ALL {
            assert_eq!(ParamKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ParamKind::from_code('a'), None);
    }

    #[test]
    fn test_parse_full_alphabet() {
        let mask: ParamsMask = "stmpw".parse().unwrap();
        assert_eq!(mask, ParamsMask::all());
        assert_eq!(mask.to_string(), "stmpw");
    }

    #[test]
    fn test_parse_order_and_repeats() {
        let mask: ParamsMask = "tsst".parse().unwrap();
        assert!(mask.contains(ParamKind::StartProb));
        assert!(mask.contains(ParamKind::TransMat));
        assert!(!mask.contains(ParamKind::Means));
        assert_eq!(mask.to_string(), "st");
    }

    #[test]
    fn test_parse_empty() {
        let mask: ParamsMask = "".parse().unwrap();
        assert!(mask.is_empty());
        assert_eq!(mask.kinds().count(), 0);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = "stx".parse::<ParamsMask>().unwrap_err();
        assert!(matches!(err, Error::InvalidParamCode('x')));
    }

    #[test]
    fn test_with_without() {
        let mask = ParamsMask::all().without(ParamKind::Weights);
        assert!(!mask.contains(ParamKind::Weights));
        assert!(mask.with(ParamKind::Weights) == ParamsMask::all());
    }

    #[test]
    fn test_serde_as_string() {
        let mask: ParamsMask = "mp".parse().unwrap();
        let json = serde_json::to_string(&mask).unwrap();
        assert_eq!(json, "\"mp\"");
        let back: ParamsMask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);
        assert!(serde_json::from_str::<ParamsMask>("\"mq\"").is_err());
    }

    #[test]
    fn test_covariance_kind_serde() {
        let kind: CovarianceKind = serde_json::from_str("\"full\"").unwrap();
        assert_eq!(kind, CovarianceKind::Full);
        assert_eq!(CovarianceKind::default().to_string(), "diagonal");
    }
}
