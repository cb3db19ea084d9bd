//! Distance metrics for vector similarity.
//!
//! Every metric is expressed as a distance where lower is better, plus a
//! score where higher is better. Ranking always uses the distance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    #[default]
    Cosine,
    /// Squared Euclidean distance. Range: \[0, ∞).
    L2,
    /// Negative dot product.
    Dot,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => euclidean_sq(a, b),
            DistanceMetric::Dot => -dot(a, b),
        }
    }

    /// Converts a distance produced by this metric into a similarity score.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - distance,
            DistanceMetric::L2 => 1.0 / (1.0 + distance),
            DistanceMetric::Dot => -distance,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Dot => "dot",
        };
        f.write_str(name)
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "dot" => Ok(DistanceMetric::Dot),
            other => Err(format!("unknown distance metric '{}'", other)),
        }
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

/// Cosine similarity; zero-length vectors have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot(a, b) / denom
}

pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Returns a unit-length copy of `v`, or `v` unchanged when it is all zeros.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let m = DistanceMetric::Cosine;
        assert!((m.distance(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0])).abs() < 1e-6);
        assert!((m.distance(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((m.distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_ignores_magnitude() {
        let a = [1.0, 2.0, 3.0];
        let b = [2.0, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_scores_follow_distance() {
        let q = [1.0, 0.0, 0.0];
        let near = [0.9, 0.1, 0.0];
        let far = [0.0, 1.0, 0.0];
        for m in [DistanceMetric::Cosine, DistanceMetric::L2, DistanceMetric::Dot] {
            let dn = m.distance(&q, &near);
            let df = m.distance(&q, &far);
            assert!(dn < df, "{} should rank near first", m);
            assert!(m.score(dn) > m.score(df));
        }
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("COSINE".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("euclidean".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert!("hamming".parse::<DistanceMetric>().is_err());
    }
}
