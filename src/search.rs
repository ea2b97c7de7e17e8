//! Parameter suggesters (C5). Each optimizer kind turns a `SearchSpace` into a deterministic
//! sequence of `ParameterVector`s for a fixed seed, so two runs with the same
//! `(strategy, search space, seed, n_iterations)` visit parameter vectors in byte-identical
//! order.

use rand::prelude::*;
use rand_pcg::Pcg64Mcg;
use std::collections::BTreeMap;

use crate::types::{ParamDomain, ParameterValue, ParameterVector, SearchSpace};

/// Produces the next candidate(s) to evaluate. `total()` is `None` for suggesters whose
/// cardinality depends only on `n_iterations` (random, Bayesian); grid search knows its exact
/// Cartesian-product size up front.
pub trait Suggester {
    fn total(&self) -> Option<u64>;
    fn next(&mut self, history: &[(ParameterVector, f64)]) -> Option<ParameterVector>;
}

/// Lexicographic Cartesian product over each parameter's discretized domain.
pub struct GridSearch {
    space: SearchSpace,
    grid: Vec<Vec<ParameterValue>>,
    cursor: u64,
    total: u64,
}

impl GridSearch {
    /// `resolution` controls how many points a continuous `RealInterval` is split into.
    pub fn new(space: SearchSpace, resolution: usize) -> Self {
        let grid: Vec<Vec<ParameterValue>> = space
            .params
            .iter()
            .map(|p| discretize(&p.domain, resolution))
            .collect();
        let total = grid.iter().map(|axis| axis.len() as u64).product();
        Self {
            space,
            grid,
            cursor: 0,
            total,
        }
    }

    fn vector_at(&self, mut index: u64) -> ParameterVector {
        let mut map = BTreeMap::new();
        for (axis, spec) in self.grid.iter().zip(self.space.params.iter()).rev() {
            let len = axis.len() as u64;
            let pick = (index % len) as usize;
            index /= len;
            map.insert(spec.name.clone(), axis[pick]);
        }
        ParameterVector(map)
    }
}

impl Suggester for GridSearch {
    fn total(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next(&mut self, _history: &[(ParameterVector, f64)]) -> Option<ParameterVector> {
        if self.cursor >= self.total {
            return None;
        }
        let v = self.vector_at(self.cursor);
        self.cursor += 1;
        Some(v)
    }
}

fn discretize(domain: &ParamDomain, resolution: usize) -> Vec<ParameterValue> {
    match domain {
        ParamDomain::IntRange { lo, hi } => (*lo..=*hi).map(ParameterValue::Integer).collect(),
        ParamDomain::DiscreteReal(values) => values.iter().copied().map(ParameterValue::Real).collect(),
        ParamDomain::RealInterval { lo, hi } => {
            let steps = resolution.max(2);
            (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ParameterValue::Real(lo + t * (hi - lo))
                })
                .collect()
        }
    }
}

/// Independent uniform draws per parameter, from a seeded PCG stream.
pub struct RandomSearch {
    space: SearchSpace,
    rng: Pcg64Mcg,
    remaining: u64,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, seed: u64, n_iterations: u64) -> Self {
        Self {
            space,
            rng: Pcg64Mcg::seed_from_u64(seed),
            remaining: n_iterations,
        }
    }

    fn draw(&mut self) -> ParameterVector {
        let mut map = BTreeMap::new();
        for spec in &self.space.params {
            let value = match &spec.domain {
                ParamDomain::IntRange { lo, hi } => ParameterValue::Integer(self.rng.gen_range(*lo..=*hi)),
                ParamDomain::RealInterval { lo, hi } => ParameterValue::Real(self.rng.gen_range(*lo..*hi)),
                ParamDomain::DiscreteReal(values) => {
                    ParameterValue::Real(*values.choose(&mut self.rng).expect("non-empty domain"))
                }
            };
            map.insert(spec.name.clone(), value);
        }
        ParameterVector(map)
    }
}

impl Suggester for RandomSearch {
    fn total(&self) -> Option<u64> {
        Some(self.remaining)
    }

    fn next(&mut self, _history: &[(ParameterVector, f64)]) -> Option<ParameterVector> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.draw())
    }
}

/// Nadaraya-Watson kernel regression surrogate over a seeded candidate pool, with an
/// upper-confidence-bound acquisition rule. Deterministic for a fixed seed: the candidate pool
/// is drawn once up front and scored in the same order every run, so ties resolve the same way
/// regardless of machine or thread count.
pub struct BayesianSurrogate {
    space: SearchSpace,
    rng: Pcg64Mcg,
    remaining: u64,
    candidate_pool_size: usize,
    bandwidth: f64,
    ucb_kappa: f64,
}

impl BayesianSurrogate {
    pub fn new(space: SearchSpace, seed: u64, n_iterations: u64) -> Self {
        Self {
            space,
            rng: Pcg64Mcg::seed_from_u64(seed),
            remaining: n_iterations,
            candidate_pool_size: 256,
            bandwidth: 0.25,
            ucb_kappa: 1.5,
        }
    }

    fn sample_candidate(&mut self) -> ParameterVector {
        let mut map = BTreeMap::new();
        for spec in &self.space.params {
            let value = match &spec.domain {
                ParamDomain::IntRange { lo, hi } => ParameterValue::Integer(self.rng.gen_range(*lo..=*hi)),
                ParamDomain::RealInterval { lo, hi } => ParameterValue::Real(self.rng.gen_range(*lo..*hi)),
                ParamDomain::DiscreteReal(values) => {
                    ParameterValue::Real(*values.choose(&mut self.rng).expect("non-empty domain"))
                }
            };
            map.insert(spec.name.clone(), value);
        }
        ParameterVector(map)
    }

    fn standardize(&self, v: &ParameterVector) -> Vec<f64> {
        self.space
            .params
            .iter()
            .map(|spec| {
                let raw = v.get_f64(&spec.name);
                match &spec.domain {
                    ParamDomain::IntRange { lo, hi } => {
                        if hi == lo {
                            0.0
                        } else {
                            (raw - *lo as f64) / (*hi as f64 - *lo as f64)
                        }
                    }
                    ParamDomain::RealInterval { lo, hi } => {
                        if (hi - lo).abs() < f64::EPSILON {
                            0.0
                        } else {
                            (raw - lo) / (hi - lo)
                        }
                    }
                    ParamDomain::DiscreteReal(values) => {
                        let lo = values.iter().cloned().fold(f64::MAX, f64::min);
                        let hi = values.iter().cloned().fold(f64::MIN, f64::max);
                        if (hi - lo).abs() < f64::EPSILON {
                            0.0
                        } else {
                            (raw - lo) / (hi - lo)
                        }
                    }
                }
            })
            .collect()
    }

    fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
    }

    /// Predicts `(mean, uncertainty)` at `candidate` from the observed history, using a
    /// Gaussian kernel over the standardized parameter space. Uncertainty falls as the
    /// effective local sample weight grows, and saturates at 1.0 with no nearby observations.
    fn predict(&self, candidate: &[f64], history: &[(Vec<f64>, f64)]) -> (f64, f64) {
        if history.is_empty() {
            return (0.0, 1.0);
        }
        let weights: Vec<f64> = history
            .iter()
            .map(|(x, _)| (-Self::squared_distance(candidate, x) / (2.0 * self.bandwidth * self.bandwidth)).exp())
            .collect();
        let total_weight: f64 = weights.iter().sum();
        if total_weight < 1e-12 {
            return (0.0, 1.0);
        }
        let mean = weights
            .iter()
            .zip(history.iter())
            .map(|(w, (_, y))| w * y)
            .sum::<f64>()
            / total_weight;
        let uncertainty = 1.0 / (1.0 + total_weight);
        (mean, uncertainty)
    }
}

impl Suggester for BayesianSurrogate {
    fn total(&self) -> Option<u64> {
        Some(self.remaining)
    }

    fn next(&mut self, history: &[(ParameterVector, f64)]) -> Option<ParameterVector> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if history.len() < 3 {
            return Some(self.sample_candidate());
        }

        let standardized_history: Vec<(Vec<f64>, f64)> =
            history.iter().map(|(p, score)| (self.standardize(p), *score)).collect();

        let pool: Vec<ParameterVector> = (0..self.candidate_pool_size)
            .map(|_| self.sample_candidate())
            .collect();

        let mut best: Option<(ParameterVector, f64)> = None;
        for candidate in pool {
            let standardized = self.standardize(&candidate);
            let (mean, uncertainty) = self.predict(&standardized, &standardized_history);
            let acquisition = mean + self.ucb_kappa * uncertainty;
            if best.as_ref().map(|(_, b)| acquisition > *b).unwrap_or(true) {
                best = Some((candidate, acquisition));
            }
        }
        best.map(|(v, _)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParamSpec, SearchSpace};

    fn tiny_space() -> SearchSpace {
        SearchSpace {
            params: vec![
                ParamSpec {
                    name: "a".into(),
                    domain: ParamDomain::IntRange { lo: 0, hi: 2 },
                },
                ParamSpec {
                    name: "b".into(),
                    domain: ParamDomain::DiscreteReal(vec![1.0, 2.0, 3.0]),
                },
            ],
        }
    }

    #[test]
    fn grid_search_visits_every_combination_exactly_once() {
        let mut search = GridSearch::new(tiny_space(), 5);
        assert_eq!(search.total(), Some(9));
        let mut seen = std::collections::HashSet::new();
        while let Some(v) = search.next(&[]) {
            assert!(seen.insert(format!("{:?}", v.0)));
        }
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn random_search_is_deterministic_for_a_fixed_seed() {
        let mut a = RandomSearch::new(tiny_space(), 42, 10);
        let mut b = RandomSearch::new(tiny_space(), 42, 10);
        let seq_a: Vec<_> = std::iter::from_fn(|| a.next(&[])).collect();
        let seq_b: Vec<_> = std::iter::from_fn(|| b.next(&[])).collect();
        assert_eq!(seq_a.len(), 10);
        for (x, y) in seq_a.iter().zip(seq_b.iter()) {
            assert_eq!(x.0, y.0);
        }
    }

    #[test]
    fn bayesian_surrogate_is_deterministic_for_a_fixed_seed() {
        let history = vec![
            (
                ParameterVector(
                    [("a".to_string(), ParameterValue::Integer(1)), ("b".to_string(), ParameterValue::Real(2.0))]
                        .into_iter()
                        .collect(),
                ),
                0.5,
            ),
            (
                ParameterVector(
                    [("a".to_string(), ParameterValue::Integer(0)), ("b".to_string(), ParameterValue::Real(1.0))]
                        .into_iter()
                        .collect(),
                ),
                -0.3,
            ),
            (
                ParameterVector(
                    [("a".to_string(), ParameterValue::Integer(2)), ("b".to_string(), ParameterValue::Real(3.0))]
                        .into_iter()
                        .collect(),
                ),
                0.9,
            ),
        ];
        let mut a = BayesianSurrogate::new(tiny_space(), 7, 5);
        let mut b = BayesianSurrogate::new(tiny_space(), 7, 5);
        let next_a = a.next(&history);
        let next_b = b.next(&history);
        assert_eq!(next_a.map(|v| v.0), next_b.map(|v| v.0));
    }
}
