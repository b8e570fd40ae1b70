//! Aggregate statistics over a set of pre-filter results

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{PreFilterResult, ScorerKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSummary {
    pub total: usize,
    pub passed: usize,
    pub rejected: usize,
    /// Fraction of results that passed, 0.0 for an empty set
    pub pass_rate: f64,
    pub cache_hits: usize,
    pub service_scored: usize,
    pub heuristic_scored: usize,
    pub total_cost: f64,
    pub avg_relevance: f64,
    pub avg_quality: f64,
    pub avg_importance: f64,
    pub categories: BTreeMap<String, usize>,
}

impl FilterSummary {
    /// Total over any input, including an empty one
    pub fn from_results(results: &[PreFilterResult]) -> Self {
        if results.is_empty() {
            return Self::default();
        }

        let total = results.len();
        let n = total as f64;
        let passed = results.iter().filter(|r| r.should_proceed).count();
        let mut categories = BTreeMap::new();
        for r in results {
            *categories.entry(r.category.clone()).or_insert(0) += 1;
        }

        Self {
            total,
            passed,
            rejected: total - passed,
            pass_rate: passed as f64 / n,
            cache_hits: results.iter().filter(|r| r.cache_hit).count(),
            service_scored: results.iter().filter(|r| r.scorer == ScorerKind::Service).count(),
            heuristic_scored: results.iter().filter(|r| r.scorer == ScorerKind::Heuristic).count(),
            total_cost: results.iter().map(|r| r.cost).sum(),
            avg_relevance: results.iter().map(|r| r.relevance).sum::<f64>() / n,
            avg_quality: results.iter().map(|r| r.quality).sum::<f64>() / n,
            avg_importance: results.iter().map(|r| r.importance).sum::<f64>() / n,
            categories,
        }
    }
}
