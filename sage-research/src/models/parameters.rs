//! Pipeline and pre-filter parameters
//!
//! Every field is independently settable. Named presets (`safe`,
//! `lightweight`) set several fields at once and nothing else.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use sage_common::{Error, Result};

/// Weights of the combined score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub quality: f64,
    pub importance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.4,
            quality: 0.3,
            importance: 0.3,
        }
    }
}

impl ScoreWeights {
    /// Weighted sum of the three content scores
    pub fn combine(&self, relevance: f64, quality: f64, importance: f64) -> f64 {
        relevance * self.relevance + quality * self.quality + importance * self.importance
    }
}

/// Accept/reject thresholds for the pre-filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterThresholds {
    pub relevance_min: f64,
    pub quality_min: f64,
    pub importance_min: f64,
    pub confidence_min: f64,
    pub combined_min: f64,
    pub weights: ScoreWeights,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            relevance_min: 0.5,
            quality_min: 0.4,
            importance_min: 0.3,
            confidence_min: 0.5,
            combined_min: 0.5,
            weights: ScoreWeights::default(),
        }
    }
}

impl FilterThresholds {
    pub fn combined_score(&self, relevance: f64, quality: f64, importance: f64) -> f64 {
        self.weights.combine(relevance, quality, importance)
    }

    /// Pure accept/reject decision over the four score fields
    pub fn should_proceed(
        &self,
        relevance: f64,
        quality: f64,
        importance: f64,
        confidence: f64,
    ) -> bool {
        relevance >= self.relevance_min
            && quality >= self.quality_min
            && importance >= self.importance_min
            && confidence >= self.confidence_min
            && self.combined_score(relevance, quality, importance) >= self.combined_min
    }

    pub fn validate(&self) -> Result<()> {
        let bounded = [
            ("relevance_min", self.relevance_min),
            ("quality_min", self.quality_min),
            ("importance_min", self.importance_min),
            ("confidence_min", self.confidence_min),
            ("combined_min", self.combined_min),
        ];
        for (name, value) in bounded {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        let w = self.weights;
        let weights = [w.relevance, w.quality, w.importance];
        if weights.iter().any(|v| !v.is_finite() || *v < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidInput(
                "score weights must be non-negative with a positive sum".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider rate-limit handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Mandatory delay between pre-filter sub-batches
    pub inter_call_interval_ms: u64,
    /// Documents per pre-filter sub-batch
    pub sub_batch_size: usize,
    /// Retries after a rate-limit error before falling back
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
    pub max_backoff_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            inter_call_interval_ms: 1000,
            sub_batch_size: 5,
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_factor: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

/// Pre-filter engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreFilterConfig {
    pub thresholds: FilterThresholds,
    pub rate_limit: RateLimitConfig,
    /// Lifetime of cached scoring results
    pub cache_ttl_secs: u64,
    /// Doubles the inter-call interval
    pub safe_mode: bool,
    /// Consecutive rate-limit exhaustions before the service is bypassed
    pub degrade_after: u32,
    /// How long the service is bypassed once degraded
    pub degrade_cooldown_secs: u64,
}

impl Default for PreFilterConfig {
    fn default() -> Self {
        Self {
            thresholds: FilterThresholds::default(),
            rate_limit: RateLimitConfig::default(),
            cache_ttl_secs: 3600,
            safe_mode: false,
            degrade_after: 3,
            degrade_cooldown_secs: 300,
        }
    }
}

impl PreFilterConfig {
    /// Conservative preset for strict provider quotas
    pub fn safe() -> Self {
        Self {
            safe_mode: true,
            rate_limit: RateLimitConfig {
                sub_batch_size: 3,
                max_retries: 5,
                initial_backoff_ms: 1000,
                ..RateLimitConfig::default()
            },
            degrade_after: 2,
            ..Self::default()
        }
    }

    /// Fast preset for local or generous providers
    pub fn lightweight() -> Self {
        Self {
            rate_limit: RateLimitConfig {
                inter_call_interval_ms: 250,
                sub_batch_size: 10,
                max_retries: 1,
                initial_backoff_ms: 250,
                ..RateLimitConfig::default()
            },
            ..Self::default()
        }
    }

    /// Delay enforced between sub-batches
    pub fn effective_interval(&self) -> Duration {
        let base = Duration::from_millis(self.rate_limit.inter_call_interval_ms);
        if self.safe_mode {
            base * 2
        } else {
            base
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn degrade_cooldown(&self) -> Duration {
        Duration::from_secs(self.degrade_cooldown_secs)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.rate_limit.sub_batch_size == 0 {
            return Err(Error::InvalidInput("sub_batch_size must be at least 1".to_string()));
        }
        if self.rate_limit.backoff_factor < 1.0 {
            return Err(Error::InvalidInput("backoff_factor must be >= 1.0".to_string()));
        }
        Ok(())
    }
}

/// Session pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the pre-filter phase
    pub enable_prefilter: bool,
    /// Results requested per search query
    pub results_per_query: usize,
    /// Cap on documents sent to deep analysis (top-N by combined score)
    pub max_documents_for_analysis: usize,
    pub analysis_batch_size: usize,
    pub analysis_batch_delay_ms: u64,
    /// Importance at or above which an analyzed document becomes a finding
    pub finding_importance_min: f64,
    pub max_findings: usize,
    /// Categories handed to the scoring service
    pub target_categories: Vec<String>,
    /// Key topics kept in the generated knowledge summary
    pub knowledge_top_topics: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_prefilter: true,
            results_per_query: 10,
            max_documents_for_analysis: 20,
            analysis_batch_size: 5,
            analysis_batch_delay_ms: 1000,
            finding_importance_min: 0.7,
            max_findings: 20,
            target_categories: vec![
                "tutorial".to_string(),
                "research".to_string(),
                "news".to_string(),
                "reference".to_string(),
                "discussion".to_string(),
            ],
            knowledge_top_topics: 10,
        }
    }
}

impl PipelineConfig {
    /// Smaller caps and batches for quick sessions
    pub fn lightweight() -> Self {
        Self {
            results_per_query: 5,
            max_documents_for_analysis: 10,
            analysis_batch_size: 3,
            analysis_batch_delay_ms: 250,
            max_findings: 10,
            ..Self::default()
        }
    }

    pub fn analysis_batch_delay(&self) -> Duration {
        Duration::from_millis(self.analysis_batch_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis_batch_size == 0 {
            return Err(Error::InvalidInput("analysis_batch_size must be at least 1".to_string()));
        }
        if self.results_per_query == 0 {
            return Err(Error::InvalidInput("results_per_query must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let weights = ScoreWeights::default();
        let combined = weights.combine(1.0, 0.5, 0.0);
        assert!((combined - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_should_proceed_requires_every_threshold() {
        let t = FilterThresholds::default();
        assert!(t.should_proceed(0.8, 0.7, 0.6, 0.9));
        assert!(!t.should_proceed(0.4, 0.9, 0.9, 0.9)); // relevance
        assert!(!t.should_proceed(0.9, 0.3, 0.9, 0.9)); // quality
        assert!(!t.should_proceed(0.9, 0.9, 0.2, 0.9)); // importance
        assert!(!t.should_proceed(0.9, 0.9, 0.9, 0.4)); // confidence

        // Each minimum met, combined below 0.5
        assert!(!t.should_proceed(0.5, 0.4, 0.3, 0.9));
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(FilterThresholds::default().validate().is_ok());

        let bad = FilterThresholds {
            quality_min: 1.5,
            ..FilterThresholds::default()
        };
        assert!(bad.validate().is_err());

        let zero_weights = FilterThresholds {
            weights: ScoreWeights {
                relevance: 0.0,
                quality: 0.0,
                importance: 0.0,
            },
            ..FilterThresholds::default()
        };
        assert!(zero_weights.validate().is_err());
    }

    #[test]
    fn test_safe_mode_doubles_interval() {
        let normal = PreFilterConfig::default();
        let safe = PreFilterConfig::safe();
        assert_eq!(normal.effective_interval(), Duration::from_millis(1000));
        assert_eq!(safe.effective_interval(), Duration::from_millis(2000));
        assert_eq!(safe.rate_limit.sub_batch_size, 3);
    }

    #[test]
    fn test_presets_only_touch_named_fields() {
        let light = PreFilterConfig::lightweight();
        assert!(!light.safe_mode);
        assert_eq!(light.thresholds, FilterThresholds::default());
        assert_eq!(light.cache_ttl_secs, PreFilterConfig::default().cache_ttl_secs);

        let pipeline = PipelineConfig::lightweight();
        assert!(pipeline.enable_prefilter);
        assert_eq!(pipeline.max_documents_for_analysis, 10);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: PreFilterConfig = toml::from_str(
            r#"
safe_mode = true

[thresholds]
relevance_min = 0.7
"#,
        )
        .unwrap();

        assert!(config.safe_mode);
        assert_eq!(config.thresholds.relevance_min, 0.7);
        assert_eq!(config.thresholds.quality_min, 0.4);
        assert_eq!(config.rate_limit.max_retries, 3);
    }
}
