//! Phase 3: DEEP ANALYSIS
//!
//! Selected documents are scored in deep mode, `analysis_batch_size` at a
//! time with a delay between batches. Documents within a batch run
//! concurrently. A failed document is recorded and the batch continues.

use anyhow::Result;
use futures::future::join_all;

use super::runner::{SessionRunner, ABANDONED};
use crate::models::document::normalize_score;
use crate::models::{
    AnalysisFailure, AnalysisResults, AnalyzedDocument, Document, Finding, Phase, MAX_KEY_TOPICS,
};
use crate::services::scoring_service::{ScoreRequest, ScoringMode};
use crate::utils::{retry_with_backoff, RetryPolicy};

enum DocumentOutcome {
    Analyzed(AnalyzedDocument),
    Failed(String),
    /// Cut off by the deadline or an operator stop
    Abandoned,
}

impl SessionRunner {
    pub(super) async fn phase_analysis(&mut self, selected: &[Document]) -> Result<AnalysisResults> {
        self.enter_phase(Phase::DeepAnalysis).await?;

        let mut output = AnalysisResults::default();

        let skipped = if let Some(reason) = self.halted {
            Some(format!("{} reached before analysis", reason.as_str()))
        } else if selected.is_empty() {
            Some("no documents passed the pre-filter".to_string())
        } else {
            None
        };
        if let Some(reason) = skipped {
            output.truncated = self.halted.is_some();
            output.skipped_reason = Some(reason.clone());
            self.save_output(Phase::DeepAnalysis, &output).await?;
            self.complete_phase(Phase::DeepAnalysis, format!("skipped: {}", reason)).await;
            return Ok(output);
        }

        let pipeline = self.ctx.pipeline.clone();
        let batch_size = pipeline.analysis_batch_size.max(1);
        let batches: Vec<&[Document]> = selected.chunks(batch_size).collect();
        let total_batches = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 {
                self.gate.sleep(pipeline.analysis_batch_delay()).await;
            }
            if self.checkpoint(0.0).await?.is_some() {
                output.truncated = true;
                self.save_output(Phase::DeepAnalysis, &output).await?;
                break;
            }

            let outcomes = join_all(batch.iter().map(|doc| self.analyze_document(doc))).await;

            let mut abandoned = false;
            let mut batch_cost = 0.0;
            let mut processed = 0;
            let mut findings = Vec::new();
            for (doc, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    DocumentOutcome::Analyzed(analyzed) => {
                        batch_cost += analyzed.cost;
                        processed += 1;
                        if analyzed.importance >= pipeline.finding_importance_min {
                            findings.push(Finding {
                                source_id: analyzed.source_id.clone(),
                                title: analyzed.title.clone(),
                                url: analyzed.url.clone(),
                                category: analyzed.category.clone(),
                                importance: analyzed.importance,
                                summary: analyzed.summary.clone(),
                            });
                        }
                        output.analyzed.push(analyzed);
                    }
                    DocumentOutcome::Failed(error) => {
                        tracing::warn!(
                            session_id = %self.session_id,
                            source_id = %doc.source_id,
                            error = %error,
                            "Deep analysis failed for document"
                        );
                        output.failures.push(AnalysisFailure {
                            source_id: doc.source_id.clone(),
                            error,
                        });
                    }
                    DocumentOutcome::Abandoned => {
                        abandoned = true;
                        output.failures.push(AnalysisFailure {
                            source_id: doc.source_id.clone(),
                            error: ABANDONED.to_string(),
                        });
                    }
                }
            }

            output.total_cost += batch_cost;
            output.batches_completed += 1;
            let max_findings = pipeline.max_findings;
            self.update(|s| {
                s.state.total_cost += batch_cost;
                s.state.documents_processed += processed;
                let room = max_findings.saturating_sub(s.state.important_findings.len());
                s.state.important_findings.extend(findings.into_iter().take(room));
            })
            .await;

            if abandoned {
                output.truncated = true;
                self.checkpoint(0.0).await?;
            }
            self.save_output(Phase::DeepAnalysis, &output).await?;

            self.notify(
                Phase::DeepAnalysis,
                (index + 1) as f64 / total_batches as f64,
                format!(
                    "batch {}/{}: {} analyzed, {} failed",
                    index + 1,
                    total_batches,
                    output.analyzed.len(),
                    output.failures.len()
                ),
            )
            .await;

            if abandoned {
                break;
            }
        }

        self.complete_phase(
            Phase::DeepAnalysis,
            format!(
                "analyzed {} documents ({} failed), cost ${:.4}",
                output.analyzed.len(),
                output.failures.len(),
                output.total_cost
            ),
        )
        .await;

        Ok(output)
    }

    async fn analyze_document(&self, doc: &Document) -> DocumentOutcome {
        let request = ScoreRequest {
            text: doc.scoring_text(),
            topic: self.config.topic.clone(),
            categories: self.ctx.pipeline.target_categories.clone(),
            mode: ScoringMode::Deep,
        };
        let policy = RetryPolicy::from_rate_limit(&self.ctx.prefilter.config().rate_limit);
        let scoring = &self.ctx.scoring;

        let attempt = retry_with_backoff("deep analysis", &policy, || scoring.score(&request));
        let response = match self.gate.bounded(attempt).await {
            None => return DocumentOutcome::Abandoned,
            Some(Err(e)) => return DocumentOutcome::Failed(e.to_string()),
            Some(Ok(response)) => response,
        };

        let mut key_topics = response.key_topics;
        key_topics.retain(|t| !t.trim().is_empty());
        key_topics.truncate(MAX_KEY_TOPICS);

        DocumentOutcome::Analyzed(AnalyzedDocument {
            source_id: doc.source_id.clone(),
            title: doc.title.clone(),
            url: doc.url.clone(),
            relevance: normalize_score(response.relevance),
            quality: normalize_score(response.quality),
            importance: normalize_score(response.importance),
            confidence: normalize_score(response.confidence),
            category: if response.category.trim().is_empty() {
                "general".to_string()
            } else {
                response.category
            },
            key_topics,
            summary: response.summary,
            tokens: response.tokens,
            cost: if response.cost.is_finite() { response.cost.max(0.0) } else { 0.0 },
        })
    }
}
