//! Phase 2: PRE-FILTER
//!
//! Every collected document is scored by the PreFilterEngine. Passing
//! documents are de-duplicated by content hash and capped at
//! `max_documents_for_analysis`, best combined score first.
//!
//! Once a time or budget limit is reached the remaining documents are
//! scored heuristically, so every collected document still gets a result.
//! Scoring calls stuck in rate-limit backoff are abandoned at the deadline.

use anyhow::Result;
use std::collections::HashSet;

use super::runner::SessionRunner;
use crate::models::{CollectionResults, Document, Phase, PreFilterResult, PreprocessingSummary, StopReason};
use crate::services::prefilter::PreFilterEngine;

/// Selection handed to deep analysis
#[derive(Debug, Default)]
pub(super) struct Selection {
    pub documents: Vec<Document>,
    pub duplicates_removed: usize,
    pub capped: usize,
}

/// Keep passing documents, drop content duplicates, keep the best `cap`
pub(super) fn select_for_analysis(documents: &[Document], results: &[PreFilterResult], cap: usize) -> Selection {
    let mut passing: Vec<Document> = documents
        .iter()
        .zip(results)
        .filter(|(_, result)| result.should_proceed)
        .map(|(doc, result)| {
            let mut doc = doc.clone();
            doc.prefilter = Some(result.clone());
            doc
        })
        .collect();

    // Stable sort keeps collection order among equal scores
    passing.sort_by(|a, b| {
        let score = |d: &Document| d.prefilter.as_ref().map_or(0.0, |r| r.combined_score);
        score(b).total_cmp(&score(a))
    });

    let before = passing.len();
    let mut hashes = HashSet::new();
    passing.retain(|doc| {
        let hash = doc
            .prefilter
            .as_ref()
            .map(|r| r.content_hash.clone())
            .unwrap_or_else(|| doc.content_hash());
        hashes.insert(hash)
    });
    let duplicates_removed = before - passing.len();

    let capped = passing.len().saturating_sub(cap);
    passing.truncate(cap);

    Selection {
        documents: passing,
        duplicates_removed,
        capped,
    }
}

impl SessionRunner {
    pub(super) async fn phase_prefilter(&mut self, collection: &CollectionResults) -> Result<Vec<Document>> {
        self.enter_phase(Phase::PreFilter).await?;

        let pipeline = self.ctx.pipeline.clone();
        let documents = &collection.documents;
        let cap = pipeline.max_documents_for_analysis;

        if !pipeline.enable_prefilter {
            let selected: Vec<Document> = documents.iter().take(cap).cloned().collect();
            let output = PreprocessingSummary {
                enabled: false,
                selected: selected.iter().map(|d| d.source_id.clone()).collect(),
                capped: documents.len() - selected.len(),
                ..Default::default()
            };
            self.save_output(Phase::PreFilter, &output).await?;
            self.complete_phase(
                Phase::PreFilter,
                format!("pre-filter disabled, {} documents proceed", selected.len()),
            )
            .await;
            return Ok(selected);
        }

        let engine = self.ctx.prefilter.clone();
        let topic = self.config.topic.clone();
        let categories = &pipeline.target_categories;

        let mut results: Vec<PreFilterResult>;
        let mut truncated = false;
        let mut operator_stop = false;
        let mut heuristic_after_limit = 0;

        if self.halted.is_some() {
            results = engine.filter_heuristic(documents, &topic, categories).await;
            truncated = true;
            heuristic_after_limit = documents.len();
        } else {
            let gate = self.gate.clone();
            let outcome = engine
                .filter_batch(
                    documents,
                    &topic,
                    categories,
                    move |_processed, cost| {
                        let gate = gate.clone();
                        async move { gate.check(cost).await.is_none() }
                    },
                    self.gate.expired(),
                )
                .await;
            results = outcome.results;

            let cost: f64 = results.iter().map(|r| r.cost).sum();
            self.update(|s| s.state.total_cost += cost).await;

            if outcome.halted {
                truncated = true;
                match self.checkpoint(0.0).await? {
                    Some(StopReason::OperatorStop) => operator_stop = true,
                    _ => {
                        let rest = &documents[results.len()..];
                        heuristic_after_limit = rest.len();
                        results.extend(engine.filter_heuristic(rest, &topic, categories).await);
                    }
                }
            }
        }

        let scored = &documents[..results.len()];
        let selection = if operator_stop {
            Selection::default()
        } else {
            select_for_analysis(scored, &results, cap)
        };

        let summary = PreFilterEngine::summarize(&results);
        let output = PreprocessingSummary {
            enabled: true,
            summary: summary.clone(),
            results,
            selected: selection.documents.iter().map(|d| d.source_id.clone()).collect(),
            duplicates_removed: selection.duplicates_removed,
            capped: selection.capped,
            heuristic_after_limit,
            truncated,
        };
        self.save_output(Phase::PreFilter, &output).await?;

        self.complete_phase(
            Phase::PreFilter,
            format!(
                "{}/{} documents passed ({:.0}%), {} selected for analysis",
                summary.passed,
                summary.total,
                summary.pass_rate * 100.0,
                selection.documents.len()
            ),
        )
        .await;

        Ok(selection.documents)
    }
}
