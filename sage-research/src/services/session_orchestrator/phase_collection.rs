//! Phase 1: COLLECTION
//!
//! Issues planned queries in order, accumulating documents de-duplicated by
//! source id. A failing query is recorded and skipped. Each provider call is
//! bounded by the remaining session time.

use anyhow::Result;
use std::collections::HashSet;

use super::runner::{SessionRunner, ABANDONED};
use crate::models::{CollectionResults, Document, Phase, QueryRecord};
use crate::services::query_planner::plan_queries;

impl SessionRunner {
    pub(super) async fn phase_collection(&mut self) -> Result<CollectionResults> {
        self.enter_phase(Phase::Collection).await?;

        let queries = plan_queries(&self.config);
        let total = queries.len();
        let per_query = self.ctx.pipeline.results_per_query;
        let mut output = CollectionResults {
            planned_queries: queries.clone(),
            ..Default::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for (index, query) in queries.iter().enumerate() {
            if let Some(reason) = self.checkpoint(0.0).await? {
                output.truncated = true;
                output.stop_reason = Some(reason);
                self.save_output(Phase::Collection, &output).await?;
                break;
            }

            let mut record = QueryRecord {
                query: query.clone(),
                engine_used: None,
                results: 0,
                new_documents: 0,
                quota_remaining: None,
                error: None,
                quota_exhausted: false,
            };

            let mut abandoned = false;
            match self.gate.bounded(self.ctx.search.search(query, per_query)).await {
                Some(Ok(outcome)) => {
                    record.results = outcome.results.len();
                    record.engine_used = Some(outcome.engine_used.clone());
                    record.quota_remaining = outcome.quota_remaining;

                    for hit in outcome.results {
                        let doc = Document::new(outcome.engine_used.clone(), hit.title, hit.body, hit.url)
                            .with_query(query.clone());
                        if seen.insert(doc.source_id.clone()) {
                            output.documents.push(doc);
                            record.new_documents += 1;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        query = %query,
                        quota_exhausted = e.is_quota_exhausted(),
                        error = %e,
                        "Search query failed, continuing"
                    );
                    record.quota_exhausted = e.is_quota_exhausted();
                    record.error = Some(e.to_string());
                }
                None => {
                    abandoned = true;
                    record.error = Some(ABANDONED.to_string());
                }
            }

            output.queries.push(record);
            output.total_documents = output.documents.len();

            let collected = output.documents.len();
            self.update(|s| s.state.documents_collected = collected).await;

            if abandoned {
                output.truncated = true;
                output.stop_reason = self.checkpoint(0.0).await?;
            }
            self.save_output(Phase::Collection, &output).await?;

            self.notify(
                Phase::Collection,
                (index + 1) as f64 / total as f64,
                format!("query {}/{}: {} documents so far", index + 1, total, collected),
            )
            .await;

            if abandoned {
                break;
            }
        }

        let failed = output.queries.iter().filter(|q| q.error.is_some()).count();
        self.complete_phase(
            Phase::Collection,
            format!(
                "collected {} documents from {} queries ({} failed)",
                output.total_documents,
                output.queries.len(),
                failed
            ),
        )
        .await;

        Ok(output)
    }
}
