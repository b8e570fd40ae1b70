//! Phase 4: INTEGRATION
//!
//! Folds analysis output into a knowledge summary. When deep analysis
//! produced nothing, the pre-filter scores of the selected documents are
//! used instead.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};

use super::runner::SessionRunner;
use crate::models::{
    AnalysisResults, AverageScores, Document, Finding, GeneratedKnowledge, KnowledgeSource, Phase,
    TopicCount,
};

/// Scores and labels of one document feeding the summary
struct Contribution<'a> {
    relevance: f64,
    quality: f64,
    importance: f64,
    category: &'a str,
    key_topics: &'a [String],
}

pub(super) fn build_knowledge(
    topic: &str,
    selected: &[Document],
    analysis: &AnalysisResults,
    findings: Vec<Finding>,
    top_topics: usize,
) -> GeneratedKnowledge {
    let (source, contributions): (KnowledgeSource, Vec<Contribution>) = if !analysis.analyzed.is_empty() {
        let rows = analysis
            .analyzed
            .iter()
            .map(|a| Contribution {
                relevance: a.relevance,
                quality: a.quality,
                importance: a.importance,
                category: &a.category,
                key_topics: &a.key_topics,
            })
            .collect();
        (KnowledgeSource::DeepAnalysis, rows)
    } else {
        let rows: Vec<Contribution> = selected
            .iter()
            .filter_map(|d| d.prefilter.as_ref())
            .map(|r| Contribution {
                relevance: r.relevance,
                quality: r.quality,
                importance: r.importance,
                category: &r.category,
                key_topics: &r.key_topics,
            })
            .collect();
        if rows.is_empty() {
            (KnowledgeSource::Empty, rows)
        } else {
            (KnowledgeSource::PreFilter, rows)
        }
    };

    let mut category_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut topic_counts: HashMap<String, usize> = HashMap::new();
    let mut sums = AverageScores::default();

    for row in &contributions {
        *category_distribution.entry(row.category.to_string()).or_default() += 1;
        for key_topic in row.key_topics {
            let normalized = key_topic.trim().to_lowercase();
            if !normalized.is_empty() {
                *topic_counts.entry(normalized).or_default() += 1;
            }
        }
        sums.relevance += row.relevance;
        sums.quality += row.quality;
        sums.importance += row.importance;
    }

    let n = contributions.len();
    let average_scores = if n == 0 {
        AverageScores::default()
    } else {
        AverageScores {
            relevance: sums.relevance / n as f64,
            quality: sums.quality / n as f64,
            importance: sums.importance / n as f64,
        }
    };

    let mut top_key_topics: Vec<TopicCount> = topic_counts
        .into_iter()
        .map(|(topic, count)| TopicCount { topic, count })
        .collect();
    top_key_topics.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));
    top_key_topics.truncate(top_topics);

    GeneratedKnowledge {
        topic: topic.to_string(),
        source,
        documents_considered: n,
        category_distribution,
        top_key_topics,
        average_scores,
        findings,
    }
}

impl SessionRunner {
    pub(super) async fn phase_integration(&mut self, selected: &[Document], analysis: &AnalysisResults) -> Result<()> {
        self.enter_phase(Phase::Integration).await?;

        let findings = self.handle.session.lock().await.state.important_findings.clone();
        let knowledge = build_knowledge(
            &self.config.topic,
            selected,
            analysis,
            findings,
            self.ctx.pipeline.knowledge_top_topics,
        );
        self.save_output(Phase::Integration, &knowledge).await?;

        self.complete_phase(
            Phase::Integration,
            format!(
                "knowledge built from {} documents ({:?}), {} findings",
                knowledge.documents_considered,
                knowledge.source,
                knowledge.findings.len()
            ),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalyzedDocument, FilterThresholds, PreFilterResult, ScorerKind};

    fn analyzed(id: &str, category: &str, importance: f64, topics: &[&str]) -> AnalyzedDocument {
        AnalyzedDocument {
            source_id: id.to_string(),
            title: id.to_uppercase(),
            url: format!("https://{}.example", id),
            relevance: 0.8,
            quality: 0.6,
            importance,
            confidence: 0.9,
            category: category.to_string(),
            key_topics: topics.iter().map(|t| t.to_string()).collect(),
            summary: String::new(),
            tokens: 100,
            cost: 0.01,
        }
    }

    #[test]
    fn test_knowledge_from_deep_analysis() {
        let analysis = AnalysisResults {
            analyzed: vec![
                analyzed("a", "tutorial", 0.9, &["Tokio", "async"]),
                analyzed("b", "tutorial", 0.5, &["tokio", "futures"]),
                analyzed("c", "research", 0.7, &["async", "executors"]),
            ],
            ..Default::default()
        };

        let knowledge = build_knowledge("rust async", &[], &analysis, vec![], 2);

        assert_eq!(knowledge.source, KnowledgeSource::DeepAnalysis);
        assert_eq!(knowledge.documents_considered, 3);
        assert_eq!(knowledge.category_distribution.get("tutorial"), Some(&2));
        assert_eq!(knowledge.category_distribution.get("research"), Some(&1));
        // Ties broken alphabetically
        let topics: Vec<(&str, usize)> = knowledge
            .top_key_topics
            .iter()
            .map(|t| (t.topic.as_str(), t.count))
            .collect();
        assert_eq!(topics, vec![("async", 2), ("tokio", 2)]);
        assert!((knowledge.average_scores.importance - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_knowledge_falls_back_to_prefilter_scores() {
        let mut doc = Document::new("web", "Title", "Body", "https://x.example");
        doc.prefilter = Some(PreFilterResult::scored(
            doc.source_id.clone(),
            doc.content_hash(),
            0.7,
            0.6,
            0.5,
            0.6,
            "reference".into(),
            vec!["graphs".into()],
            String::new(),
            0.0,
            ScorerKind::Heuristic,
            &FilterThresholds::default(),
        ));

        let knowledge = build_knowledge("graphs", &[doc], &AnalysisResults::default(), vec![], 10);
        assert_eq!(knowledge.source, KnowledgeSource::PreFilter);
        assert_eq!(knowledge.documents_considered, 1);
        assert_eq!(knowledge.top_key_topics[0].topic, "graphs");
    }

    #[test]
    fn test_knowledge_without_any_input() {
        let knowledge = build_knowledge("nothing", &[], &AnalysisResults::default(), vec![], 10);
        assert_eq!(knowledge.source, KnowledgeSource::Empty);
        assert_eq!(knowledge.documents_considered, 0);
        assert_eq!(knowledge.average_scores, AverageScores::default());
        assert!(knowledge.category_distribution.is_empty());
    }
}
