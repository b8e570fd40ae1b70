//! Deterministic fallback scorer
//!
//! Used when the scoring service is unavailable, keeps rate limiting after
//! retries, or the engine is in degraded mode. Same input, same output.
//!
//! - relevance: topic keyword overlap, title weighted
//! - quality: source domain plus body length
//! - importance: topic keyword density plus numeric density

use std::collections::{BTreeMap, HashSet};

use crate::models::MAX_KEY_TOPICS;

/// Confidence reported for every heuristic score
pub const HEURISTIC_CONFIDENCE: f64 = 0.6;

const TITLE_WEIGHT: f64 = 0.6;
const BODY_WEIGHT: f64 = 0.4;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "but", "not",
    "you", "your", "how", "what", "why", "when", "which", "who", "into", "about", "over",
    "its", "has", "have", "had", "can", "will", "all", "any", "our", "their", "they", "them",
    "then", "than", "there", "these", "those", "also", "more", "most", "such", "use", "using",
    "been", "being", "does", "did", "just", "only", "very",
];

const CATEGORY_CUES: &[(&str, &[&str])] = &[
    ("tutorial", &["tutorial", "guide", "how to", "getting started", "step by step", "walkthrough"]),
    ("research", &["study", "paper", "research", "arxiv", "experiment", "findings"]),
    ("news", &["announce", "announced", "release", "released", "news", "today"]),
    ("reference", &["documentation", "reference", "api", "specification", "manual"]),
    ("discussion", &["forum", "discussion", "thread", "opinion", "comments", "reddit"]),
];

/// Heuristic scores for one document
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicScore {
    pub relevance: f64,
    pub quality: f64,
    pub importance: f64,
    pub confidence: f64,
    pub category: String,
    pub key_topics: Vec<String>,
    pub reason: String,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn is_keyword(token: &str) -> bool {
    token.chars().count() >= 3
        && !STOPWORDS.contains(&token)
        && !token.chars().all(|c| c.is_ascii_digit())
}

fn topic_keywords(topic: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(topic)
        .into_iter()
        .filter(|t| is_keyword(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn overlap(keywords: &[String], tokens: &HashSet<&str>) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let hits = keywords.iter().filter(|k| tokens.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

fn domain_score(url: &str) -> f64 {
    let url = url.trim().to_lowercase();
    if url.is_empty() {
        return 0.3;
    }
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url.as_str())
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("");

    let base = if host.ends_with(".edu") || host.ends_with(".gov") {
        0.9
    } else if host.contains("wikipedia.org")
        || host.starts_with("docs.")
        || host.contains("github.com")
        || host.contains("arxiv.org")
    {
        0.8
    } else if host.ends_with(".org") {
        0.7
    } else {
        0.5
    };

    if url.starts_with("https://") {
        (base + 0.05_f64).min(1.0)
    } else {
        base
    }
}

fn length_score(word_count: usize) -> f64 {
    match word_count {
        0..=49 => 0.2,
        50..=199 => 0.5,
        200..=1999 => 0.8,
        _ => 0.7,
    }
}

fn pick_category(text_lower: &str, targets: &[String]) -> String {
    let mut best: Option<(&str, usize)> = None;

    for target in targets {
        let target_lower = target.to_lowercase();
        let hits = match CATEGORY_CUES.iter().find(|(name, _)| *name == target_lower) {
            Some((_, cues)) => cues.iter().filter(|cue| text_lower.contains(*cue)).count(),
            None => usize::from(text_lower.contains(target_lower.as_str())),
        };
        if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
            best = Some((target.as_str(), hits));
        }
    }

    best.map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "general".to_string())
}

fn key_topics(tokens: &[String]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for token in tokens.iter().filter(|t| t.chars().count() >= 4 && is_keyword(t)) {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // BTreeMap order makes ties alphabetical
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
        .into_iter()
        .take(MAX_KEY_TOPICS)
        .map(|(t, _)| t.to_string())
        .collect()
}

/// Score a document without calling any service
pub fn score(title: &str, body: &str, url: &str, topic: &str, categories: &[String]) -> HeuristicScore {
    let keywords = topic_keywords(topic);
    let title_tokens = tokenize(title);
    let body_tokens = tokenize(body);

    let title_set: HashSet<&str> = title_tokens.iter().map(String::as_str).collect();
    let body_set: HashSet<&str> = body_tokens.iter().map(String::as_str).collect();
    let relevance =
        TITLE_WEIGHT * overlap(&keywords, &title_set) + BODY_WEIGHT * overlap(&keywords, &body_set);

    let quality = 0.5 * domain_score(url) + 0.5 * length_score(body_tokens.len());

    let all_tokens: Vec<String> = title_tokens.iter().chain(body_tokens.iter()).cloned().collect();
    let total = all_tokens.len().max(1) as f64;
    let keyword_set: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let keyword_hits = all_tokens.iter().filter(|t| keyword_set.contains(t.as_str())).count();
    let numeric_hits = all_tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .count();
    let keyword_density = (keyword_hits as f64 / total * 10.0).min(1.0);
    let numeric_density = (numeric_hits as f64 / total * 20.0).min(1.0);
    let importance = 0.7 * keyword_density + 0.3 * numeric_density;

    let text_lower = format!("{}\n{}", title, body).to_lowercase();

    HeuristicScore {
        relevance: relevance.clamp(0.0, 1.0),
        quality: quality.clamp(0.0, 1.0),
        importance: importance.clamp(0.0, 1.0),
        confidence: HEURISTIC_CONFIDENCE,
        category: pick_category(&text_lower, categories),
        key_topics: key_topics(&all_tokens),
        reason: format!(
            "heuristic: {}/{} topic keywords matched, {} body words",
            keywords
                .iter()
                .filter(|k| title_set.contains(k.as_str()) || body_set.contains(k.as_str()))
                .count(),
            keywords.len(),
            body_tokens.len()
        ),
    }
}
