//! Search query generation for the collection phase
//!
//! Depth 1 yields three queries; each further level adds two more
//! (3, 5, 7, 9, 11). Order is stable and queries are issued in that order.

use crate::models::SessionConfig;

const BASE_TEMPLATES: [&str; 3] = ["{topic}", "{topic} introduction", "{topic} best practices"];

/// Pairs added per depth level beyond the first
const DEPTH_TEMPLATES: [[&str; 2]; 4] = [
    ["{topic} advanced techniques", "{topic} common pitfalls"],
    ["{topic} research papers", "{topic} case studies"],
    ["{topic} performance benchmarks", "{topic} comparison with alternatives"],
    ["{topic} latest developments", "{topic} expert discussion"],
];

/// Number of queries issued at `depth_level`
pub fn query_count(depth_level: u8) -> usize {
    3 + 2 * usize::from(depth_level.max(1) - 1)
}

/// Queries for a session, in issue order
pub fn plan_queries(config: &SessionConfig) -> Vec<String> {
    let topic = config.topic.trim();
    let extra_levels = usize::from(config.depth_level.max(1) - 1).min(DEPTH_TEMPLATES.len());

    let mut queries: Vec<String> = BASE_TEMPLATES
        .iter()
        .chain(DEPTH_TEMPLATES.iter().take(extra_levels).flatten())
        .map(|template| template.replace("{topic}", topic))
        .collect();

    // Non-default learning types steer the introductory query
    let learning_type = config.learning_type.trim();
    if !learning_type.is_empty() && learning_type != "general" {
        queries[1] = format!("{} {}", topic, learning_type);
    }

    queries
}
