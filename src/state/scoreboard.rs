use std::collections::HashMap;

use crate::messages::ScoreRow;

/// Ranked standings: score descending, ties broken by name ascending.
/// Recomputed on demand; never mutates.
pub fn standings(scores: &HashMap<String, u32>) -> Vec<ScoreRow> {
    let mut rows: Vec<ScoreRow> = scores
        .iter()
        .map(|(name, score)| ScoreRow {
            name: name.clone(),
            score: *score,
        })
        .collect();
    rows.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
    rows
}
