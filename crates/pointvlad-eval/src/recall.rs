use pointvlad_model::Descriptors;

use crate::{error::EvalError, kdtree::DescriptorTree, registry::Submap};

/// Retrieval statistics of one (database, query) submap pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairRecall {
    /// Cumulative recall@1..=depth in percent; all zero when nothing was evaluated.
    pub recall: Vec<f64>,
    /// Dot products of queries with their rank-0 true match.
    pub top1_similarities: Vec<f32>,
    /// Percentage of queries with a true match in the top 1% of the database.
    pub one_percent_recall: f64,
    /// Queries with a non-empty ground-truth set.
    pub num_evaluated: usize,
}

impl PairRecall {
    /// True when no query of the pair had ground truth.
    pub fn is_empty(&self) -> bool {
        self.num_evaluated == 0
    }
}

/// Number of candidates forming the top 1% of a database: `max(round(len / 100), 1)`.
///
/// Halfway cases round to the even neighbor.
pub fn one_percent_threshold(database_len: usize) -> usize {
    ((database_len as f64 / 100.0).round_ties_even() as usize).max(1)
}

/// Evaluate every query of submap `query_set` against database submap `target`.
///
/// * `tree` - index over `database`
/// * `queries` - one descriptor per entry of `query_set`
/// * `recall_depth` - length of the recall curve
///
/// Queries without ground truth in `target` are skipped. Each remaining query
/// retrieves `recall_depth` candidates; the first true match counts at its
/// rank, and any true match among the first `threshold` of those candidates
/// counts towards the top-1% recall. A threshold beyond `recall_depth` never
/// looks past the retrieved list.
pub fn pair_recall(
    tree: &DescriptorTree,
    database: &Descriptors,
    queries: &Descriptors,
    query_set: &Submap,
    target: usize,
    recall_depth: usize,
) -> Result<PairRecall, EvalError> {
    if queries.len() != query_set.len() {
        return Err(EvalError::CountMismatch(query_set.len(), queries.len()));
    }
    if tree.len() != database.len() {
        return Err(EvalError::CountMismatch(database.len(), tree.len()));
    }

    let threshold = one_percent_threshold(database.len());

    let mut hits = vec![0usize; recall_depth];
    let mut top1_similarities = Vec::new();
    let mut one_percent_retrieved = 0usize;
    let mut num_evaluated = 0usize;

    for (entry, query) in query_set.entries.iter().zip(queries.iter()) {
        let true_neighbors = entry.true_neighbors(target);
        if true_neighbors.is_empty() {
            continue;
        }
        num_evaluated += 1;

        let ranked = tree.knn(query, recall_depth)?;

        if let Some(rank) = ranked
            .iter()
            .position(|n| true_neighbors.contains(&n.index))
        {
            if rank == 0 {
                if let Some(matched) = database.row(ranked[0].index) {
                    top1_similarities.push(dot(query, matched));
                }
            }
            hits[rank] += 1;
        }

        if ranked
            .iter()
            .take(threshold.min(ranked.len()))
            .any(|n| true_neighbors.contains(&n.index))
        {
            one_percent_retrieved += 1;
        }
    }

    if num_evaluated == 0 {
        return Ok(PairRecall {
            recall: vec![0.0; recall_depth],
            top1_similarities,
            one_percent_recall: 0.0,
            num_evaluated,
        });
    }

    let denominator = num_evaluated as f64;
    let recall = hits
        .iter()
        .scan(0usize, |acc, &h| {
            *acc += h;
            Some(*acc as f64 / denominator * 100.0)
        })
        .collect();

    Ok(PairRecall {
        recall,
        top1_similarities,
        one_percent_recall: one_percent_retrieved as f64 / denominator * 100.0,
        num_evaluated,
    })
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
