use std::fmt;
use std::path::Path;
use std::time::Instant;

use pointvlad_model::{DescriptorModel, Descriptors};
use pointvlad_nn::ExecutionContext;

use crate::{
    config::EvalConfig,
    error::EvalError,
    generator::BatchDescriptorGenerator,
    kdtree::DescriptorTree,
    loader::PointCloudLoader,
    recall::{pair_recall, PairRecall},
    registry::Submap,
};

/// Averages over all evaluated submap pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Element-wise mean of the per-pair recall curves, in percent.
    pub average_recall: Vec<f64>,
    /// Mean dot product of queries with their rank-0 true match; NaN without samples.
    pub average_top1_similarity: f64,
    /// Mean of the per-pair top-1% recalls, in percent.
    pub average_one_percent_recall: f64,
    /// Pairs that contributed.
    pub num_pairs: usize,
    /// Rank-0 matches behind [`EvaluationResult::average_top1_similarity`].
    pub num_top1_samples: usize,
}

impl EvaluationResult {
    /// Recall@`n` in percent, `n` starting at 1.
    pub fn recall_at(&self, n: usize) -> Option<f64> {
        n.checked_sub(1).and_then(|i| self.average_recall.get(i).copied())
    }

    /// Write the plain-text report.
    pub fn write_report(&self, path: impl AsRef<Path>) -> Result<(), EvalError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_string())?;
        log::info!("wrote evaluation report to {}", path.display());
        Ok(())
    }
}

impl fmt::Display for EvaluationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let curve = self
            .average_recall
            .iter()
            .map(|r| format!("{r:.8}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(f, "Average Recall @N:")?;
        writeln!(f, "[{curve}]")?;
        writeln!(f)?;
        writeln!(f, "Average top1 Similarity:")?;
        writeln!(f, "{}", self.average_top1_similarity)?;
        writeln!(f)?;
        writeln!(f, "Average Top 1 percent Recall:")?;
        write!(f, "{}", self.average_one_percent_recall)
    }
}

/// Leave-one-submap-out retrieval evaluation.
///
/// For every ordered pair of a database submap `m` and a query submap `n`
/// with `m != n`, the descriptors of `n` query an index over those of `m`.
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    config: EvalConfig,
    generator: BatchDescriptorGenerator,
}

impl RetrievalEvaluator {
    /// Create an evaluator; fails on an invalid configuration.
    pub fn new(config: EvalConfig) -> Result<Self, EvalError> {
        config.validate()?;
        let generator = BatchDescriptorGenerator::from_config(&config)?;
        Ok(Self { config, generator })
    }

    /// The protocol constants in use.
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Descriptors of every submap, in submap order.
    pub fn compute_descriptors<M, L>(
        &self,
        ctx: &ExecutionContext,
        model: &mut M,
        loader: &L,
        submaps: &[Submap],
    ) -> Result<Vec<Descriptors>, EvalError>
    where
        M: DescriptorModel + ?Sized,
        L: PointCloudLoader + ?Sized,
    {
        submaps
            .iter()
            .map(|submap| self.generator.generate(ctx, model, loader, submap))
            .collect()
    }

    /// Compute all descriptors with `model`, then score every submap pair.
    ///
    /// Writes the report when the configuration names a path.
    pub fn evaluate<M, L>(
        &self,
        ctx: &ExecutionContext,
        model: &mut M,
        loader: &L,
        database_sets: &[Submap],
        query_sets: &[Submap],
    ) -> Result<EvaluationResult, EvalError>
    where
        M: DescriptorModel + ?Sized,
        L: PointCloudLoader + ?Sized,
    {
        let start = Instant::now();
        let database = self.compute_descriptors(ctx, model, loader, database_sets)?;
        let queries = self.compute_descriptors(ctx, model, loader, query_sets)?;
        log::info!(
            "computed descriptors for {} database and {} query submaps in {:?}",
            database.len(),
            queries.len(),
            start.elapsed()
        );

        let result = self.evaluate_descriptors(ctx, &database, &queries, query_sets)?;
        if let Some(path) = &self.config.report_path {
            result.write_report(path)?;
        }
        Ok(result)
    }

    /// Score every pair `(m, n)`, `m != n`, of precomputed descriptors.
    ///
    /// * `database` - descriptors of database submap `m`
    /// * `queries` - descriptors of query submap `n`
    /// * `query_sets` - ground truth of query submap `n`, keyed by `m`
    pub fn evaluate_descriptors(
        &self,
        ctx: &ExecutionContext,
        database: &[Descriptors],
        queries: &[Descriptors],
        query_sets: &[Submap],
    ) -> Result<EvaluationResult, EvalError> {
        if queries.len() != query_sets.len() {
            return Err(EvalError::CountMismatch(query_sets.len(), queries.len()));
        }
        let depth = self.config.recall_depth;

        let mut pairs = Vec::new();
        for (m, db) in database.iter().enumerate() {
            let cached = self.config.cache_database_index.then(|| DescriptorTree::new(db));
            let results = ctx.map_indices(queries.len(), |n| -> Result<Option<PairRecall>, EvalError> {
                if m == n {
                    return Ok(None);
                }
                let pair = match &cached {
                    Some(tree) => pair_recall(tree, db, &queries[n], &query_sets[n], m, depth)?,
                    None => {
                        let tree = DescriptorTree::new(db);
                        pair_recall(&tree, db, &queries[n], &query_sets[n], m, depth)?
                    }
                };
                Ok(Some(pair))
            });

            for (n, result) in results.into_iter().enumerate() {
                match result? {
                    Some(pair) if pair.is_empty() => {
                        log::debug!(
                            "skipping database {m} for {}: no query with ground truth",
                            query_sets[n].name
                        );
                    }
                    Some(pair) => pairs.push(pair),
                    None => {}
                }
            }
        }

        aggregate(&pairs, depth)
    }
}

/// Average the per-pair statistics.
fn aggregate(pairs: &[PairRecall], depth: usize) -> Result<EvaluationResult, EvalError> {
    if pairs.is_empty() {
        return Err(EvalError::NoEvaluatedPairs);
    }
    let count = pairs.len() as f64;

    let mut average_recall = vec![0.0; depth];
    for pair in pairs {
        average_recall
            .iter_mut()
            .zip(pair.recall.iter())
            .for_each(|(a, r)| *a += r);
    }
    average_recall.iter_mut().for_each(|a| *a /= count);

    let similarities = pairs
        .iter()
        .flat_map(|p| p.top1_similarities.iter().map(|&s| s as f64))
        .collect::<Vec<_>>();
    let average_top1_similarity = if similarities.is_empty() {
        log::warn!("no query was matched at rank 0; top-1 similarity is undefined");
        f64::NAN
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    };

    let average_one_percent_recall =
        pairs.iter().map(|p| p.one_percent_recall).sum::<f64>() / count;

    let result = EvaluationResult {
        average_recall,
        average_top1_similarity,
        average_one_percent_recall,
        num_pairs: pairs.len(),
        num_top1_samples: similarities.len(),
    };
    log::info!(
        "recall@1 {:.2}%, top-1% recall {:.2}%, top-1 similarity {:.4} over {} pairs",
        result.recall_at(1).unwrap_or(f64::NAN),
        result.average_one_percent_recall,
        result.average_top1_similarity,
        result.num_pairs
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubmapEntry;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn entry(neighbors: &[(usize, Vec<usize>)]) -> SubmapEntry {
        SubmapEntry {
            file: PathBuf::from("unused.bin"),
            neighbors: neighbors.iter().cloned().collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(matches!(aggregate(&[], 25), Err(EvalError::NoEvaluatedPairs)));
    }

    #[test]
    fn test_aggregate_averages() -> Result<(), EvalError> {
        let pairs = [
            PairRecall {
                recall: vec![50.0, 100.0],
                top1_similarities: vec![0.5],
                one_percent_recall: 50.0,
                num_evaluated: 2,
            },
            PairRecall {
                recall: vec![100.0, 100.0],
                top1_similarities: vec![1.0, 0.0],
                one_percent_recall: 100.0,
                num_evaluated: 2,
            },
        ];
        let result = aggregate(&pairs, 2)?;
        assert_eq!(result.average_recall, vec![75.0, 100.0]);
        assert_eq!(result.average_top1_similarity, 0.5);
        assert_eq!(result.average_one_percent_recall, 75.0);
        assert_eq!(result.num_top1_samples, 3);
        assert_eq!(result.recall_at(1), Some(75.0));
        assert_eq!(result.recall_at(0), None);
        Ok(())
    }

    #[test]
    fn test_no_top1_sample_is_nan() -> Result<(), EvalError> {
        let pairs = [PairRecall {
            recall: vec![0.0],
            top1_similarities: Vec::new(),
            one_percent_recall: 0.0,
            num_evaluated: 1,
        }];
        let result = aggregate(&pairs, 1)?;
        assert!(result.average_top1_similarity.is_nan());
        Ok(())
    }

    #[test]
    fn test_self_pairs_are_skipped() -> Result<(), EvalError> {
        // every query matches itself in its own submap, which must never be scored
        let descriptors = Descriptors::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]], 2)?;
        let set = Submap::new("only", vec![entry(&[(0, vec![0])]), entry(&[(0, vec![1])])]);

        let evaluator = RetrievalEvaluator::new(EvalConfig::default())?;
        let result = evaluator.evaluate_descriptors(
            &ExecutionContext::cpu(),
            &[descriptors.clone()],
            &[descriptors],
            &[set],
        );
        assert!(matches!(result, Err(EvalError::NoEvaluatedPairs)));
        Ok(())
    }

    #[test]
    fn test_report_layout() -> Result<(), EvalError> {
        let result = EvaluationResult {
            average_recall: vec![50.0, 100.0],
            average_top1_similarity: 0.75,
            average_one_percent_recall: 100.0,
            num_pairs: 2,
            num_top1_samples: 1,
        };
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("result.txt");
        result.write_report(&path)?;

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "Average Recall @N:\n[50.00000000 100.00000000]\n\n\
             Average top1 Similarity:\n0.75\n\n\
             Average Top 1 percent Recall:\n100"
        );
        Ok(())
    }
}
