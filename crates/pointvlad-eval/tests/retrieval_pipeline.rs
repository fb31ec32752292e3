use std::path::Path;

use pointvlad_eval::{
    BinPointCloudLoader, EvalConfig, EvalError, JsonSubmapRegistry, RetrievalEvaluator,
    SubmapRegistry,
};
use pointvlad_model::{DescriptorNetwork, Descriptors, ModelConfig};
use pointvlad_nn::ExecutionContext;
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_POINTS: usize = 16;
const CLOUDS: usize = 3;

fn model_config() -> ModelConfig {
    ModelConfig {
        num_points: NUM_POINTS,
        emb_dims: 32,
        output_dim: 16,
        cluster_size: 8,
        seed: 7,
        ..Default::default()
    }
}

fn write_cloud(path: &Path, rng: &mut StdRng) -> std::io::Result<()> {
    let bytes = (0..NUM_POINTS * 3)
        .flat_map(|_| rng.random_range(-1.0f64..1.0).to_le_bytes())
        .collect::<Vec<_>>();
    std::fs::write(path, bytes)
}

/// Two traversals that visit the same places; cloud `i` of one matches cloud `i` of the other.
fn write_dataset(root: &Path) -> std::io::Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    std::fs::create_dir_all(root.join("clouds"))?;
    for i in 0..CLOUDS {
        write_cloud(&root.join(format!("clouds/{i}.bin")), &mut rng)?;
    }

    let submap = |target: usize| {
        (0..CLOUDS)
            .map(|i| {
                format!(
                    r#""{i}": {{"query": "clouds/{i}.bin", "neighbors": {{"{target}": [{i}]}}}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    let dataset = format!("[{{{}}}, {{{}}}]", submap(1), submap(0));
    std::fs::write(root.join("database.json"), &dataset)?;
    std::fs::write(root.join("query.json"), &dataset)
}

#[test]
fn shared_places_are_recalled_at_rank_one() -> Result<(), EvalError> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;

    let registry = JsonSubmapRegistry::new(dir.path());
    let database = registry.submaps("database")?;
    let queries = registry.submaps("query")?;
    assert_eq!(database.len(), 2);

    let loader = BinPointCloudLoader::new(dir.path(), NUM_POINTS);
    let mut network = DescriptorNetwork::new(model_config())?;

    let report_path = dir.path().join("results.txt");
    let evaluator = RetrievalEvaluator::new(EvalConfig {
        recall_depth: 5,
        eval_batch_size: 1,
        positives_per_query: 1,
        negatives_per_query: 0,
        report_path: Some(report_path.clone()),
        ..Default::default()
    })?;

    let result = evaluator.evaluate(
        &ExecutionContext::cpu_parallel(),
        &mut network,
        &loader,
        &database,
        &queries,
    )?;

    // (0, 1) and (1, 0); the self pairs never count
    assert_eq!(result.num_pairs, 2);
    assert_eq!(result.average_recall.len(), 5);
    assert!(result.average_recall.iter().all(|&r| r == 100.0));
    assert_eq!(result.average_one_percent_recall, 100.0);
    assert_eq!(result.num_top1_samples, 2 * CLOUDS);
    // matched clouds are identical, so each sample is a squared descriptor norm
    assert!(result.average_top1_similarity > 0.0);

    let report = std::fs::read_to_string(&report_path)?;
    assert!(report.starts_with("Average Recall @N:\n["));
    assert!(report.contains("Average Top 1 percent Recall:\n100"));
    Ok(())
}

#[test]
fn cached_and_per_pair_indices_agree() -> Result<(), EvalError> {
    let mut rng = StdRng::seed_from_u64(3);
    let mut random = |rows: usize| {
        let data = (0..rows * 4).map(|_| rng.random_range(-1.0..1.0)).collect();
        Descriptors::new(data, rows, 4)
    };
    let database = vec![random(20)?, random(25)?, random(10)?];
    let queries = vec![random(5)?, random(5)?, random(5)?];

    let dir = tempfile::tempdir()?;
    let dataset = (0..3)
        .map(|_| {
            let entries = (0..5)
                .map(|i| format!(r#""{i}": {{"query": "{i}.bin", "neighbors": {{"0": [{i}], "1": [{i}, 9], "2": [{}]}}}}"#, i * 2))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{{entries}}}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let path = dir.path().join("query.json");
    std::fs::write(&path, format!("[{dataset}]"))?;
    let query_sets = JsonSubmapRegistry::load_file(&path)?;

    let ctx = ExecutionContext::cpu();
    let cached = RetrievalEvaluator::new(EvalConfig::default())?
        .evaluate_descriptors(&ctx, &database, &queries, &query_sets)?;
    let per_pair = RetrievalEvaluator::new(EvalConfig {
        cache_database_index: false,
        ..Default::default()
    })?
    .evaluate_descriptors(&ExecutionContext::cpu_parallel(), &database, &queries, &query_sets)?;

    assert_eq!(cached.num_pairs, 6);
    assert_eq!(cached.average_recall, per_pair.average_recall);
    assert_eq!(cached.num_top1_samples, per_pair.num_top1_samples);
    assert_eq!(
        cached.average_one_percent_recall,
        per_pair.average_one_percent_recall
    );
    for window in cached.average_recall.windows(2) {
        assert!(window[0] <= window[1]);
    }
    assert!(cached.average_recall.iter().all(|r| (0.0..=100.0).contains(r)));
    // at depth 25 every ground-truth row of a database with at most 25 rows is found
    assert_eq!(cached.recall_at(25), Some(100.0));
    Ok(())
}
