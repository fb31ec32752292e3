use argh::FromArgs;
use std::path::{Path, PathBuf};

use pointvlad::{
    eval::{BinPointCloudLoader, EvalConfig, JsonSubmapRegistry, RetrievalEvaluator},
    model::{DescriptorNetwork, ModelConfig},
    nn::ExecutionContext,
};

#[derive(FromArgs)]
/// Evaluate place recognition recall across the submaps of a benchmark
struct Args {
    /// path to the database submaps json
    #[argh(option, short = 'd')]
    database: PathBuf,

    /// path to the query submaps json
    #[argh(option, short = 'q')]
    query: PathBuf,

    /// path to a network checkpoint
    #[argh(option, short = 'c')]
    checkpoint: Option<PathBuf>,

    /// path to a model configuration json (default: 4096 points, 256-d descriptors)
    #[argh(option, short = 'm')]
    model_config: Option<PathBuf>,

    /// path to an evaluation configuration json
    #[argh(option, short = 'e')]
    eval_config: Option<PathBuf>,

    /// where to write the report
    #[argh(option, short = 'r')]
    report: Option<PathBuf>,

    /// fan batch samples out over all cores
    #[argh(switch, short = 'p')]
    parallel: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let model_config = match &args.model_config {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig::default(),
    };
    let mut eval_config = match &args.eval_config {
        Some(path) => EvalConfig::from_json_file(path)?,
        None => EvalConfig::default(),
    };
    if args.report.is_some() {
        eval_config.report_path = args.report.clone();
    }

    // point cloud references are relative to the dataset files
    let root = args.database.parent().unwrap_or(Path::new("."));
    let database = JsonSubmapRegistry::load_file(&args.database)?;
    let queries = JsonSubmapRegistry::load_file(&args.query)?;
    let loader = BinPointCloudLoader::new(root, model_config.num_points);

    let mut network = DescriptorNetwork::new(model_config)?;
    if let Some(path) = &args.checkpoint {
        let report = network.load_checkpoint(path)?;
        if !report.is_complete() {
            log::warn!(
                "partial checkpoint: {} missing, {} mismatched, {} unexpected parameters",
                report.missing.len(),
                report.mismatched.len(),
                report.unexpected.len()
            );
        }
    } else {
        log::warn!("no checkpoint given, evaluating a randomly initialized network");
    }

    let ctx = if args.parallel {
        ExecutionContext::cpu_parallel()
    } else {
        ExecutionContext::cpu()
    };

    let evaluator = RetrievalEvaluator::new(eval_config)?;
    let result = evaluator.evaluate(&ctx, &mut network, &loader, &database, &queries)?;
    println!("{result}");

    Ok(())
}
