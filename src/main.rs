use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use grove_data::{AttributeId, Dataset, DatasetReader, FeatureRecord, Schema};
use grove_forest::{
    ChainConfig, ChainType, Collector, CollectorSchema, CollectorSpec, EnsembleConfig, PredictType,
    PredictionMode, QuantileConfig, SavedModel, SplitStrategy, TrainingMode,
};

#[derive(Parser)]
#[command(name = "grove")]
#[command(about = "Random decision tree ensembles: batch, chain multi-label and online quantile trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for reproducibility
    #[arg(long, default_value_t = 42, global = true)]
    seed: u64,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Tree-shape parameters shared by every ensemble kind.
#[derive(Args, Debug, Clone)]
struct TreeArgs {
    /// Number of trees in the ensemble
    #[arg(long, default_value_t = 30)]
    n_trees: usize,

    /// Maximum tree depth (number of levels for online trees)
    #[arg(long, default_value_t = 10)]
    max_depth: usize,

    /// Nodes with at most this many records become leaves
    #[arg(long, default_value_t = 2)]
    min_split_size: usize,

    /// Split strategy: "random", "sparse", or "instance-tagged"
    #[arg(long, default_value = "random")]
    strategy: String,

    /// Grow trees in parallel from per-tree seeds
    #[arg(long, default_value_t = false)]
    parallel: bool,
}

/// Parameters of chain ensembles.
#[derive(Args, Debug, Clone)]
struct ChainArgs {
    /// Label order: "hybrid", "highest", "lowest", or "given"
    #[arg(long, default_value = "hybrid")]
    chain_type: String,

    /// Collector per label group: "percentage", "label-count", or "powerset"
    #[arg(long, default_value = "percentage")]
    predict_type: String,

    /// Probability that a node tries a label splitter first
    #[arg(long, default_value_t = 0.1)]
    label_fraction: f64,

    /// Share of label splitters left active after training
    #[arg(long, default_value_t = 1.0)]
    active_label_fraction: f64,

    /// Stop fixing labels one by one after this many rounds
    #[arg(long)]
    max_chain_rounds: Option<usize>,

    /// Label positions for the "given" chain type, comma-separated
    #[arg(long, value_delimiter = ',')]
    chain_order: Option<Vec<usize>>,

    /// Predict all labels at once instead of round by round
    #[arg(long, default_value_t = false)]
    independent: bool,
}

/// Parameters of online quantile ensembles.
#[derive(Args, Debug, Clone)]
struct OnlineArgs {
    /// Bound on the sample each quantile splitter keeps
    #[arg(long, default_value_t = 10)]
    max_values: usize,

    /// Evict a random sampled value once the sample is full
    #[arg(long, default_value_t = false)]
    concept_drift: bool,

    /// Interpolate quantile thresholds on even-sized samples
    #[arg(long, default_value_t = false)]
    interpolate: bool,

    /// Draw each level's quantile at random instead of using the median
    #[arg(long, default_value_t = false)]
    random_quantile: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Train an ensemble on a CSV file and save it
    Train {
        /// Path to the training CSV file
        #[arg(long)]
        data: PathBuf,

        /// Ensemble kind: "batch", "chain", or "online"
        #[arg(long, default_value = "batch")]
        kind: String,

        /// Nominal column to classify (repeatable)
        #[arg(long)]
        target: Vec<String>,

        /// Comma-separated group of binary label columns (repeatable)
        #[arg(long)]
        labels: Vec<String>,

        /// Where to write the trained model
        #[arg(long)]
        model: PathBuf,

        #[command(flatten)]
        tree: TreeArgs,

        #[command(flatten)]
        chain: ChainArgs,

        #[command(flatten)]
        online: OnlineArgs,
    },

    /// Predict every record of a CSV file with a saved model
    Predict {
        /// Path to the trained model binary
        #[arg(long)]
        model: PathBuf,

        /// Path to the CSV file; must have the training columns
        #[arg(long)]
        data: PathBuf,

        /// Include per-record predictions in the output
        #[arg(long, default_value_t = false)]
        records: bool,
    },
}

// --- JSON stdout output structs ---

#[derive(Serialize)]
struct TrainOutput {
    kind: &'static str,
    n_records: usize,
    n_attributes: usize,
    n_trees: usize,
    n_nodes: usize,
    collectors: Vec<Vec<String>>,
    model: PathBuf,
}

#[derive(Serialize)]
struct PredictOutput {
    kind: &'static str,
    n_records: usize,
    model_n_trees: usize,
    /// Share of known target values predicted correctly, per collector slot.
    accuracy: Vec<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    predictions: Option<Vec<Vec<SlotOutput>>>,
}

#[derive(Serialize)]
struct SlotOutput {
    attributes: Vec<String>,
    values: Vec<f64>,
}

fn parse_strategy(s: &str) -> Result<SplitStrategy> {
    match s {
        "random" => Ok(SplitStrategy::Random),
        "sparse" => Ok(SplitStrategy::Sparse),
        "instance-tagged" => Ok(SplitStrategy::InstanceTagged),
        other => anyhow::bail!("unknown split strategy: {other} (expected random, sparse, or instance-tagged)"),
    }
}

fn parse_chain_type(s: &str) -> Result<ChainType> {
    match s {
        "hybrid" => Ok(ChainType::Hybrid),
        "highest" => Ok(ChainType::Highest),
        "lowest" => Ok(ChainType::Lowest),
        "given" => Ok(ChainType::GivenChain),
        other => anyhow::bail!("unknown chain type: {other} (expected hybrid, highest, lowest, or given)"),
    }
}

fn parse_predict_type(s: &str) -> Result<PredictType> {
    match s {
        "percentage" => Ok(PredictType::Percentage),
        "label-count" => Ok(PredictType::LabelCount),
        "powerset" => Ok(PredictType::Powerset),
        other => anyhow::bail!("unknown predict type: {other} (expected percentage, label-count, or powerset)"),
    }
}

fn training_mode(parallel: bool) -> TrainingMode {
    if parallel {
        TrainingMode::Parallel
    } else {
        TrainingMode::Sequential
    }
}

/// Split `--labels` arguments into groups of column names.
fn label_groups(labels: &[String]) -> Vec<Vec<String>> {
    labels
        .iter()
        .map(|group| group.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .collect()
}

fn column_id(schema: &Schema, name: &str) -> Result<AttributeId> {
    schema
        .find(name)
        .map(|a| a.id())
        .with_context(|| format!("column \"{name}\" not found"))
}

fn collector_names(schema: &Schema, collectors: &CollectorSchema) -> Vec<Vec<String>> {
    collectors
        .specs()
        .iter()
        .map(|spec| attribute_names(schema, spec.attributes()))
        .collect()
}

fn attribute_names(schema: &Schema, ids: &[AttributeId]) -> Vec<String> {
    ids.iter()
        .map(|&id| schema.get(id).map_or_else(|| id.to_string(), |a| a.name().to_string()))
        .collect()
}

/// Per-slot share of known target values that the predictions match.
fn slot_accuracy(records: &[FeatureRecord], predictions: &[Vec<Collector>]) -> Result<Vec<Option<f64>>> {
    let n_slots = predictions.first().map_or(0, Vec::len);
    let mut correct = vec![0usize; n_slots];
    let mut known = vec![0usize; n_slots];
    for (record, slots) in records.iter().zip(predictions) {
        for (slot, collector) in slots.iter().enumerate() {
            let values = collector.prediction()?;
            for (&id, value) in collector.used_attributes().iter().zip(values) {
                if let Some(truth) = record.value(id) {
                    known[slot] += 1;
                    if truth == value {
                        correct[slot] += 1;
                    }
                }
            }
        }
    }
    Ok(correct
        .iter()
        .zip(&known)
        .map(|(&c, &k)| (k > 0).then(|| c as f64 / k as f64))
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn train(
    cli_seed: u64,
    data: &Path,
    kind: &str,
    target: &[String],
    labels: &[String],
    tree: &TreeArgs,
    chain: &ChainArgs,
    online: &OnlineArgs,
) -> Result<(SavedModel, Dataset)> {
    let groups = label_groups(labels);
    let mut nominal: Vec<String> = target.to_vec();
    nominal.extend(groups.iter().flatten().cloned());

    let dataset = DatasetReader::new(data)
        .with_targets(&nominal)
        .with_nominal(&nominal)
        .read()
        .with_context(|| format!("failed to load {}", data.display()))?;
    let schema = dataset.schema();
    info!(n_records = dataset.len(), n_attributes = schema.len(), "loaded training data");

    let group_ids = groups
        .iter()
        .map(|g| g.iter().map(|name| column_id(schema, name)).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    let mode = training_mode(tree.parallel);

    let model = match kind {
        "chain" => {
            let mut config = ChainConfig::new(tree.n_trees)?
                .with_max_depth(tree.max_depth)
                .with_min_split_size(tree.min_split_size)
                .with_split_strategy(parse_strategy(&tree.strategy)?)
                .with_seed(cli_seed)
                .with_training_mode(mode)
                .with_chain_type(parse_chain_type(&chain.chain_type)?)
                .with_predict_type(parse_predict_type(&chain.predict_type)?)
                .with_label_fraction(chain.label_fraction)
                .with_active_label_fraction(chain.active_label_fraction);
            if chain.independent {
                config = config.with_prediction_mode(PredictionMode::Independent);
            }
            if let Some(rounds) = chain.max_chain_rounds {
                config = config.with_max_chain_rounds(rounds);
            }
            if let Some(order) = &chain.chain_order {
                config = config.with_chain_order(order.clone());
            }
            SavedModel::Chain(config.fit(&dataset, &group_ids).context("chain training failed")?)
        }
        "batch" | "online" => {
            let mut specs = target
                .iter()
                .map(|name| Ok(CollectorSpec::Classification { target: column_id(schema, name)? }))
                .collect::<Result<Vec<_>>>()?;
            specs.extend(
                group_ids
                    .into_iter()
                    .map(|labels| CollectorSpec::ProbabilityMultilabel { labels }),
            );
            let collectors = CollectorSchema::new(specs).context("no --target or --labels given")?;

            if kind == "batch" {
                let config = EnsembleConfig::new(tree.n_trees)?
                    .with_max_depth(tree.max_depth)
                    .with_min_split_size(tree.min_split_size)
                    .with_split_strategy(parse_strategy(&tree.strategy)?)
                    .with_seed(cli_seed)
                    .with_training_mode(mode);
                SavedModel::Batch(config.fit(&dataset, &collectors).context("training failed")?)
            } else {
                let config = QuantileConfig::new(tree.n_trees)?
                    .with_max_depth(tree.max_depth)
                    .with_max_values(online.max_values)
                    .with_concept_drift(online.concept_drift)
                    .with_interpolation(online.interpolate)
                    .with_random_quantile(online.random_quantile)
                    .with_seed(cli_seed)
                    .with_training_mode(mode);
                SavedModel::Online(config.fit(&dataset, &collectors).context("online training failed")?)
            }
        }
        other => anyhow::bail!("unknown ensemble kind: {other} (expected batch, chain, or online)"),
    };
    Ok((model, dataset))
}

fn model_parts(model: &SavedModel) -> (&Schema, &CollectorSchema, usize) {
    match model {
        SavedModel::Batch(e) => (
            e.schema(),
            e.collector_schema(),
            e.trees().iter().map(|t| t.n_nodes()).sum(),
        ),
        SavedModel::Chain(e) => (
            e.schema(),
            e.collector_schema(),
            e.trees().iter().map(|t| t.n_nodes()).sum(),
        ),
        SavedModel::Online(e) => (
            e.schema(),
            e.collector_schema(),
            e.trees().iter().map(|t| t.tree().n_nodes()).sum(),
        ),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Train {
            data,
            kind,
            target,
            labels,
            model,
            tree,
            chain,
            online,
        } => {
            let (saved, dataset) = train(cli.seed, &data, &kind, &target, &labels, &tree, &chain, &online)?;
            saved
                .save(&model)
                .with_context(|| format!("failed to save model to {}", model.display()))?;

            let (schema, collectors, n_nodes) = model_parts(&saved);
            let output = TrainOutput {
                kind: saved.kind_name(),
                n_records: dataset.len(),
                n_attributes: schema.len(),
                n_trees: saved.n_trees(),
                n_nodes,
                collectors: collector_names(schema, collectors),
                model,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Predict {
            model,
            data,
            records,
        } => {
            let saved = SavedModel::load(&model)
                .with_context(|| format!("failed to load model from {}", model.display()))?;
            let (schema, _, _) = model_parts(&saved);
            let dataset = DatasetReader::new(&data)
                .with_schema(schema.clone())
                .read()
                .with_context(|| format!("failed to load {}", data.display()))?;
            info!(n_records = dataset.len(), kind = saved.kind_name(), "predicting");

            let predictions = match &saved {
                SavedModel::Batch(e) => e.predict_batch(dataset.records()),
                SavedModel::Chain(e) => e.predict_batch(dataset.records()),
                SavedModel::Online(e) => e.predict_batch(dataset.records()),
            }
            .context("prediction failed")?;
            let accuracy = slot_accuracy(dataset.records(), &predictions)?;

            let per_record = if records {
                let rows = predictions
                    .iter()
                    .map(|slots| {
                        slots
                            .iter()
                            .map(|c| {
                                Ok(SlotOutput {
                                    attributes: attribute_names(schema, c.used_attributes()),
                                    values: c.prediction()?,
                                })
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(rows)
            } else {
                None
            };

            let output = PredictOutput {
                kind: saved.kind_name(),
                n_records: dataset.len(),
                model_n_trees: saved.n_trees(),
                accuracy,
                predictions: per_record,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
