use benchgate_core::detector;
use benchgate_core::errors::EngineError;
use benchgate_core::ingest::{self, IngestOptions, IngestRequest};
use benchgate_core::model::ConfigKey;
use benchgate_core::report;
use benchgate_core::storage::Store;
use benchgate_core::thresholds::DEFAULT_DETECT_THRESHOLD;
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "benchgate",
    version,
    about = "Benchmark snapshot store and regression gate"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record a run result and promote it to the current snapshot
    Ingest(IngestArgs),
    /// Designate an existing snapshot version as the regression baseline
    Baseline(VersionArgs),
    /// Move the current pointer to an existing version (rollback)
    Checkout(VersionArgs),
    /// Compare derived metrics between two versions
    Compare(CompareArgs),
    /// Compare the current snapshot against the baseline
    Detect(DetectArgs),
    /// List recorded transactions for a config
    History(HistoryArgs),
    /// Store row counts and last ingest info
    Stats(StatsArgs),
}

#[derive(Args, Clone)]
struct KeyArgs {
    #[arg(long)]
    model: String,
    #[arg(long)]
    dataset: String,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "prod")]
    env: String,
}

impl KeyArgs {
    fn key(&self) -> ConfigKey {
        ConfigKey::new(&self.model, &self.dataset, &self.prompt, &self.env)
    }
}

#[derive(Args, Clone)]
struct IngestArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,

    /// JSON file with {config_key, raw_counts, tags}
    #[arg(long)]
    file: PathBuf,

    /// JSON file mapping category name to severity weight
    #[arg(long)]
    weights: Option<PathBuf>,

    /// print the receipt as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct VersionArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,
    #[command(flatten)]
    key: KeyArgs,
    #[arg(long)]
    version: i64,
}

#[derive(Args, Clone)]
struct CompareArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,
    #[command(flatten)]
    key: KeyArgs,
    #[arg(long)]
    version_a: i64,
    #[arg(long)]
    version_b: i64,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct DetectArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,
    #[command(flatten)]
    key: KeyArgs,
    #[arg(long, default_value_t = DEFAULT_DETECT_THRESHOLD)]
    threshold: f64,
    /// write the full report as JSON to this path
    #[arg(long)]
    export: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct HistoryArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,
    #[command(flatten)]
    key: KeyArgs,
    #[arg(long, default_value_t = 20)]
    limit: u32,
    /// only transactions created strictly before this RFC 3339 timestamp
    #[arg(long)]
    before: Option<String>,
    /// only transactions carrying this tag
    #[arg(long)]
    tag: Option<String>,
}

#[derive(Args, Clone)]
struct StatsArgs {
    #[arg(long, default_value = ".benchgate/benchgate.db")]
    db: PathBuf,
}

mod exit_codes {
    pub const OK: i32 = 0;
    pub const GATE_FAIL: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const INTERNAL: i32 = 3;
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            match e.downcast_ref::<EngineError>() {
                Some(EngineError::Validation(_))
                | Some(EngineError::NotFound(_))
                | Some(EngineError::NoBaseline(_))
                | Some(EngineError::NoCurrent(_)) => exit_codes::CONFIG_ERROR,
                _ => exit_codes::INTERNAL,
            }
        }
    };
    std::process::exit(code);
}

fn open_store(path: &PathBuf) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(path)?;
    store.init_schema()?;
    Ok(store)
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Ingest(args) => cmd_ingest(args),
        Command::Baseline(args) => {
            let store = open_store(&args.db)?;
            let snap = store.designate_baseline(&args.key.key(), args.version)?;
            eprintln!("Baseline for {} set to v{}", snap.config_key, snap.version);
            Ok(exit_codes::OK)
        }
        Command::Checkout(args) => {
            let store = open_store(&args.db)?;
            let snap = store.checkout(&args.key.key(), args.version)?;
            eprintln!(
                "Current snapshot for {} is now v{} (transaction {})",
                snap.config_key, snap.version, snap.transaction_id
            );
            Ok(exit_codes::OK)
        }
        Command::Compare(args) => {
            let store = open_store(&args.db)?;
            let cmp = store.compare(&args.key.key(), args.version_a, args.version_b)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&cmp)?);
            } else {
                report::print_comparison(&cmp);
            }
            Ok(exit_codes::OK)
        }
        Command::Detect(args) => {
            let store = open_store(&args.db)?;
            let rep = detector::detect(&store, &args.key.key(), args.threshold)?;
            if let Some(path) = &args.export {
                rep.save(path)?;
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&rep)?);
            } else {
                report::print_regressions(&rep);
            }
            if rep.regressed() {
                Ok(exit_codes::GATE_FAIL)
            } else {
                Ok(exit_codes::OK)
            }
        }
        Command::History(args) => {
            let store = open_store(&args.db)?;
            let rows = store.list_for_config(
                &args.key.key(),
                args.limit,
                args.before.as_deref(),
                args.tag.as_deref(),
            )?;
            for t in &rows {
                println!("{}", serde_json::to_string(t)?);
            }
            eprintln!("{} transaction(s)", rows.len());
            Ok(exit_codes::OK)
        }
        Command::Stats(args) => {
            let store = open_store(&args.db)?;
            let s = store.stats_best_effort()?;
            eprintln!(
                "transactions={} snapshots={} last_transaction={} last_ingest={}",
                s.transactions.map_or("?".into(), |v| v.to_string()),
                s.snapshots.map_or("?".into(), |v| v.to_string()),
                s.last_transaction_id
                    .map_or("-".into(), |v| v.to_string()),
                s.last_ingest_at.unwrap_or_else(|| "-".into()),
            );
            Ok(exit_codes::OK)
        }
    }
}

// A malformed request file is the operator's mistake, not an engine fault,
// so it gets the validation error class and the config-error exit code.
fn parse_request(body: &str) -> Result<IngestRequest, EngineError> {
    serde_json::from_str(body)
        .map_err(|e| EngineError::Validation(format!("invalid ingest request: {}", e)))
}

fn parse_weights(body: &str) -> Result<HashMap<String, f64>, EngineError> {
    serde_json::from_str(body)
        .map_err(|e| EngineError::Validation(format!("invalid weights file: {}", e)))
}

fn cmd_ingest(args: IngestArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;

    let body = std::fs::read_to_string(&args.file)?;
    let req = parse_request(&body)?;

    let mut opts = IngestOptions::default();
    if let Some(path) = &args.weights {
        let w = std::fs::read_to_string(path)?;
        opts.weights = parse_weights(&w)?;
    }

    let receipt = ingest::ingest(&store, &req, &opts)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        report::print_receipt(&receipt);
    }
    Ok(exit_codes::OK)
}
