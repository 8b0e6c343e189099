use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use slotgraph::samples::{self, Sample};
use slotgraph::{ActionRequest, Engine, EngineConfig, Outcome, Snapshot, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "slotgraph")]
#[command(about = "Drive a slotgraph sample document from the command line")]
struct Cli {
    /// Engine configuration (JSON); missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// State file for persistence (load on start, save on exit)
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available sample documents
    List,
    /// Apply set requests, then queued actions, and print every value
    Run {
        sample: String,
        /// `<slot path>=<json>`, applied in order before any action
        #[arg(long = "set")]
        sets: Vec<String>,
        /// `<node path>.<action>`, queued in order
        #[arg(long = "dispatch")]
        dispatches: Vec<String>,
    },
    /// Print slot values (all of them when no path is given)
    Read {
        sample: String,
        /// Slot paths, e.g. `/v:displacement`
        paths: Vec<String>,
    },
    /// Request a new value for a slot
    Set {
        sample: String,
        path: String,
        /// New value as JSON, e.g. `[5, 5]` or `"text"`
        value: String,
    },
    /// Dispatch an action
    Dispatch {
        sample: String,
        /// Node path, e.g. `/counter`
        node: String,
        action: String,
        /// Arguments as a JSON object
        #[arg(long)]
        args: Option<String>,
    },
    /// Print the snapshot of the current state
    Snapshot { sample: String },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&json).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::List => {
            for sample in samples::all() {
                println!("{}", sample.name);
            }
            Ok(())
        }
        Commands::Run {
            sample,
            sets,
            dispatches,
        } => {
            let sample = find_sample(&sample)?;
            let mut engine = open(&sample, config, cli.state.as_deref())?;
            for assignment in &sets {
                let (path, json) = assignment
                    .split_once('=')
                    .ok_or_else(|| anyhow!("`{assignment}` is not `<slot path>=<json>`"))?;
                let outcome = engine.set(path, parse_value(json)?)?;
                if let Outcome::Rejected(rejection) = outcome {
                    log::warn!("set {path} rejected at {}: {}", rejection.path, rejection.reason);
                }
            }
            for request in &dispatches {
                let (node, action) = request
                    .rsplit_once('.')
                    .ok_or_else(|| anyhow!("`{request}` is not `<node path>.<action>`"))?;
                let node = engine.resolve_path(node)?;
                engine.enqueue(ActionRequest::new(node, action, Value::Empty));
            }
            for result in engine.process_queue() {
                result?;
            }
            print_values(&engine.get_all_values_by_path(true))?;
            report_diagnostics(&engine);
            save(&mut engine, cli.state.as_deref())
        }
        Commands::Read { sample, paths } => {
            let sample = find_sample(&sample)?;
            let mut engine = open(&sample, config, cli.state.as_deref())?;
            let values: BTreeMap<String, Value> = if paths.is_empty() {
                engine.get_all_values_by_path(true)
            } else {
                paths
                    .into_iter()
                    .map(|path| -> slotgraph::Result<(String, Value)> {
                        let value = engine.value(&path)?;
                        Ok((path, value))
                    })
                    .collect::<slotgraph::Result<_>>()?
            };
            print_values(&values)?;
            report_diagnostics(&engine);
            Ok(())
        }
        Commands::Set { sample, path, value } => {
            let sample = find_sample(&sample)?;
            let mut engine = open(&sample, config, cli.state.as_deref())?;
            let value = parse_value(&value)?;
            match engine.set(&path, value)? {
                Outcome::Applied(diff) | Outcome::PartiallyApplied(diff) => {
                    for write in &diff.writes {
                        println!("{} := {} (was {})", write.path, write.new, write.old);
                    }
                }
                Outcome::Rejected(rejection) => {
                    bail!("set {path} rejected at {}: {}", rejection.path, rejection.reason);
                }
            }
            save(&mut engine, cli.state.as_deref())
        }
        Commands::Dispatch {
            sample,
            node,
            action,
            args,
        } => {
            let sample = find_sample(&sample)?;
            let mut engine = open(&sample, config, cli.state.as_deref())?;
            let args = match args {
                Some(json) => parse_value(&json)?,
                None => Value::Empty,
            };
            let report = engine.dispatch_at(&node, &action, args)?;
            for entry in &report.entries {
                let status = match &entry.outcome {
                    Outcome::Applied(_) => "applied".to_string(),
                    Outcome::PartiallyApplied(_) => "partial".to_string(),
                    Outcome::Rejected(rejection) => format!("rejected: {}", rejection.reason),
                };
                println!("{} {}: {status}", entry.action.action, entry.target);
            }
            let fired: Vec<&str> = report.fired.iter().map(|a| &*a.action).collect();
            println!("fired: {}", fired.join(", "));
            report_diagnostics(&engine);
            save(&mut engine, cli.state.as_deref())
        }
        Commands::Snapshot { sample } => {
            let sample = find_sample(&sample)?;
            let mut engine = open(&sample, config, cli.state.as_deref())?;
            println!("{}", engine.snapshot().to_json()?);
            Ok(())
        }
    }
}

fn find_sample(name: &str) -> Result<Sample> {
    samples::by_name(name).ok_or_else(|| {
        let known: Vec<&str> = samples::all().iter().map(|s| s.name).collect();
        anyhow!("unknown sample `{name}` (available: {})", known.join(", "))
    })
}

/// Build the engine, restoring from the state file when it exists.
fn open(sample: &Sample, config: EngineConfig, state: Option<&Path>) -> Result<Engine> {
    let Some(path) = state.filter(|p| p.exists()) else {
        return Ok(sample.engine_with(config));
    };
    let json = fs::read_to_string(path).with_context(|| format!("reading state {}", path.display()))?;
    let snapshot = Snapshot::from_json(&json).with_context(|| format!("parsing state {}", path.display()))?;
    log::info!("restoring {} from {}", sample.name, path.display());
    Engine::from_snapshot(sample.schemas.clone(), sample.root.clone(), config, &snapshot)
        .with_context(|| format!("restoring state {}", path.display()))
}

fn save(engine: &mut Engine, state: Option<&Path>) -> Result<()> {
    let Some(path) = state else {
        return Ok(());
    };
    let json = engine.snapshot().to_json()?;
    fs::write(path, json).with_context(|| format!("writing state {}", path.display()))
}

fn report_diagnostics(engine: &Engine) {
    for diagnostic in engine.diagnostics().entries() {
        eprintln!("{:?} at {}: {}", diagnostic.severity, diagnostic.context, diagnostic.error);
    }
}

fn print_values(values: &BTreeMap<String, Value>) -> Result<()> {
    let json: serde_json::Map<String, serde_json::Value> =
        values.iter().map(|(path, value)| (path.clone(), to_json(value))).collect();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn parse_value(json: &str) -> Result<Value> {
    let parsed: serde_json::Value = serde_json::from_str(json).with_context(|| format!("`{json}` is not JSON"))?;
    Ok(from_json(&parsed))
}

/// Plain JSON to a slot value. Arrays become lists, `null` is `Empty`.
fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Empty,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(Arc::from(s.as_str())),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json)),
        serde_json::Value::Object(fields) => Value::object(fields.iter().map(|(k, v)| (k.as_str(), from_json(v)))),
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Empty => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.to_string()),
        Value::List(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Object(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}
