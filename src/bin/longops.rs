//! longops command-line driver
//!
//! Runs single requests against a persistent store. Every invocation reopens
//! the data directory, so a `begin` in one process and a `complete` in the
//! next exercise resumption across restarts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::info;

use longops::storage::open_datastore;
use longops::telemetry::init_tracing;
use longops::{Config, Datastore, Entity, EntityKey, LongOpEngine, LongOpError, OperationKind, Request};

struct Args {
    data_dir: PathBuf,
    config: Option<PathBuf>,
    command: Vec<String>,
}

const USAGE: &str = "\
longops - deferred game operations

USAGE:
    longops [OPTIONS] <COMMAND>

OPTIONS:
    -d, --data-dir <DIR>      Data directory [default: ./world.lops]
    -c, --config <FILE>       JSON configuration file
    -h, --help                Print help information

COMMANDS:
    import <entities.json>                 Insert a JSON array of entities
    begin <actor> <kind> [key=value...]    Start an operation (kind: prototype, craft)
    complete <actor>                       Finish a ready operation
    cancel <actor>                         Abandon the active operation
    describe <actor>                       Show the active operation
    poll <actor>                           Complete if ready, else show progress
    history <actor>                        List finished operations
    compact                                Rewrite the log as one snapshot";

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        data_dir: PathBuf::from("./world.lops"),
        config: None,
        command: Vec::new(),
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--data-dir" | "-d" => {
                args.data_dir = iter.next().map(PathBuf::from).ok_or("--data-dir requires a value")?;
            }
            "--config" | "-c" => {
                args.config = Some(iter.next().map(PathBuf::from).ok_or("--config requires a value")?);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => {
                args.command.push(arg);
                args.command.extend(iter.by_ref());
            }
        }
    }
    if args.command.is_empty() {
        return Err("missing command".to_string());
    }
    Ok(args)
}

fn actor_arg(command: &[String]) -> Result<EntityKey, String> {
    let raw = command.get(1).ok_or("missing <actor>")?;
    raw.parse::<u64>()
        .map(EntityKey::character)
        .map_err(|_| format!("invalid actor id: {raw}"))
}

fn build_request(command: &[String]) -> Result<Request, String> {
    let actor = actor_arg(command)?;
    match command[0].as_str() {
        "begin" => {
            let kind = command
                .get(2)
                .ok_or("missing <kind>")?
                .parse::<OperationKind>()
                .map_err(|e| e.to_string())?;
            let params = command[3..]
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| format!("expected key=value, got '{pair}'"))
                })
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(Request::Begin { actor, kind, params })
        }
        "complete" => Ok(Request::Complete { actor }),
        "cancel" => Ok(Request::Cancel { actor }),
        "describe" => Ok(Request::Describe { actor }),
        "poll" => Ok(Request::Poll { actor }),
        other => Err(format!("unknown command: {other}")),
    }
}

fn import(store: &dyn Datastore, path: &str) -> Result<usize, LongOpError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| LongOpError::internal(format!("read {path}: {e}")))?;
    let entities: Vec<Entity> = serde_json::from_str(&raw)
        .map_err(|e| LongOpError::internal(format!("parse {path}: {e}")))?;
    let count = entities.len();
    for entity in entities {
        store.insert(entity)?;
    }
    Ok(count)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, LongOpError> {
    serde_json::to_string_pretty(value).map_err(|e| LongOpError::internal(format!("render output: {e}")))
}

fn run(args: &Args) -> Result<String, LongOpError> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let store = Arc::new(open_datastore(&args.data_dir, Some(config.storage.clone()))?);
    info!(data_dir = %args.data_dir.display(), wal_sequence = store.wal_sequence(), "store opened");

    let command = &args.command;
    match command[0].as_str() {
        "import" => {
            let path = command.get(1).ok_or_else(|| LongOpError::internal("missing <entities.json>"))?;
            let count = import(store.as_ref(), path)?;
            Ok(format!("imported {count} entities"))
        }
        "compact" => {
            let result = store.compact()?;
            Ok(format!(
                "compacted log from {} to {} bytes",
                result.wal_size_before, result.wal_size_after
            ))
        }
        "history" => {
            let actor = actor_arg(command).map_err(LongOpError::internal)?;
            let engine = LongOpEngine::new(store).with_config(config.engine);
            to_json(&engine.history(actor)?)
        }
        _ => {
            let request = build_request(command).map_err(LongOpError::internal)?;
            let engine = LongOpEngine::new(store).with_config(config.engine);
            to_json(&engine.execute(request)?)
        }
    }
}

fn main() -> ExitCode {
    init_tracing("warn");

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("error: {message}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) if err.is_user_facing() => {
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
