use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use meanface::aggregate::summarize;
use meanface::config::Config;
use meanface::db::{SqliteStore, VectorStore};
use meanface::graph::GraphBuilder;
use meanface::logging;
use meanface::storage::FsObjectStore;

enum Command {
    Graph(String),
    Search(String, usize),
    After(f64),
    Get(String),
    Averages,
    Count,
}

struct Args {
    config_path: Option<PathBuf>,
    service: bool,
    command: Command,
}

fn parse_args() -> Args {
    parse_args_from(std::env::args().collect())
}

fn parse_args_from(args: Vec<String>) -> Args {
    let mut config_path = None;
    let mut service = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("meanface {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--service" | "-s" => service = true,
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            arg if arg.starts_with('-') && arg.parse::<f64>().is_err() => {
                usage_error(&format!("Unknown argument: {arg}"));
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let command = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["graph", id] => Command::Graph(id.to_string()),
        ["search", id] => Command::Search(id.to_string(), 10),
        ["search", id, n] => match n.parse() {
            Ok(n) => Command::Search(id.to_string(), n),
            Err(_) => usage_error(&format!("Invalid result count: {n}")),
        },
        ["after", ts] => match ts.parse() {
            Ok(ts) => Command::After(ts),
            Err(_) => usage_error(&format!("Invalid timestamp: {ts}")),
        },
        ["get", id] => Command::Get(id.to_string()),
        ["averages"] => Command::Averages,
        ["count"] => Command::Count,
        [] => usage_error("No command given"),
        other => usage_error(&format!("Unknown command: {}", other.join(" "))),
    };

    Args {
        config_path,
        service,
        command,
    }
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {message}");
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"meanface - face embedding store, running-mean faces and similarity graphs

USAGE:
    meanface [OPTIONS] <COMMAND>

COMMANDS:
    graph <id>          Similarity graph rooted at a record, as JSON
    search <id> [n]     The n nearest records (default: 10)
    after <ts>          Records created after an epoch timestamp (one page)
    get <id>            One record by id
    averages            Participant counts, mean ages and latest composite
    count               Number of stored records

OPTIONS:
    --config, -c PATH   Path to config file
    --service, -s       Log to journald (Linux) or daily files instead of stderr
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    MEANFACE_CONFIG     Path to config file (overrides default location)
    MEANFACE_LOG        Log level (debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/meanface/config.toml"#
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = parse_args();
    let _ = if args.service {
        logging::init(None)
    } else {
        logging::init_stderr()
    };

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let store = Arc::new(
        SqliteStore::open(&config.store)
            .with_context(|| format!("Failed to open store at {}", config.store.sqlite_path.display()))?,
    );
    let objects = Arc::new(FsObjectStore::new(&config.objects));
    tracing::debug!(db = %config.store.sqlite_path.display(), objects = %objects.root().display(), "Opened stores");

    match args.command {
        Command::Graph(id) => {
            let graph = GraphBuilder::new(store, objects, &config.objects, &config.graph).build(&id)?;
            if graph.not_found {
                tracing::warn!(id = %id, "Root record not found");
            }
            print_json(&graph)?;
        }
        Command::Search(id, n) => print_json(&store.search_top_n(&id, n)?)?,
        Command::After(ts) => print_json(&store.get_after(ts, false)?)?,
        Command::Get(id) => match store.get_by_id(&id, false)? {
            Some(record) => print_json(&record)?,
            None => bail!("No record with id {id}"),
        },
        Command::Averages => {
            print_json(&summarize(store.as_ref(), objects.as_ref(), &config.objects.output_container)?)?
        }
        Command::Count => println!("{}", store.count()?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Args {
        parse_args_from(line.split_whitespace().map(str::to_string).collect())
    }

    #[test]
    fn test_service_flag_selects_service_logging() {
        assert!(!parse("meanface count").service);
        assert!(parse("meanface --service count").service);

        let args = parse("meanface -s -c /tmp/meanface.toml search abc 3");
        assert!(args.service);
        assert_eq!(args.config_path, Some(PathBuf::from("/tmp/meanface.toml")));
        assert!(matches!(args.command, Command::Search(ref id, 3) if id == "abc"));
    }

    #[test]
    fn test_negative_timestamp_is_positional() {
        let args = parse("meanface after -1.5");
        assert!(matches!(args.command, Command::After(ts) if ts == -1.5));
    }
}
