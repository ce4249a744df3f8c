//! Kill statistics query tool
//!
//! Rebuilds the aggregation index from the durable store and prints one
//! grouping (or the host directory) as JSON. `register` adds a host and
//! prints its id and token; submissions carry that id as `server_id`.
//!
//! Usage:
//!   killstat_query <weapons|players|maps|servers|gamemodes|hosts>
//!                  [--player N] [--server S] [--host N]
//!                  [--map M] [--weapon W] [--gamemode G] [--pretty]
//!   killstat_query register <HOST_NAME>
//!
//! Environment variables:
//!   KILLSTAT_DB_PATH - SQLite database path (default: data/killstat.db)
//!   KILLSTAT_SCHEMA_DIR - migrations directory (default: sql)

use dotenv::dotenv;
use killstat::pipeline::{
    config::PipelineConfig,
    db::SqliteKillWriter,
    engine::KillStatEngine,
    query::{to_json, to_json_pretty, QueryRequest},
};
use std::env;

const USAGE: &str = "usage: killstat_query <weapons|players|maps|servers|gamemodes|hosts> \
[--player N] [--server S] [--host N] [--map M] [--weapon W] [--gamemode G] [--pretty]\n\
       killstat_query register <HOST_NAME>";

#[derive(Debug, PartialEq)]
enum Command {
    Register { host_name: String },
    Query(QueryArgs),
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        match args.split_first() {
            Some((first, rest)) if first == "register" => {
                let host_name = rest.join(" ").trim().to_string();
                if host_name.is_empty() {
                    return Err(format!("Missing host name.\n{}", USAGE));
                }
                Ok(Command::Register { host_name })
            }
            _ => QueryArgs::parse(args).map(Command::Query),
        }
    }
}

#[derive(Debug, PartialEq)]
struct QueryArgs {
    path: String,
    params: Vec<(String, String)>,
    pretty: bool,
}

impl QueryArgs {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut iter = args.iter();
        let path = iter.next().ok_or_else(|| USAGE.to_string())?.clone();

        let mut params = Vec::new();
        let mut pretty = false;
        while let Some(arg) = iter.next() {
            if arg == "--pretty" {
                pretty = true;
                continue;
            }
            let name = arg
                .strip_prefix("--")
                .ok_or_else(|| format!("unexpected argument '{}'\n{}", arg, USAGE))?;
            let value = iter
                .next()
                .ok_or_else(|| format!("missing value for --{}\n{}", name, USAGE))?;
            params.push((name.to_string(), value.clone()));
        }

        Ok(Self {
            path,
            params,
            pretty,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    let config = PipelineConfig::from_env();

    let writer = SqliteKillWriter::open_with_schema(&config.db_path, &config.schema_dir)?;

    let args = match command {
        Command::Register { host_name } => {
            let (host_id, host_token) = writer.register_host(&host_name)?;
            log::info!("✅ Registered host {} as {}", host_name, host_id);
            println!(
                "{}",
                serde_json::json!({
                    "host_id": host_id,
                    "host_name": host_name,
                    "host_token": host_token,
                })
            );
            return Ok(());
        }
        Command::Query(args) => args,
    };

    let hosts = writer.load_hosts()?;

    if args.path.trim_matches('/') == "hosts" {
        let body = if args.pretty {
            serde_json::to_string_pretty(&hosts)?
        } else {
            serde_json::to_string(&hosts)?
        };
        println!("{}", body);
        return Ok(());
    }

    // Validate before paying for the replay
    let request = QueryRequest::from_params(&args.path, args.params)?;

    let mut engine = KillStatEngine::default().with_hosts(hosts);
    let (recorded, skipped) = engine.replay(writer.load_kills()?);
    log::info!("♻️  Replayed {} stored kills ({} incomplete skipped)", recorded, skipped);

    let grouping = engine.query(&request);
    let body = if args.pretty {
        to_json_pretty(&grouping)?
    } else {
        to_json(&grouping)?
    };
    println!("{}", body);
    Ok(())
}
