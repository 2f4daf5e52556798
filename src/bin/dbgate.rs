use dbgate::config::{self, AppConfig};
use dbgate::core::db::query::{row_to_json, value_to_json};
use dbgate::{params_from_iter, Gateway, Value};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use tracing::{info, Level};

const USAGE: &str = "Usage: dbgate [--config <path>] <create-table|execute|fetch-one|fetch-all> <sql> [param...]";

#[derive(Debug, PartialEq)]
enum Command {
    CreateTable,
    Execute,
    FetchOne,
    FetchAll,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create-table" => Ok(Command::CreateTable),
            "execute" => Ok(Command::Execute),
            "fetch-one" => Ok(Command::FetchOne),
            "fetch-all" => Ok(Command::FetchAll),
            other => Err(format!("Unknown command: {}", other)),
        }
    }
}

#[derive(Debug)]
struct Invocation {
    config_path: Option<PathBuf>,
    command: Command,
    sql: String,
    params: Vec<Value>,
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut rest = args;
    let mut config_path = None;
    if rest.first().map(String::as_str) == Some("--config") {
        let path = rest.get(1).ok_or("--config requires a path")?;
        config_path = Some(PathBuf::from(path));
        rest = &rest[2..];
    }

    match rest {
        [command, sql, params @ ..] => Ok(Invocation {
            config_path,
            command: command.parse()?,
            sql: sql.clone(),
            params: params.iter().map(|p| parse_param(p)).collect(),
        }),
        _ => Err("Missing command or SQL".to_string()),
    }
}

/// Integer, then float, then `null`, else text
fn parse_param(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else if raw == "null" {
        Value::Null
    } else {
        Value::Text(raw.to_string())
    }
}

fn init_logging(config: &AppConfig) {
    let level = config
        .log_level()
        .and_then(|l| Level::from_str(l).ok())
        .unwrap_or(Level::WARN);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(invocation: Invocation, gateway: &Gateway) -> dbgate::Result<()> {
    let params = params_from_iter(invocation.params.iter());
    match invocation.command {
        Command::CreateTable => {
            gateway.create_table(invocation.sql.as_str())?;
        }
        Command::Execute => {
            let value = gateway.execute(invocation.sql.as_str(), params)?;
            let json = value.as_ref().map(value_to_json).unwrap_or(serde_json::Value::Null);
            println!("{}", json);
        }
        Command::FetchOne => {
            let row = gateway.fetch_one(invocation.sql.as_str(), params)?;
            let json = row.as_deref().map(row_to_json).unwrap_or(serde_json::Value::Null);
            println!("{}", json);
        }
        Command::FetchAll => {
            for row in gateway.fetch_all(invocation.sql.as_str(), params)? {
                println!("{}", row_to_json(&row));
            }
        }
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            process::exit(2);
        }
    };

    let config_path = match invocation.config_path.clone().or_else(config::default_config_path) {
        Some(path) => path,
        None => {
            eprintln!("No configuration file given and no default location available");
            process::exit(2);
        }
    };

    let app_config = match config::load_config(&config_path) {
        Ok(app_config) => app_config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    init_logging(&app_config);
    info!("Loaded configuration from {}", config_path.display());

    let gateway = Gateway::new(app_config.connection);
    if let Err(e) = run(invocation, &gateway) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
