//! Quarry CLI Entry Point
//!
//! One subcommand per administration operation, plus:
//! - `serve` - JSON-RPC tool server on stdio
//! - `init` - write a configuration file
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use quarry::config::{self, ConfigLayer, ConfigLocation, QuarryConfig};
use quarry::engine::DatabaseType;
use quarry::marshal::BinaryEncoding;
use quarry::orchestrator::{CrudOrchestrator, Operation};
use quarry::output::{ErrorEnvelope, Metadata, SuccessEnvelope};
use quarry::rpc::{self, RpcServer};
use quarry::QuarryError;

/// Quarry - credential-driven database administration
#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Browse and edit MySQL or SQLite databases with per-request credentials")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Database engine (mysql, sqlite)
    #[arg(long, global = true)]
    engine: Option<DatabaseType>,

    /// Database server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database server port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Directory holding `<name>.db` SQLite databases
    #[arg(long, global = true)]
    sqlite_dir: Option<PathBuf>,

    /// Database user
    #[arg(long, global = true, env = "QUARRY_USER")]
    user: Option<String>,

    /// Database password (prompted for when absent)
    #[arg(long, global = true, env = "QUARRY_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Reject writes and DDL
    #[arg(long, global = true)]
    readonly: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials and report the server version
    TestConnection,

    /// List databases
    ListDatabases,

    /// Describe every table of a database
    DescribeTables {
        #[arg(long)]
        db: String,
    },

    /// Fetch one page of a table
    FetchPage {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,
    },

    /// Create a table
    CreateTable {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
        /// JSON array of column definitions
        #[arg(long)]
        columns: String,
    },

    /// Insert one row
    InsertRow {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
        /// JSON object of column values
        #[arg(long)]
        data: String,
    },

    /// Delete rows by primary key
    DeleteRows {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
        #[arg(long)]
        pk: String,
        /// Comma-joined key values
        #[arg(long)]
        ids: String,
    },

    /// Drop a table
    DropTable {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
    },

    /// Remove every row of a table
    TruncateTable {
        #[arg(long)]
        db: String,
        #[arg(long)]
        table: String,
    },

    /// Serve tools over JSON-RPC on stdio
    Serve,

    /// Write a configuration file from the given flags
    Init {
        /// Where to write the file
        #[arg(long, value_enum, default_value_t = Location::Local)]
        location: Location,
        #[arg(long)]
        default_page_limit: Option<u64>,
        #[arg(long)]
        max_page_limit: Option<u64>,
        #[arg(long, value_enum)]
        binary_encoding: Option<Encoding>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        allow_ddl: Option<bool>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Location {
    Local,
    Global,
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Reject,
    Base64,
}

impl GlobalArgs {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            engine: self.engine,
            host: self.host.clone(),
            port: self.port,
            sqlite_dir: self.sqlite_dir.clone(),
            readonly: self.readonly.then_some(true),
            ..ConfigLayer::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let quarry_err = err
                .downcast_ref::<QuarryError>()
                .cloned()
                .unwrap_or_else(|| QuarryError::config(format!("{err:#}")));
            print_json(&serde_json::to_value(ErrorEnvelope::from_error("", "cli", &quarry_err)).unwrap_or(Value::Null));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let Cli { global, command } = cli;

    let (op, arguments) = match command {
        Commands::Init {
            location,
            default_page_limit,
            max_page_limit,
            binary_encoding,
            timeout_ms,
            allow_ddl,
        } => {
            let layer = ConfigLayer {
                default_page_limit,
                max_page_limit,
                binary_encoding: binary_encoding.map(|e| match e {
                    Encoding::Reject => BinaryEncoding::Reject,
                    Encoding::Base64 => BinaryEncoding::Base64,
                }),
                timeout_ms,
                allow_ddl,
                ..global.layer()
            };
            return init(layer, location);
        }
        Commands::Serve => return serve(&global).await,
        Commands::TestConnection => (Operation::TestConnection, Map::new()),
        Commands::ListDatabases => (Operation::ListDatabases, Map::new()),
        Commands::DescribeTables { db } => (Operation::DescribeTables, object(json!({ "db_name": db }))),
        Commands::FetchPage { db, table, page, limit } => (
            Operation::FetchPage,
            object(json!({ "db_name": db, "table_name": table, "page": page, "limit": limit })),
        ),
        Commands::CreateTable { db, table, columns } => (
            Operation::CreateTable,
            object(json!({
                "db_name": db,
                "table_name": table,
                "columns": parse_json_flag("--columns", &columns)?,
            })),
        ),
        Commands::InsertRow { db, table, data } => (
            Operation::InsertRow,
            object(json!({
                "db_name": db,
                "table_name": table,
                "data": parse_json_flag("--data", &data)?,
            })),
        ),
        Commands::DeleteRows { db, table, pk, ids } => (
            Operation::DeleteRows,
            object(json!({ "db_name": db, "table_name": table, "pk_column": pk, "ids": ids })),
        ),
        Commands::DropTable { db, table } => {
            (Operation::DropTable, object(json!({ "db_name": db, "table_name": table })))
        }
        Commands::TruncateTable { db, table } => {
            (Operation::TruncateTable, object(json!({ "db_name": db, "table_name": table })))
        }
    };

    let config = config::load_with_precedence(global.layer())?;
    let engine = config.engine;
    let orchestrator = CrudOrchestrator::new(config.connector()?, config.settings());

    let mut arguments = arguments;
    let (username, password) = credentials(&config, global.user, global.password)?;
    arguments.insert("username".into(), Value::String(username));
    arguments.insert("password".into(), Value::String(password));

    match rpc::invoke(&orchestrator, engine.as_str(), op, Value::Object(arguments)).await {
        Ok(reply) => {
            print_json(&reply.envelope);
            Ok(if reply.is_error { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Err(message) => Err(QuarryError::validation(message).into()),
    }
}

fn init(layer: ConfigLayer, location: Location) -> anyhow::Result<ExitCode> {
    let location = match location {
        Location::Local => ConfigLocation::Local,
        Location::Global => ConfigLocation::Global,
    };
    let path = config::save_config(layer, location)?;
    let envelope = SuccessEnvelope::new("", "init", json!({ "path": path }), Metadata::new(0));
    print_json(&serde_json::to_value(envelope)?);
    Ok(ExitCode::SUCCESS)
}

async fn serve(global: &GlobalArgs) -> anyhow::Result<ExitCode> {
    let config = config::load_with_precedence(global.layer())?;
    let orchestrator = CrudOrchestrator::new(config.connector()?, config.settings());

    tracing::info!(engine = %config.engine, "serving tools on stdio");
    RpcServer::new(orchestrator, config.engine.as_str()).serve().await?;
    Ok(ExitCode::SUCCESS)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn parse_json_flag(flag: &str, text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text)
        .map_err(|e| QuarryError::validation(format!("{flag} is not valid JSON: {e}")).into())
}

/// User and password from flags, environment or an interactive prompt
///
/// `SQLite` has no users, so nothing is prompted for.
fn credentials(
    config: &QuarryConfig,
    user: Option<String>,
    password: Option<String>,
) -> anyhow::Result<(String, String)> {
    if config.engine == DatabaseType::SQLite {
        return Ok((user.unwrap_or_default(), password.unwrap_or_default()));
    }

    let user = match user {
        Some(user) => user,
        None => dialoguer::Input::<String>::new()
            .with_prompt("Username")
            .interact_text()
            .context("reading username")?,
    };
    let password = match password {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt(format!("Password for {user}"))
            .allow_empty_password(true)
            .interact()
            .context("reading password")?,
    };
    Ok((user, password))
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("could not render output: {e}"),
    }
}
