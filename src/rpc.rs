//! JSON-RPC Tool Server
//!
//! This module implements an MCP-style tool server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: `serde_json`, `schemars` for input schemas, anyhow for transport errors
//! - **Protocol**: `initialize`, `tools/list`, `tools/call`
//!
//! # Tools
//!
//! One tool per administration operation (`test_connection`, `list_databases`,
//! `describe_tables`, `fetch_page`, `create_table`, `insert_row`, `delete_rows`, `drop_table`,
//! `truncate_table`). Every tool takes `username` and `password` next to its own arguments.
//! Each call is independent: a session is opened, used and closed.
//!
//! Tool results carry one JSON envelope as text. Operation failures are results with
//! `isError: true`; protocol failures are JSON-RPC errors.
//!
//! # Usage
//!
//! Start the server with: `quarry serve`

use anyhow::Result;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use crate::engine::{ConnectionManager, Credentials};
use crate::error::QuarryError;
use crate::orchestrator::{
    CreateTableRequest, CrudOrchestrator, DeleteRequest, DescribeTablesRequest, FetchPageRequest,
    InsertRequest, Operation, TableRequest,
};
use crate::output::{ErrorEnvelope, Metadata, SuccessEnvelope};

const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: message.into() }
    }
}

// ============================================================================
// Tool Result Structures
// ============================================================================

/// Text content block for tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

/// Tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

/// Outcome of one operation, rendered as an envelope
#[derive(Debug, Clone)]
pub struct Reply {
    pub is_error: bool,
    pub envelope: Value,
}

impl Reply {
    fn into_tool_result(self) -> Result<Value> {
        let text = serde_json::to_string_pretty(&self.envelope)?;
        let result = CallToolResult {
            content: vec![TextContent { content_type: "text".to_string(), text }],
            is_error: self.is_error,
        };
        Ok(serde_json::to_value(result)?)
    }
}

/// Tool arguments: credentials next to the operation's own fields
#[derive(Debug, Deserialize, JsonSchema)]
struct ToolArgs<R> {
    #[serde(flatten)]
    credentials: Credentials,

    #[serde(flatten)]
    request: R,
}

/// Arguments of tools that need nothing beyond credentials
#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

#[derive(Debug, Deserialize)]
struct ToolCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ============================================================================
// Operation Dispatch
// ============================================================================

/// Run `op` with JSON `arguments` and render the envelope
///
/// Malformed arguments are reported as `Err` (they are protocol errors, not operation
/// failures). Shared by the tool server and the CLI.
pub async fn invoke<C: ConnectionManager>(
    orchestrator: &CrudOrchestrator<C>,
    engine: &str,
    op: Operation,
    arguments: Value,
) -> std::result::Result<Reply, String> {
    let started = Instant::now();

    let reply = match op {
        Operation::TestConnection => {
            let args = parse_args::<NoArgs>(arguments)?;
            let outcome = orchestrator.test_connection(&args.credentials).await;
            render(engine, op, started, outcome, |_, meta| meta)
        }
        Operation::ListDatabases => {
            let args = parse_args::<NoArgs>(arguments)?;
            let outcome = orchestrator.list_databases(&args.credentials).await;
            render(engine, op, started, outcome, |names, meta| meta.with_rows(names.len()))
        }
        Operation::DescribeTables => {
            let args = parse_args::<DescribeTablesRequest>(arguments)?;
            let outcome = orchestrator.describe_tables(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |tables, meta| meta.with_rows(tables.len()))
        }
        Operation::FetchPage => {
            let args = parse_args::<FetchPageRequest>(arguments)?;
            let outcome = orchestrator.fetch_page(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |page, meta| meta.with_rows(page.rows.len()))
        }
        Operation::CreateTable => {
            let args = parse_args::<CreateTableRequest>(arguments)?;
            let outcome = orchestrator.create_table(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |done, meta| meta.with_affected(done.rows_affected))
        }
        Operation::InsertRow => {
            let args = parse_args::<InsertRequest>(arguments)?;
            let outcome = orchestrator.insert_row(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |done, meta| meta.with_affected(done.rows_affected))
        }
        Operation::DeleteRows => {
            let args = parse_args::<DeleteRequest>(arguments)?;
            let outcome = orchestrator.delete_rows(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |done, meta| meta.with_affected(done.rows_affected))
        }
        Operation::DropTable => {
            let args = parse_args::<TableRequest>(arguments)?;
            let outcome = orchestrator.drop_table(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |done, meta| meta.with_affected(done.rows_affected))
        }
        Operation::TruncateTable => {
            let args = parse_args::<TableRequest>(arguments)?;
            let outcome = orchestrator.truncate_table(&args.credentials, &args.request).await;
            render(engine, op, started, outcome, |done, meta| meta.with_affected(done.rows_affected))
        }
    };

    Ok(reply)
}

fn parse_args<R: DeserializeOwned>(arguments: Value) -> std::result::Result<ToolArgs<R>, String> {
    serde_json::from_value(arguments).map_err(|e| format!("Invalid arguments: {e}"))
}

fn render<T: Serialize>(
    engine: &str,
    op: Operation,
    started: Instant,
    outcome: crate::error::Result<T>,
    meta: impl FnOnce(&T, Metadata) -> Metadata,
) -> Reply {
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let rendered = outcome.and_then(|data| {
        let meta = meta(&data, Metadata::new(elapsed));
        serde_json::to_value(SuccessEnvelope::new(engine, op.name(), data, meta))
            .map_err(|e| QuarryError::marshal(format!("Could not serialize result: {e}")))
    });

    match rendered {
        Ok(envelope) => Reply { is_error: false, envelope },
        Err(err) => {
            let envelope = serde_json::to_value(ErrorEnvelope::from_error(engine, op.name(), &err))
                .unwrap_or(Value::Null);
            Reply { is_error: true, envelope }
        }
    }
}

/// Input schema of a tool
fn input_schema(op: Operation) -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator();

    let schema = match op {
        Operation::TestConnection | Operation::ListDatabases => {
            generator.into_root_schema_for::<ToolArgs<NoArgs>>()
        }
        Operation::DescribeTables => generator.into_root_schema_for::<ToolArgs<DescribeTablesRequest>>(),
        Operation::FetchPage => generator.into_root_schema_for::<ToolArgs<FetchPageRequest>>(),
        Operation::CreateTable => generator.into_root_schema_for::<ToolArgs<CreateTableRequest>>(),
        Operation::InsertRow => generator.into_root_schema_for::<ToolArgs<InsertRequest>>(),
        Operation::DeleteRows => generator.into_root_schema_for::<ToolArgs<DeleteRequest>>(),
        Operation::DropTable | Operation::TruncateTable => {
            generator.into_root_schema_for::<ToolArgs<TableRequest>>()
        }
    };

    serde_json::to_value(schema).unwrap_or(Value::Null)
}

fn description(op: Operation) -> &'static str {
    match op {
        Operation::TestConnection => "Open a session with the given credentials and report the server version.",
        Operation::ListDatabases => "List the databases visible to the given credentials.",
        Operation::DescribeTables => {
            "Describe every table of a database: ordered columns (type, length, nullability, key, auto-increment) and total row count."
        }
        Operation::FetchPage => {
            "Fetch one page of a table. 'page' is 1-based; 'limit' defaults to the deployment page size. Returns columns, rows, page, limit and total_rows."
        }
        Operation::CreateTable => "Create a table from an ordered list of column definitions.",
        Operation::InsertRow => "Insert one row. 'data' maps column names to scalar values; values are bound, never interpolated.",
        Operation::DeleteRows => "Delete rows whose primary key column matches one of the comma-joined 'ids'.",
        Operation::DropTable => "Drop a table.",
        Operation::TruncateTable => "Remove every row of a table.",
    }
}

// ============================================================================
// Server
// ============================================================================

/// Tool server over one orchestrator
pub struct RpcServer<C> {
    orchestrator: CrudOrchestrator<C>,
    engine: String,
}

impl<C: ConnectionManager> RpcServer<C> {
    pub fn new(orchestrator: CrudOrchestrator<C>, engine: impl Into<String>) -> Self {
        Self { orchestrator, engine: engine.into() }
    }

    /// Serve requests from stdin until EOF
    ///
    /// Each request is a single line of JSON; each response is a single line of JSON.
    /// Notifications get no response.
    #[allow(clippy::future_not_send)]
    pub async fn serve(&self) -> Result<()> {
        let stdin = io::stdin();
        let reader = stdin.lock();
        let mut stdout = io::stdout();

        for line in reader.lines() {
            let line = line?;
            if let Some(response) = self.handle_line(&line).await? {
                writeln!(stdout, "{response}")?;
                stdout.flush()?;
            }
        }

        Ok(())
    }

    /// Handle one request line; returns the serialized response, if any
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(
                    None,
                    JsonRpcError { code: PARSE_ERROR, message: format!("Parse error: {e}") },
                );
                return Ok(Some(serde_json::to_string(&response)?));
            }
        };

        if request.id.is_none() && request.method.starts_with("notifications/") {
            tracing::debug!(method = %request.method, "notification");
            return Ok(None);
        }

        let response = self.handle_request(request).await?;
        Ok(Some(serde_json::to_string(&response)?))
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request.id;
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "tools/list" => Ok(Self::handle_list_tools()),
            "tools/call" => self.handle_call_tool(request.params).await?,
            other => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Unknown method: {other}"),
            }),
        };

        Ok(match outcome {
            Ok(result) => JsonRpcResponse::result(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "quarry",
                "version": env!("CARGO_PKG_VERSION"),
                "engine": self.engine
            }
        })
    }

    fn handle_list_tools() -> Value {
        let tools: Vec<Value> = Operation::ALL
            .into_iter()
            .map(|op| {
                serde_json::json!({
                    "name": op.name(),
                    "description": description(op),
                    "inputSchema": input_schema(op),
                })
            })
            .collect();
        serde_json::json!({ "tools": tools })
    }

    async fn handle_call_tool(
        &self,
        params: Option<Value>,
    ) -> Result<std::result::Result<Value, JsonRpcError>> {
        let Some(params) = params else {
            return Ok(Err(JsonRpcError::invalid_params("Missing params")));
        };
        let call: ToolCall = match serde_json::from_value(params) {
            Ok(call) => call,
            Err(e) => return Ok(Err(JsonRpcError::invalid_params(format!("Invalid params: {e}")))),
        };
        let Ok(op) = call.name.parse::<Operation>() else {
            return Ok(Err(JsonRpcError::invalid_params(format!("Unknown tool: {}", call.name))));
        };

        match invoke(&self.orchestrator, &self.engine, op, call.arguments).await {
            Ok(reply) => Ok(Ok(reply.into_tool_result()?)),
            Err(message) => Ok(Err(JsonRpcError::invalid_params(message))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Dialect, RowSet, Session, Statement};
    use crate::orchestrator::Settings;
    use serde_json::json;

    /// A server nobody can log in to
    struct Unreachable;

    struct NeverSession;

    impl Session for NeverSession {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn execute(&mut self, _statement: &Statement) -> crate::error::Result<RowSet> {
            Err(QuarryError::execution("unreachable"))
        }

        async fn commit(&mut self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn rollback(&mut self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn close(self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    impl ConnectionManager for Unreachable {
        type Session = NeverSession;

        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn open(
            &self,
            credentials: &Credentials,
            _database: Option<&str>,
        ) -> crate::error::Result<NeverSession> {
            Err(QuarryError::connection(format!("Access denied for user '{}'", credentials.username)))
        }
    }

    fn server() -> RpcServer<Unreachable> {
        RpcServer::new(CrudOrchestrator::new(Unreachable, Settings::default()), "mysql")
    }

    async fn call(line: &str) -> Value {
        let response = server().handle_line(line).await.unwrap().unwrap();
        serde_json::from_str(&response).unwrap()
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = call("{not json").await;
        assert_eq!(response["error"]["code"], json!(-32700));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = call(r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#).await;
        assert_eq!(response["error"]["code"], json!(-32601));
        assert_eq!(response["id"], json!(1));
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .unwrap();
        assert!(response.is_none());
        assert!(server().handle_line("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = call(r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{}}"#).await;
        assert_eq!(response["result"]["serverInfo"]["name"], json!("quarry"));
    }

    #[tokio::test]
    async fn test_tools_list_has_every_operation() {
        let response = call(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#).await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), Operation::ALL.len());

        let insert = tools.iter().find(|t| t["name"] == json!("insert_row")).unwrap();
        let properties = &insert["inputSchema"]["properties"];
        for field in ["username", "password", "db_name", "table_name", "data"] {
            assert!(properties.get(field).is_some(), "insert_row schema lacks {field}");
        }
    }

    #[tokio::test]
    async fn test_operation_failure_is_tool_error() {
        let response = call(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call",
                "params":{"name":"test_connection","arguments":{"username":"root","password":"wrong"}}}"#,
        )
        .await;
        assert_eq!(response["result"]["isError"], json!(true));

        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(!text.contains("wrong"));
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert_eq!(envelope["ok"], json!(false));
        assert_eq!(envelope["error"]["code"], json!("CONNECTION_FAILED"));
        assert_eq!(envelope["error"]["status"], json!(401));
    }

    #[tokio::test]
    async fn test_validation_happens_before_connecting() {
        let response = call(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call",
                "params":{"name":"create_table","arguments":{"username":"root","password":"pw",
                "db_name":"shop","table_name":"t","columns":[]}}}"#,
        )
        .await;
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let envelope: Value = serde_json::from_str(text).unwrap();
        assert_eq!(envelope["error"]["code"], json!("VALIDATION_FAILED"));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_invalid_params() {
        let response = call(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call",
                "params":{"name":"fetch_page","arguments":{"username":"root"}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(-32602));

        let response = call(
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"query","arguments":{}}}"#,
        )
        .await;
        assert_eq!(response["error"]["code"], json!(-32602));
    }
}
