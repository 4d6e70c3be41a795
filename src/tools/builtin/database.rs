//! SQLite workspace database tools
//!
//! Workers get a scratch SQLite database under the project root
//! (`.swarm/swarm.db`): `init_database` applies a schema, `execute_sql`
//! runs statements and returns rows as JSON lines, `list_tables`
//! enumerates user tables. rusqlite is synchronous, so all database work
//! runs on the blocking pool.

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value;
use std::path::PathBuf;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Rows past this count are dropped from query output
const MAX_ROWS: usize = 200;

fn db_path(ctx: &ToolContext) -> PathBuf {
    ctx.root.join(".swarm").join("swarm.db")
}

fn open(ctx: &ToolContext) -> Result<Connection, String> {
    let path = db_path(ctx);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("Failed to create database directory: {}", e))?;
    }
    Connection::open(&path).map_err(|e| format!("Failed to open database: {}", e))
}

pub struct InitDatabaseTool;

#[async_trait]
impl Tool for InitDatabaseTool {
    fn name(&self) -> &'static str {
        "init_database"
    }

    fn description(&self) -> &'static str {
        "Initialize the project's SQLite workspace database with a schema (DDL statements)."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "schema": {
                    "type": "string",
                    "description": "SQL schema to apply (CREATE TABLE statements, etc.)"
                }
            },
            "required": ["schema"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let schema = match input["schema"].as_str() {
            Some(s) => s.to_string(),
            None => return ToolResult::error("schema is required"),
        };

        let ctx = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = open(&ctx)?;
            conn.execute_batch(&schema).map_err(|e| format!("Schema error: {}", e))?;
            Ok::<_, String>(())
        })
        .await;

        match result {
            Ok(Ok(())) => ToolResult::success("Database initialized"),
            Ok(Err(message)) => ToolResult::error(message),
            Err(e) => ToolResult::error(format!("Database task failed: {}", e)),
        }
    }
}

pub struct ExecuteSqlTool;

#[async_trait]
impl Tool for ExecuteSqlTool {
    fn name(&self) -> &'static str {
        "execute_sql"
    }

    fn description(&self) -> &'static str {
        "Run SQL against the workspace database. SELECT returns rows as JSON lines; other statements return the affected row count."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "SQL statement to execute"
                }
            },
            "required": ["sql"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let sql = match input["sql"].as_str() {
            Some(s) => s.trim().to_string(),
            None => return ToolResult::error("sql is required"),
        };
        if sql.is_empty() {
            return ToolResult::error("sql is empty");
        }

        let is_query = sql
            .split_whitespace()
            .next()
            .map(|word| {
                let word = word.to_ascii_uppercase();
                word == "SELECT" || word == "WITH" || word == "PRAGMA"
            })
            .unwrap_or(false);

        let ctx = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = open(&ctx)?;
            if is_query {
                run_query(&conn, &sql)
            } else {
                let affected = conn.execute(&sql, []).map_err(|e| format!("SQL error: {}", e))?;
                Ok(format!("OK, {} row(s) affected", affected))
            }
        })
        .await;

        match result {
            Ok(Ok(output)) => ToolResult::success(output),
            Ok(Err(message)) => ToolResult::error(message),
            Err(e) => ToolResult::error(format!("Database task failed: {}", e)),
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<String, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| format!("SQL error: {}", e))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let mut rows = stmt.query([]).map_err(|e| format!("SQL error: {}", e))?;
    let mut lines = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(|e| format!("SQL error: {}", e))? {
        if lines.len() >= MAX_ROWS {
            truncated = true;
            break;
        }
        let mut object = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match row.get_ref(i).map_err(|e| format!("SQL error: {}", e))? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => Value::from(n),
                ValueRef::Real(f) => Value::from(f),
                ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).to_string()),
                ValueRef::Blob(b) => Value::from(format!("<{} bytes>", b.len())),
            };
            object.insert(name.clone(), value);
        }
        lines.push(Value::Object(object).to_string());
    }

    if lines.is_empty() {
        Ok("(no rows)".to_string())
    } else if truncated {
        Ok(format!("{}\n[truncated at {} rows]", lines.join("\n"), MAX_ROWS))
    } else {
        Ok(lines.join("\n"))
    }
}

pub struct ListTablesTool;

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &'static str {
        "list_tables"
    }

    fn description(&self) -> &'static str {
        "List the tables in the workspace database."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _input: Value, ctx: &ToolContext) -> ToolResult {
        let ctx = ctx.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = open(&ctx)?;
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .map_err(|e| format!("SQL error: {}", e))?;
            let names: Result<Vec<String>, _> = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| format!("SQL error: {}", e))?
                .collect();
            names.map_err(|e| format!("SQL error: {}", e))
        })
        .await;

        match result {
            Ok(Ok(names)) if names.is_empty() => ToolResult::success("No tables"),
            Ok(Ok(names)) => ToolResult::success(names.join("\n")),
            Ok(Err(message)) => ToolResult::error(message),
            Err(e) => ToolResult::error(format!("Database task failed: {}", e)),
        }
    }
}
