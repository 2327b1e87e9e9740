//! ClickHouse native protocol handler adapter (spec §4.7.d, scenario §8.4).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::clickhouse;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 9000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    #[serde(default = "default_database")]
    database: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    password: String,
    query: Option<String>,
    #[serde(default = "default_query_id")]
    query_id: String,
}

fn default_database() -> String {
    "default".to_string()
}

fn default_username() -> String {
    "default".to_string()
}

fn default_query_id() -> String {
    "sorng-probe-gateway".to_string()
}

/// Scenario §8.4 reports every cell as a string (`rows=[["1"]]`), so
/// numeric/bool columns are rendered through their display form; `null`
/// is preserved as `null` rather than the string `"null"`.
fn stringify_cell(v: Value) -> Value {
    match v {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(s),
        Value::Number(n) => Value::String(n.to_string()),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid clickhouse parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;

    clickhouse::handshake(&mut transport, &p.database, &p.username, &p.password, deadline).await?;

    match operation {
        "ping" => {
            clickhouse::ping(&mut transport, deadline).await?;
            Ok(json!({ "ok": true }))
        }
        "query" => {
            let sql = p
                .query
                .clone()
                .ok_or_else(|| GatewayError::invalid_argument("missing required field `query`"))?;
            let result = clickhouse::query(&mut transport, &p.query_id, &sql, deadline).await?;
            let rows: Vec<Vec<Value>> = (0..result.row_count)
                .map(|row_idx| {
                    result
                        .columns
                        .iter()
                        .map(|c| stringify_cell(c.values.get(row_idx).cloned().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect();
            Ok(json!({
                "queryResult": {
                    "columns": result.columns.iter().map(|c| json!({ "name": c.name, "type": c.type_name })).collect::<Vec<_>>(),
                    "rows": rows,
                    "rowCount": result.row_count,
                }
            }))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown clickhouse operation `{other}`"))),
    }
}
