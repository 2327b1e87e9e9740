//! TDS 5.0 / Sybase ASE handler adapter (spec §4.7.c).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::tds;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "default_app_name")]
    app_name: String,
    #[serde(default = "default_server_name")]
    server_name: String,
}

fn default_app_name() -> String {
    "sorng-probe-gateway".to_string()
}

fn default_server_name() -> String {
    "SYBASE".to_string()
}

fn require(field: &str, value: &Option<String>) -> GatewayResult<String> {
    value
        .clone()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid tds parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;

    match operation {
        "preloginProbe" => {
            let probe = tds::prelogin_probe(&mut transport, deadline).await?;
            Ok(serde_json::to_value(probe).unwrap())
        }
        "login" => {
            let username = require("username", &p.username)?;
            let password = require("password", &p.password)?;
            let result = tds::login(
                &mut transport,
                &p.conn.host,
                &username,
                &password,
                &p.app_name,
                &p.server_name,
                deadline,
            )
            .await?;
            Ok(json!({
                "login": result.login,
                "columns": result.columns,
                "rowCount": result.row_count,
                "done": result.done,
                "error": result.error,
            }))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown tds operation `{other}`"))),
    }
}
