//! SANE network daemon handler adapter (spec §4.7.g).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::sane;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 6566;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    #[serde(default = "default_username")]
    username: String,
}

fn default_username() -> String {
    "sorng-probe-gateway".to_string()
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid sane parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;

    let init = sane::net_init(&mut transport, &p.username, deadline).await?;
    if !init.status_ok {
        return Err(GatewayError::protocol_error("SANE_NET_INIT rejected by the daemon"));
    }

    match operation {
        "getDevices" => {
            let devices = sane::get_devices(&mut transport, deadline).await?;
            Ok(serde_json::to_value(devices).unwrap())
        }
        "init" => Ok(json!({ "statusOk": init.status_ok, "versionCode": init.version_code })),
        other => Err(GatewayError::invalid_argument(format!("unknown sane operation `{other}`"))),
    }
}
