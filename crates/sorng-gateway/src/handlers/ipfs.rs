//! IPFS HTTP API handler adapter (spec §1, §9).

use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::ipfs_http;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_CAT_CAP: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    cid: Option<String>,
    #[serde(default = "default_max_bytes")]
    max_bytes: usize,
}

fn default_max_bytes() -> usize {
    DEFAULT_CAT_CAP
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid ipfs parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let base_url = format!("http://{}:{}", p.conn.host, port);
    let deadline = Deadline::after(p.conn.timeout());

    match operation {
        "version" => {
            let info = ipfs_http::version(&base_url, deadline).await?;
            Ok(serde_json::to_value(info).unwrap())
        }
        "id" => {
            let info = ipfs_http::id(&base_url, deadline).await?;
            Ok(serde_json::to_value(info).unwrap())
        }
        "cat" => {
            let cid = p
                .cid
                .ok_or_else(|| GatewayError::invalid_argument("missing required field `cid`"))?;
            let bytes = ipfs_http::cat(&base_url, &cid, p.max_bytes, deadline).await?;
            Ok(json!({ "data": hex::encode(&bytes), "size": bytes.len() }))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown ipfs operation `{other}`"))),
    }
}
