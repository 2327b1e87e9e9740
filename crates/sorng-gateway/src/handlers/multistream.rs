//! libp2p multistream-select handler adapter (spec §4.7.g).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::multistream;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    protocol_id: Option<String>,
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid multistream parameters: {e}")))?;
    if p.conn.port.is_none() {
        return Err(GatewayError::invalid_argument("multistream requires an explicit `port`"));
    }
    let port = p.conn.port_or(0)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;

    match operation {
        "negotiate" => {
            let protocol_id = p
                .protocol_id
                .ok_or_else(|| GatewayError::invalid_argument("missing required field `protocolId`"))?;
            let result = multistream::negotiate(&mut transport, &protocol_id, deadline).await?;
            Ok(json!({ "agreed": result.agreed, "echoedProtocol": result.echoed_protocol }))
        }
        "list" => {
            let protocols = multistream::list_protocols(&mut transport, deadline).await?;
            Ok(json!({ "protocols": protocols }))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown multistream operation `{other}`"))),
    }
}
