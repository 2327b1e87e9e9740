//! ZooKeeper four-letter-word handler adapter (spec §4.7.g).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::zookeeper;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 2181;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    word: Option<String>,
}

pub async fn handle(_operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid zookeeper parameters: {e}")))?;
    let word = p
        .word
        .ok_or_else(|| GatewayError::invalid_argument("missing required field `word`"))?;
    if !zookeeper::is_known_command(&word) {
        return Err(GatewayError::invalid_argument(format!(
            "`{word}` is not a recognized ZooKeeper four-letter command"
        )));
    }
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_plain(&p.conn.host, port, deadline).await?;
    let response = zookeeper::four_letter_word(&mut transport, &word, deadline).await?;
    Ok(json!({ "response": response }))
}
