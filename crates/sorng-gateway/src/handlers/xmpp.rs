//! XMPP c2s/s2s handler adapter (spec §4.7.e, scenario §8.6).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::xmpp;
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT_C2S: u16 = 5222;
const DEFAULT_PORT_S2S: u16 = 5269;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    domain: Option<String>,
    username: Option<String>,
    password: Option<String>,
    #[serde(default = "default_resource")]
    resource: String,
    origin_domain: Option<String>,
}

fn default_resource() -> String {
    "sorng-probe-gateway".to_string()
}

fn require(field: &str, value: &Option<String>) -> GatewayResult<String> {
    value
        .clone()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid xmpp parameters: {e}")))?;

    match operation {
        "probeC2s" => {
            let port = p.conn.port_or(DEFAULT_PORT_C2S)?;
            let deadline = Deadline::after(p.conn.timeout());
            let transport = dial_plain(&p.conn.host, port, deadline).await?;
            let domain = require("domain", &p.domain)?;
            let username = require("username", &p.username)?;
            let password = require("password", &p.password)?;
            let result = xmpp::probe_c2s(transport, &domain, &username, &password, &p.resource, deadline).await?;
            Ok(json!({
                "phases": result.phases,
                "authenticated": result.authenticated,
                "tlsUpgraded": result.tls_upgraded,
                "boundJid": result.bound_jid,
            }))
        }
        "probeS2s" => {
            let port = p.conn.port_or(DEFAULT_PORT_S2S)?;
            let deadline = Deadline::after(p.conn.timeout());
            let mut transport = dial_plain(&p.conn.host, port, deadline).await?;
            let origin_domain = require("originDomain", &p.origin_domain)?;
            let features = xmpp::probe_s2s(&mut transport, &origin_domain, deadline).await?;
            Ok(serde_json::to_value(features).unwrap())
        }
        other => Err(GatewayError::invalid_argument(format!("unknown xmpp operation `{other}`"))),
    }
}
