//! SIPS (RFC 3261 over TLS) handler adapter (spec §4.7.f, scenario §8.5).
//!
//! SIPS always dials TLS directly rather than negotiating an upgrade, per
//! `sorng_protocols::sips`'s own doc comment.

use crate::connect::dial_tls;
use crate::params::ConnectionParams;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::sips::{self, InviteOutcome};
use sorng_wire::{Deadline, GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 5061;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    #[serde(default)]
    accept_invalid_certs: bool,
    user: Option<String>,
    password: Option<String>,
    caller: Option<String>,
    callee: Option<String>,
}

fn require(field: &str, value: &Option<String>) -> GatewayResult<String> {
    value
        .clone()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))
}

fn invite_outcome_json(outcome: InviteOutcome) -> Value {
    match outcome {
        InviteOutcome::Answered { to_tag } => json!({ "status": "answered", "toTag": to_tag }),
        InviteOutcome::Rejected { status_code } => json!({ "status": "rejected", "statusCode": status_code }),
        InviteOutcome::TimedOut => json!({ "status": "timedOut" }),
    }
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid sips parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let mut transport = dial_tls(&p.conn.host, port, p.accept_invalid_certs, deadline).await?;

    match operation {
        "register" => {
            let user = require("user", &p.user)?;
            let password = require("password", &p.password)?;
            let result = sips::register_with_digest(&mut transport, &p.conn.host, &user, &password, deadline).await?;
            Ok(json!({
                "success": result.success,
                "authenticated": result.authenticated,
                "realm": result.realm,
            }))
        }
        "invite" => {
            let caller = require("caller", &p.caller)?;
            let callee = require("callee", &p.callee)?;
            let result = sips::invite(&mut transport, &p.conn.host, &caller, &callee, deadline).await?;
            Ok(invite_outcome_json(result.outcome))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown sips operation `{other}`"))),
    }
}
