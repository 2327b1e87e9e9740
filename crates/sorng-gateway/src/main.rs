//! Minimal CLI front end for the handler adapter: reads one JSON object
//! per line from stdin (`{"protocol", "operation", "params"}`), dispatches
//! it, and writes the resulting envelope to stdout.
//!
//! This is not the ingress layer the spec treats as an external
//! collaborator (an HTTP front door, field validation ahead of the core);
//! it exists only so the handler adapter can be driven end to end without
//! one, the way the workspace's `headless` gateway binary was meant to be
//! driven without the Tauri UI.

use serde::Deserialize;
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Request {
    protocol: String,
    operation: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) if l.trim().is_empty() => continue,
            Ok(l) => l,
            Err(e) => {
                tracing::error!("failed to read stdin: {e}");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("malformed request line, skipping: {e}");
                continue;
            }
        };

        tracing::debug!(protocol = %request.protocol, operation = %request.operation, "dispatching");
        let envelope =
            sorng_gateway::handle_operation(&request.protocol, &request.operation, request.params).await;
        let rendered = serde_json::to_string(&envelope).unwrap_or_else(|e| {
            format!("{{\"success\":false,\"error\":\"failed to serialize envelope: {e}\"}}")
        });
        let _ = writeln!(out, "{rendered}");
    }
}
