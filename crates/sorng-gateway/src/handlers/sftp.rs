//! SFTP handler adapter (spec §4.7.b, scenario §8.3).
//!
//! The spec assumes a collaborator already opened the authenticated SSH
//! channel; this gateway has no such collaborator wired in, so it dials
//! the configured host/port directly and speaks SFTP over the raw TCP
//! byte stream, which is the nearest in-scope approximation (see
//! DESIGN.md for the open-question resolution this implies).

use crate::connect::dial_plain;
use crate::params::ConnectionParams;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use sorng_protocols::sftp::{SftpAttrs, SftpSession, SSH_FXF_CREAT, SSH_FXF_READ, SSH_FXF_TRUNC, SSH_FXF_WRITE};
use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};

const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    #[serde(flatten)]
    conn: ConnectionParams,
    path: Option<String>,
    to: Option<String>,
    content: Option<String>,
    encoding: Option<String>,
}

fn require(field: &str, value: &Option<String>) -> GatewayResult<String> {
    value
        .clone()
        .ok_or_else(|| GatewayError::invalid_argument(format!("missing required field `{field}`")))
}

fn attrs_json(attrs: &SftpAttrs) -> Value {
    json!({
        "size": attrs.size,
        "uid": attrs.uid,
        "gid": attrs.gid,
        "permissions": attrs.permissions,
        "atime": attrs.atime,
        "mtime": attrs.mtime,
        "isDirectory": attrs.is_directory,
        "isSymlink": attrs.is_symlink,
    })
}

/// Picks the same encoding rule as spec scenario §8.3: valid UTF-8 is
/// surfaced as `utf8`, anything else falls back to `base64`.
fn encode_content(data: &[u8]) -> (String, String) {
    match std::str::from_utf8(data) {
        Ok(s) => ("utf-8".to_string(), s.to_string()),
        Err(_) => (
            "base64".to_string(),
            base64::engine::general_purpose::STANDARD.encode(data),
        ),
    }
}

fn decode_content(content: &str, encoding: &str) -> GatewayResult<Vec<u8>> {
    match encoding {
        "utf-8" | "utf8" => Ok(content.as_bytes().to_vec()),
        "base64" => base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|e| GatewayError::invalid_argument(format!("`content` is not valid base64: {e}"))),
        other => Err(GatewayError::invalid_argument(format!("unknown encoding `{other}`"))),
    }
}

pub async fn handle(operation: &str, params: Value) -> GatewayResult<Value> {
    let p: Params = serde_json::from_value(params)
        .map_err(|e| GatewayError::invalid_argument(format!("invalid sftp parameters: {e}")))?;
    let port = p.conn.port_or(DEFAULT_PORT)?;
    let deadline = Deadline::after(p.conn.timeout());
    let transport: Transport = dial_plain(&p.conn.host, port, deadline).await?;
    let mut session = SftpSession::handshake(transport, deadline).await?;

    match operation {
        "download" => {
            let path = require("path", &p.path)?;
            let handle = session.open(&path, SSH_FXF_READ, deadline).await?;
            let read_result = session.read_to_cap(&handle, deadline).await;
            let close_result = session.close(&handle, deadline).await;
            let (data, truncated) = read_result?;
            close_result?;
            let (encoding, content) = encode_content(&data);
            Ok(json!({
                "content": content,
                "encoding": encoding,
                "size": data.len(),
                "truncated": truncated,
            }))
        }
        "upload" => {
            let path = require("path", &p.path)?;
            let content = require("content", &p.content)?;
            let encoding = p.encoding.as_deref().unwrap_or("utf-8");
            let data = decode_content(&content, encoding)?;
            let handle = session
                .open(&path, SSH_FXF_WRITE | SSH_FXF_CREAT | SSH_FXF_TRUNC, deadline)
                .await?;
            let write_result = session.write_chunked(&handle, &data, deadline).await;
            let close_result = session.close(&handle, deadline).await;
            write_result?;
            close_result?;
            Ok(json!({ "size": data.len() }))
        }
        "stat" => {
            let path = require("path", &p.path)?;
            let attrs = session.stat(&path, deadline).await?;
            Ok(attrs_json(&attrs))
        }
        "remove" => {
            let path = require("path", &p.path)?;
            session.remove(&path, deadline).await?;
            Ok(json!({}))
        }
        "mkdir" => {
            let path = require("path", &p.path)?;
            session.mkdir(&path, deadline).await?;
            Ok(json!({}))
        }
        "rename" => {
            let from = require("path", &p.path)?;
            let to = require("to", &p.to)?;
            session.rename(&from, &to, deadline).await?;
            Ok(json!({}))
        }
        "list" => {
            let path = require("path", &p.path)?;
            let handle = session.opendir(&path, deadline).await?;
            let mut entries = Vec::new();
            let list_result: GatewayResult<()> = loop {
                match session.readdir(&handle, deadline).await {
                    Ok(batch) if batch.is_empty() => break Ok(()),
                    Ok(batch) => entries.extend(batch),
                    Err(e) => break Err(e),
                }
            };
            let close_result = session.close(&handle, deadline).await;
            list_result?;
            close_result?;
            let listed: Vec<Value> = entries
                .into_iter()
                .map(|e| json!({ "filename": e.filename, "attrs": attrs_json(&e.attrs) }))
                .collect();
            Ok(Value::Array(listed))
        }
        other => Err(GatewayError::invalid_argument(format!("unknown sftp operation `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bytes_encode_as_utf8() {
        let (encoding, content) = encode_content(b"hello");
        assert_eq!(encoding, "utf-8");
        assert_eq!(content, "hello");
    }

    #[test]
    fn non_utf8_bytes_encode_as_base64() {
        let (encoding, content) = encode_content(&[0x00, 0xFF, 0x00]);
        assert_eq!(encoding, "base64");
        assert_eq!(content, "AP8A");
    }

    #[test]
    fn decode_content_round_trips_base64() {
        let decoded = decode_content("AP8A", "base64").unwrap();
        assert_eq!(decoded, vec![0x00, 0xFF, 0x00]);
    }
}
