//! IPFS HTTP API (spec §1, §9): the one protocol module in this gateway
//! that rides plain HTTP instead of a hand-rolled wire codec, since the
//! Kubo RPC API is itself JSON-over-HTTP.

use serde::Serialize;
use sorng_wire::{Deadline, GatewayError, GatewayResult};
use std::time::Duration;

fn client_for(deadline: Deadline) -> GatewayResult<reqwest::Client> {
    let remaining = deadline.remaining();
    if remaining <= Duration::ZERO {
        return Err(GatewayError::timeout("deadline already elapsed before the IPFS HTTP request"));
    }
    reqwest::Client::builder()
        .timeout(remaining)
        .build()
        .map_err(|e| GatewayError::network(format!("failed to build HTTP client: {e}")))
}

fn map_reqwest_err(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::timeout(e.to_string())
    } else {
        GatewayError::network(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit: Option<String>,
    pub repo: Option<String>,
}

/// `POST /api/v0/version`.
pub async fn version(base_url: &str, deadline: Deadline) -> GatewayResult<VersionInfo> {
    let client = client_for(deadline)?;
    let url = format!("{}/api/v0/version", base_url.trim_end_matches('/'));
    let resp = client.post(&url).send().await.map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        return Err(GatewayError::remote(resp.status().as_str().to_string(), "IPFS version endpoint returned a non-2xx status"));
    }
    let body: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
    Ok(VersionInfo {
        version: body.get("Version").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        commit: body.get("Commit").and_then(|v| v.as_str()).map(|s| s.to_string()),
        repo: body.get("Repo").and_then(|v| v.as_str()).map(|s| s.to_string()),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct IdInfo {
    pub id: String,
    pub addresses: Vec<String>,
    pub agent_version: Option<String>,
}

/// `POST /api/v0/id`.
pub async fn id(base_url: &str, deadline: Deadline) -> GatewayResult<IdInfo> {
    let client = client_for(deadline)?;
    let url = format!("{}/api/v0/id", base_url.trim_end_matches('/'));
    let resp = client.post(&url).send().await.map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        return Err(GatewayError::remote(resp.status().as_str().to_string(), "IPFS id endpoint returned a non-2xx status"));
    }
    let body: serde_json::Value = resp.json().await.map_err(map_reqwest_err)?;
    let addresses = body
        .get("Addresses")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    Ok(IdInfo {
        id: body.get("ID").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        addresses,
        agent_version: body.get("AgentVersion").and_then(|v| v.as_str()).map(|s| s.to_string()),
    })
}

/// `POST /api/v0/cat?arg=<cid>`, capped at `max_bytes` (mirrors the SFTP
/// download budget pattern rather than buffering an unbounded body).
pub async fn cat(base_url: &str, cid: &str, max_bytes: usize, deadline: Deadline) -> GatewayResult<Vec<u8>> {
    let client = client_for(deadline)?;
    let url = format!("{}/api/v0/cat", base_url.trim_end_matches('/'));
    let resp = client
        .post(&url)
        .query(&[("arg", cid)])
        .send()
        .await
        .map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        return Err(GatewayError::remote(resp.status().as_str().to_string(), "IPFS cat endpoint returned a non-2xx status"));
    }
    let bytes = resp.bytes().await.map_err(map_reqwest_err)?;
    if bytes.len() > max_bytes {
        Ok(bytes[..max_bytes].to_vec())
    } else {
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn elapsed_deadline_fails_fast_without_sending() {
        let d = Deadline::after(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let err = client_for(d).unwrap_err();
        assert_eq!(err.kind, sorng_wire::ErrorKind::Timeout);
    }
}
