//! libp2p multistream-select (spec §4.7.g): varint-length-prefixed,
//! newline-terminated UTF-8 lines, negotiated with a single proposal per
//! probe rather than the full renegotiation loop a long-lived libp2p
//! connection would run.

use sorng_wire::codec::{write_varuint, VARUINT_MAX_BYTES};
use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

pub const MULTISTREAM_HEADER: &str = "/multistream/1.0.0";
const NOT_AVAILABLE: &str = "na";

async fn write_line(transport: &mut Transport, line: &str, deadline: Deadline) -> GatewayResult<()> {
    let mut framed = Vec::with_capacity(line.len() + 1 + VARUINT_MAX_BYTES);
    let body_len = (line.len() + 1) as u64; // +1 for the trailing '\n'
    write_varuint(&mut framed, body_len);
    framed.extend_from_slice(line.as_bytes());
    framed.push(b'\n');
    deadline
        .race(async {
            transport.write_all(&framed).await.map_err(GatewayError::from)?;
            transport.flush().await.map_err(GatewayError::from)
        })
        .await
}

async fn read_varuint_byte(transport: &mut Transport, deadline: Deadline) -> GatewayResult<u8> {
    deadline
        .race(async {
            let mut b = [0u8; 1];
            transport.read_exact(&mut b).await.map_err(GatewayError::from)?;
            Ok(b[0])
        })
        .await
}

/// Reads one varint-length-prefixed line and strips its trailing `\n`.
/// Returns the raw decoded bytes without the newline so callers can tell
/// a protocol-id response (UTF-8 line) apart from a binary `ls` payload.
async fn read_line(transport: &mut Transport, deadline: Deadline) -> GatewayResult<Vec<u8>> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;
    for i in 0..VARUINT_MAX_BYTES {
        let byte = read_varuint_byte(transport, deadline).await?;
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if i == VARUINT_MAX_BYTES - 1 {
            return Err(GatewayError::protocol_error("multistream varint exceeds 9-byte continuation limit"));
        }
    }
    let len = value as usize;
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut body = vec![0u8; len];
    deadline
        .race(async {
            transport.read_exact(&mut body).await.map_err(GatewayError::from)
        })
        .await?;
    if body.last() == Some(&b'\n') {
        body.pop();
    }
    Ok(body)
}

async fn read_text_line(transport: &mut Transport, deadline: Deadline) -> GatewayResult<String> {
    let bytes = read_line(transport, deadline).await?;
    String::from_utf8(bytes).map_err(|_| GatewayError::protocol_error("multistream line is not valid UTF-8"))
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NegotiationResult {
    pub agreed: bool,
    pub echoed_protocol: Option<String>,
}

/// Opens the multistream handshake and proposes `protocol_id`. The peer
/// either echoes the protocol id back (agreed) or replies `na` (not
/// available); any other first line is a protocol violation.
pub async fn negotiate(transport: &mut Transport, protocol_id: &str, deadline: Deadline) -> GatewayResult<NegotiationResult> {
    write_line(transport, MULTISTREAM_HEADER, deadline).await?;
    let server_header = read_text_line(transport, deadline).await?;
    if server_header != MULTISTREAM_HEADER {
        return Err(GatewayError::protocol_error(format!(
            "peer did not echo the multistream header, got: {server_header}"
        )));
    }
    write_line(transport, protocol_id, deadline).await?;
    let response = read_text_line(transport, deadline).await?;
    if response == protocol_id {
        Ok(NegotiationResult {
            agreed: true,
            echoed_protocol: Some(response),
        })
    } else if response == NOT_AVAILABLE {
        Ok(NegotiationResult {
            agreed: false,
            echoed_protocol: None,
        })
    } else {
        Err(GatewayError::protocol_error(format!(
            "unexpected multistream response: {response}"
        )))
    }
}

/// The `ls` pseudo-protocol: a single varint-framed message containing a
/// newline-separated list of protocol ids, despite looking like "a list"
/// at the framing layer (spec §9 redesign note on the IPFS/libp2p `ls`
/// surface).
pub async fn list_protocols(transport: &mut Transport, deadline: Deadline) -> GatewayResult<Vec<String>> {
    write_line(transport, MULTISTREAM_HEADER, deadline).await?;
    let server_header = read_text_line(transport, deadline).await?;
    if server_header != MULTISTREAM_HEADER {
        return Err(GatewayError::protocol_error(format!(
            "peer did not echo the multistream header, got: {server_header}"
        )));
    }
    write_line(transport, "ls", deadline).await?;
    let payload = read_line(transport, deadline).await?;
    let text = String::from_utf8(payload).map_err(|_| GatewayError::protocol_error("ls response is not valid UTF-8"))?;
    Ok(text.lines().map(|s| s.to_string()).filter(|s| !s.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_length_prefix_includes_newline() {
        // "/multistream/1.0.0" is 19 bytes; framed body is 20 with '\n'.
        assert_eq!(MULTISTREAM_HEADER.len(), 19);
    }
}
