//! SANE network protocol (saned, spec §4.7.g): an XDR-flavored RPC, one
//! procedure per exchange. Strings follow SANE's own convention (length
//! *includes* the trailing NUL, unlike the Codec Kit's XDR string), so
//! this module keeps a small local string codec instead of reusing
//! `read_xdr_string` directly.

use serde::Serialize;
use sorng_wire::codec::{read_u32_be, write_u32_be};
use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const SANE_VERSION_CODE: u32 = (1 << 24) | (0 << 16) | 3; // major=1, minor=0, build=3

const RPC_NET_INIT: u32 = 0;
const RPC_NET_GET_DEVICES: u32 = 1;

const SANE_STATUS_GOOD: u32 = 0;

/// Validates a SANE device name per spec §6: rejects NUL, `..`, a
/// leading `/` or `\`, a bare `.`, or anything over 255 bytes.
pub fn validate_device_name(name: &str) -> GatewayResult<()> {
    if name.is_empty() || name == "." {
        return Err(GatewayError::invalid_argument("SANE device name must not be empty or '.'"));
    }
    if name.len() > 255 {
        return Err(GatewayError::invalid_argument("SANE device name exceeds 255 bytes"));
    }
    if name.contains('\0') || name.contains("..") {
        return Err(GatewayError::invalid_argument("SANE device name contains a disallowed sequence"));
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return Err(GatewayError::invalid_argument("SANE device name must not be an absolute path"));
    }
    Ok(())
}

fn write_sane_string(out: &mut Vec<u8>, s: &str) {
    let len = s.len() + 1; // length includes the trailing NUL
    write_u32_be(out, len as u32);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    let pad = (4 - (len % 4)) % 4;
    out.extend(std::iter::repeat(0u8).take(pad));
}

fn read_sane_string(buf: &[u8], cursor: usize) -> GatewayResult<(String, usize)> {
    let (len, mut pos) = read_u32_be(buf, cursor)?;
    let len = len as usize;
    if len == 0 {
        return Ok((String::new(), pos));
    }
    let bytes = buf
        .get(pos..pos + len)
        .ok_or_else(|| GatewayError::protocol_error("truncated SANE string"))?;
    let text = bytes
        .iter()
        .position(|&b| b == 0)
        .map(|nul| &bytes[..nul])
        .unwrap_or(bytes);
    let s = String::from_utf8_lossy(text).into_owned();
    pos += len;
    let pad = (4 - (len % 4)) % 4;
    pos += pad;
    Ok((s, pos))
}

async fn send_rpc_call(transport: &mut Transport, procedure: u32, args: &[u8], deadline: Deadline) -> GatewayResult<()> {
    let mut out = Vec::with_capacity(4 + args.len());
    write_u32_be(&mut out, procedure);
    out.extend_from_slice(args);
    deadline
        .race(async {
            transport.write_all(&out).await.map_err(GatewayError::from)?;
            transport.flush().await.map_err(GatewayError::from)
        })
        .await
}

async fn read_exact_bytes(transport: &mut Transport, n: usize, deadline: Deadline) -> GatewayResult<Vec<u8>> {
    deadline
        .race(async {
            let mut buf = vec![0u8; n];
            transport.read_exact(&mut buf).await.map_err(GatewayError::from)?;
            Ok(buf)
        })
        .await
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub status_ok: bool,
    pub version_code: u32,
}

/// `SANE_NET_INIT`: negotiates the protocol version and announces a
/// caller-supplied username (no password — SANE network auth is a
/// separate MD5-challenge RPC this gateway does not implement).
pub async fn net_init(transport: &mut Transport, username: &str, deadline: Deadline) -> GatewayResult<InitResult> {
    let mut args = Vec::new();
    write_u32_be(&mut args, SANE_VERSION_CODE);
    write_sane_string(&mut args, username);
    send_rpc_call(transport, RPC_NET_INIT, &args, deadline).await?;

    let header = read_exact_bytes(transport, 8, deadline).await?;
    let (status, cursor) = read_u32_be(&header, 0)?;
    let (version_code, _) = read_u32_be(&header, cursor)?;
    Ok(InitResult {
        status_ok: status == SANE_STATUS_GOOD,
        version_code,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SaneDevice {
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub device_type: String,
}

/// `SANE_NET_GET_DEVICES`: returns the scanner list the daemon currently
/// advertises. Device count and per-device string quartets are read
/// incrementally since each carries its own variable framing.
pub async fn get_devices(transport: &mut Transport, deadline: Deadline) -> GatewayResult<Vec<SaneDevice>> {
    send_rpc_call(transport, RPC_NET_GET_DEVICES, &[], deadline).await?;

    let status_bytes = read_exact_bytes(transport, 4, deadline).await?;
    let (status, _) = read_u32_be(&status_bytes, 0)?;
    if status != SANE_STATUS_GOOD {
        return Err(GatewayError::remote(status.to_string(), "SANE_NET_GET_DEVICES returned a non-good status"));
    }

    let count_bytes = read_exact_bytes(transport, 4, deadline).await?;
    let (count, _) = read_u32_be(&count_bytes, 0)?;

    let mut devices = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // Each device descriptor is a non-null pointer flag (u32) followed
        // by four SANE strings; a null pointer (0) ends the array early in
        // some daemon versions, so both forms are tolerated.
        let flag_bytes = read_exact_bytes(transport, 4, deadline).await?;
        let (is_present, _) = read_u32_be(&flag_bytes, 0)?;
        if is_present == 0 {
            continue;
        }
        let mut remaining = Vec::new();
        for _ in 0..4 {
            let len_bytes = read_exact_bytes(transport, 4, deadline).await?;
            let (len, _) = read_u32_be(&len_bytes, 0)?;
            let padded_len = len as usize + ((4 - (len as usize % 4)) % 4);
            let body = read_exact_bytes(transport, padded_len, deadline).await?;
            let mut field = Vec::with_capacity(4 + body.len());
            field.extend_from_slice(&len_bytes);
            field.extend_from_slice(&body);
            remaining.extend_from_slice(&field);
        }
        let (name, c1) = read_sane_string(&remaining, 0)?;
        let (vendor, c2) = read_sane_string(&remaining, c1)?;
        let (model, c3) = read_sane_string(&remaining, c2)?;
        let (device_type, _) = read_sane_string(&remaining, c3)?;
        devices.push(SaneDevice {
            name,
            vendor,
            model,
            device_type,
        });
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_rejects_nul() {
        assert!(validate_device_name("bad\0name").is_err());
    }

    #[test]
    fn device_name_rejects_parent_traversal() {
        assert!(validate_device_name("../etc").is_err());
    }

    #[test]
    fn device_name_rejects_leading_slash() {
        assert!(validate_device_name("/dev/scanner").is_err());
    }

    #[test]
    fn device_name_rejects_bare_dot() {
        assert!(validate_device_name(".").is_err());
    }

    #[test]
    fn device_name_rejects_oversize() {
        let name = "x".repeat(256);
        assert!(validate_device_name(&name).is_err());
    }

    #[test]
    fn device_name_accepts_plausible_name() {
        assert!(validate_device_name("genesys:libusb:001:002").is_ok());
    }

    #[test]
    fn sane_string_roundtrip_includes_nul_in_length() {
        let mut out = Vec::new();
        write_sane_string(&mut out, "abc");
        let (len, _) = read_u32_be(&out, 0).unwrap();
        assert_eq!(len, 4); // "abc" + NUL
        let (s, consumed) = read_sane_string(&out, 0).unwrap();
        assert_eq!(s, "abc");
        assert_eq!(consumed, out.len());
    }
}
