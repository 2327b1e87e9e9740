//! SIPS — RFC 3261 over TLS (spec §4.7.f): text message parsing with a
//! `Content-Length`-gated body, RFC 2617 digest retry, and the INVITE
//! cleanup state machine (CANCEL / ACK / BYE).

use rand::RngCore;
use serde::Serialize;
use sorng_wire::crypto::{sip_digest_response, DigestParams};
use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, Clone)]
pub struct SipResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl SipResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    sorng_wire::codec::to_hex(&bytes)
}

fn new_branch() -> String {
    format!("z9hG4bK{}", random_token(8))
}

/// Reads a SIP message off the transport: headers up to `\r\n\r\n`, then
/// exactly `Content-Length` more bytes for the body. A missing
/// `Content-Length` is a `ProtocolError` (spec §6: RFC-mandated fields
/// may not be silently treated as absent).
async fn read_message(transport: &mut Transport, deadline: Deadline) -> GatewayResult<SipResponse> {
    let mut header_buf = Vec::new();
    let mut chunk = [0u8; 1];
    loop {
        let n = deadline
            .race(async { transport.read(&mut chunk).await.map_err(GatewayError::from) })
            .await?;
        if n == 0 {
            return Err(GatewayError::network("connection closed before SIP headers completed"));
        }
        header_buf.push(chunk[0]);
        if header_buf.len() >= 4 && &header_buf[header_buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if header_buf.len() > 64 * 1024 {
            return Err(GatewayError::protocol_error("SIP header block exceeded the size cap"));
        }
    }
    let header_text = String::from_utf8_lossy(&header_buf).into_owned();
    let mut lines = header_text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().unwrap_or_default();
    let status_code: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GatewayError::protocol_error(format!("malformed SIP status line: {status_line}")))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .ok_or_else(|| GatewayError::protocol_error("SIP response is missing Content-Length"))?
        .trim()
        .parse()
        .map_err(|_| GatewayError::protocol_error("SIP Content-Length is not a valid integer"))?;

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        deadline
            .race(async { transport.read_exact(&mut body).await.map_err(GatewayError::from) })
            .await?;
    }

    Ok(SipResponse {
        status_code,
        reason,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn send_message(transport: &mut Transport, message: &str, deadline: Deadline) -> GatewayResult<()> {
    deadline
        .race(async {
            transport.write_all(message.as_bytes()).await.map_err(GatewayError::from)?;
            transport.flush().await.map_err(GatewayError::from)
        })
        .await
}

struct DialogContext {
    call_id: String,
    from_tag: String,
    cseq: u32,
    host: String,
    user: String,
}

fn build_request(
    method: &str,
    request_uri: &str,
    ctx: &DialogContext,
    branch: &str,
    to_tag: Option<&str>,
    extra_headers: &[(&str, String)],
    body: &str,
) -> String {
    let to_header = match to_tag {
        Some(tag) => format!("<sips:{}>;tag={}", request_uri.trim_start_matches("sips:"), tag),
        None => format!("<sips:{}>", request_uri.trim_start_matches("sips:")),
    };
    let mut msg = format!(
        "{method} {request_uri} SIP/2.0\r\n\
         Via: SIP/2.0/TLS {host};branch={branch}\r\n\
         Max-Forwards: 70\r\n\
         From: <sips:{user}@{host}>;tag={from_tag}\r\n\
         To: {to_header}\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: {cseq} {method}\r\n",
        host = ctx.host,
        user = ctx.user,
        from_tag = ctx.from_tag,
        call_id = ctx.call_id,
        cseq = ctx.cseq,
    );
    for (k, v) in extra_headers {
        msg.push_str(&format!("{k}: {v}\r\n"));
    }
    msg.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    msg
}

#[derive(Debug, Clone)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    qop: Option<String>,
    header_name: &'static str, // "WWW-Authenticate" or "Proxy-Authenticate"
}

fn parse_digest_challenge(response: &SipResponse) -> GatewayResult<DigestChallenge> {
    let (raw, header_name) = if let Some(h) = response.header("www-authenticate") {
        (h, "Authorization")
    } else if let Some(h) = response.header("proxy-authenticate") {
        (h, "Proxy-Authorization")
    } else {
        return Err(GatewayError::protocol_error("401/407 response carries no *-Authenticate header"));
    };
    let mut fields = HashMap::new();
    let body = raw.trim_start_matches("Digest").trim();
    for part in split_digest_params(body) {
        if let Some((k, v)) = part.split_once('=') {
            fields.insert(k.trim().to_string(), v.trim().trim_matches('"').to_string());
        }
    }
    let realm = fields
        .get("realm")
        .cloned()
        .ok_or_else(|| GatewayError::protocol_error("digest challenge missing realm"))?;
    let nonce = fields
        .get("nonce")
        .cloned()
        .ok_or_else(|| GatewayError::protocol_error("digest challenge missing nonce"))?;
    let qop = fields.get("qop").cloned();
    Ok(DigestChallenge {
        realm,
        nonce,
        qop,
        header_name: if header_name == "Authorization" {
            "Authorization"
        } else {
            "Proxy-Authorization"
        },
    })
}

/// Splits a digest-params string on commas that are not inside quotes.
fn split_digest_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
    pub success: bool,
    pub authenticated: bool,
    pub realm: Option<String>,
}

/// REGISTER with RFC 2617 digest retry (spec §4.7.f, scenario §8.5):
/// first REGISTER expects a 401/407 challenge; the second carries the
/// computed `Authorization`/`Proxy-Authorization` header.
pub async fn register_with_digest(
    transport: &mut Transport,
    host: &str,
    user: &str,
    password: &str,
    deadline: Deadline,
) -> GatewayResult<RegisterResult> {
    let ctx = DialogContext {
        call_id: format!("{}@{}", random_token(8), host),
        from_tag: random_token(4),
        cseq: 1,
        host: host.to_string(),
        user: user.to_string(),
    };
    let request_uri = format!("sips:{host}");

    let first = build_request("REGISTER", &request_uri, &ctx, &new_branch(), None, &[], "");
    send_message(transport, &first, deadline).await?;
    let response = read_message(transport, deadline).await?;

    if response.status_code == 200 {
        return Ok(RegisterResult {
            success: true,
            authenticated: false,
            realm: None,
        });
    }
    if response.status_code != 401 && response.status_code != 407 {
        return Ok(RegisterResult {
            success: false,
            authenticated: false,
            realm: None,
        });
    }

    let challenge = parse_digest_challenge(&response)?;
    let nc = "00000001";
    let cnonce = random_token(4);
    let qop_auth = challenge.qop.as_ref().map(|_| (nc, cnonce.as_str()));
    let resp_hash = sip_digest_response(&DigestParams {
        username: user,
        realm: &challenge.realm,
        password,
        method: "REGISTER",
        uri: &request_uri,
        nonce: &challenge.nonce,
        qop_auth,
    });

    let mut auth_value = format!(
        "Digest username=\"{user}\", realm=\"{}\", nonce=\"{}\", uri=\"{request_uri}\", algorithm=MD5, response=\"{resp_hash}\"",
        challenge.realm, challenge.nonce
    );
    if challenge.qop.is_some() {
        auth_value.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
    }

    let ctx2 = DialogContext { cseq: 2, ..ctx };
    let second = build_request(
        "REGISTER",
        &request_uri,
        &ctx2,
        &new_branch(),
        None,
        &[(challenge.header_name, auth_value)],
        "",
    );
    send_message(transport, &second, deadline).await?;
    let final_response = read_message(transport, deadline).await?;

    Ok(RegisterResult {
        success: final_response.status_code == 200,
        authenticated: final_response.status_code == 200,
        realm: Some(challenge.realm),
    })
}

#[derive(Debug, Clone, Serialize)]
pub enum InviteOutcome {
    Answered { to_tag: Option<String> },
    Rejected { status_code: u16 },
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteResult {
    pub outcome: InviteOutcome,
}

/// Sends an INVITE and runs the RFC 3261 §13/§17.1.1.3 cleanup for
/// whichever outcome the peer produces: no final response before the
/// deadline fires `CANCEL`; a 2xx gets `ACK` + `BYE`; a 3xx–6xx gets
/// `ACK` on the **same** branch as the INVITE. All cleanup sends are
/// best-effort (spec §4.7.f: failure to send them never alters the
/// returned result).
pub async fn invite(
    transport: &mut Transport,
    host: &str,
    caller: &str,
    callee: &str,
    deadline: Deadline,
) -> GatewayResult<InviteResult> {
    let ctx = DialogContext {
        call_id: format!("{}@{}", random_token(8), host),
        from_tag: random_token(4),
        cseq: 1,
        host: host.to_string(),
        user: caller.to_string(),
    };
    let request_uri = format!("sips:{callee}@{host}");
    let invite_branch = new_branch();
    let body = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n";
    let invite_msg = build_request(
        "INVITE",
        &request_uri,
        &ctx,
        &invite_branch,
        None,
        &[("Content-Type", "application/sdp".to_string())],
        body,
    );
    send_message(transport, &invite_msg, deadline).await?;

    let mut last_to_tag: Option<String> = None;
    loop {
        let response = match read_message(transport, deadline).await {
            Ok(r) => r,
            Err(e) if e.kind == sorng_wire::ErrorKind::Timeout => {
                let cancel = build_request("CANCEL", &request_uri, &ctx, &invite_branch, None, &[], "");
                let _ = send_message(transport, &cancel, deadline).await;
                return Ok(InviteResult {
                    outcome: InviteOutcome::TimedOut,
                });
            }
            Err(e) => return Err(e),
        };
        last_to_tag = extract_tag(response.header("to"));
        if response.status_code < 200 {
            continue; // provisional, keep waiting
        }
        if response.status_code < 300 {
            let ack_ctx = DialogContext {
                call_id: ctx.call_id.clone(),
                from_tag: ctx.from_tag.clone(),
                cseq: ctx.cseq,
                host: ctx.host.clone(),
                user: ctx.user.clone(),
            };
            let ack = build_request("ACK", &request_uri, &ack_ctx, &new_branch(), last_to_tag.as_deref(), &[], "");
            let _ = send_message(transport, &ack, deadline).await;

            let bye_ctx = DialogContext {
                call_id: ctx.call_id.clone(),
                from_tag: ctx.from_tag.clone(),
                cseq: ctx.cseq + 1,
                host: ctx.host.clone(),
                user: ctx.user.clone(),
            };
            let bye = build_request("BYE", &request_uri, &bye_ctx, &new_branch(), last_to_tag.as_deref(), &[], "");
            let _ = send_message(transport, &bye, deadline).await;

            return Ok(InviteResult {
                outcome: InviteOutcome::Answered { to_tag: last_to_tag },
            });
        }
        // 3xx-6xx: ACK on the *same* branch as the INVITE.
        let ack = build_request("ACK", &request_uri, &ctx, &invite_branch, last_to_tag.as_deref(), &[], "");
        let _ = send_message(transport, &ack, deadline).await;
        return Ok(InviteResult {
            outcome: InviteOutcome::Rejected {
                status_code: response.status_code,
            },
        });
    }
}

fn extract_tag(to_header: Option<&str>) -> Option<String> {
    to_header.and_then(|h| h.split(';').find_map(|part| part.trim().strip_prefix("tag=").map(|s| s.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_challenge_parses_quoted_params_with_commas() {
        let mut headers = HashMap::new();
        headers.insert(
            "www-authenticate".to_string(),
            "Digest realm=\"sip.example\", nonce=\"abc\", algorithm=MD5, qop=\"auth\"".to_string(),
        );
        let response = SipResponse {
            status_code: 401,
            reason: "Unauthorized".to_string(),
            headers,
            body: String::new(),
        };
        let challenge = parse_digest_challenge(&response).unwrap();
        assert_eq!(challenge.realm, "sip.example");
        assert_eq!(challenge.nonce, "abc");
        assert_eq!(challenge.qop.as_deref(), Some("auth"));
    }

    #[test]
    fn extract_tag_finds_tag_param() {
        assert_eq!(extract_tag(Some("<sips:bob@x>;tag=xyz")), Some("xyz".to_string()));
        assert_eq!(extract_tag(Some("<sips:bob@x>")), None);
    }

    #[test]
    fn proxy_authenticate_maps_to_proxy_authorization_header_name() {
        let mut headers = HashMap::new();
        headers.insert(
            "proxy-authenticate".to_string(),
            "Digest realm=\"p\", nonce=\"n\"".to_string(),
        );
        let response = SipResponse {
            status_code: 407,
            reason: "Proxy Authentication Required".to_string(),
            headers,
            body: String::new(),
        };
        let challenge = parse_digest_challenge(&response).unwrap();
        assert_eq!(challenge.header_name, "Proxy-Authorization");
    }
}
