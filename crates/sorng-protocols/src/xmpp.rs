//! XMPP client and server-to-server (spec §4.7.e): regex-based parsing
//! over a closed element set, not a general XML parser. STARTTLS reuses
//! the shared [`sorng_wire::Transport::upgrade_to_tls`] ownership-transfer
//! upgrade; SASL PLAIN is base64(`\0user\0password`) over UTF-8.

use base64::Engine;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

lazy_static! {
    static ref STREAM_ID_RE: Regex = Regex::new(r#"id=['"]([^'"]+)['"]"#).unwrap();
    static ref STREAM_FROM_RE: Regex = Regex::new(r#"from=['"]([^'"]+)['"]"#).unwrap();
    static ref STREAM_VERSION_RE: Regex = Regex::new(r#"version=['"]([^'"]+)['"]"#).unwrap();
    static ref MECHANISM_RE: Regex = Regex::new(r"<mechanism>([^<]+)</mechanism>").unwrap();
    // Scoped to the <starttls>...</starttls> element so an unrelated
    // <bind><required/></bind> can never be misread as TLS-required
    // (spec §4.7.e / §9).
    static ref STARTTLS_BLOCK_RE: Regex =
        Regex::new(r"(?s)<starttls[^>]*>(.*?)</starttls>").unwrap();
    static ref REQUIRED_RE: Regex = Regex::new(r"<required\s*/>").unwrap();
    static ref PROCEED_RE: Regex = Regex::new(r"<proceed[^>]*/>").unwrap();
    static ref FAILURE_RE: Regex = Regex::new(r"<failure[^>]*>").unwrap();
    static ref SUCCESS_RE: Regex = Regex::new(r"<success[^>]*/?>").unwrap();
}

/// Entity-escapes text destined for an outgoing XML stream: every
/// user-supplied string must pass through this before being concatenated
/// into a stanza (spec §4.7.e).
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

async fn send_raw(transport: &mut Transport, data: &str, deadline: Deadline) -> GatewayResult<()> {
    deadline
        .race(async {
            transport.write_all(data.as_bytes()).await.map_err(GatewayError::from)?;
            transport.flush().await.map_err(GatewayError::from)
        })
        .await
}

/// Reads bytes until a large-enough chunk has accumulated to contain at
/// least one complete top-level stanza for the closed element set this
/// module looks for, or EOF/timeout. XMPP has no outer framing, so this
/// reads opportunistically and lets the regex matchers decide readiness.
async fn read_chunk(transport: &mut Transport, deadline: Deadline) -> GatewayResult<String> {
    let mut buf = vec![0u8; 8192];
    let n = deadline
        .race(async { transport.read(&mut buf).await.map_err(GatewayError::from) })
        .await?;
    if n == 0 {
        return Err(GatewayError::network("peer closed the XMPP stream unexpectedly"));
    }
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

/// Reads chunks until `marker` text is observed or the byte budget / deadline
/// is exhausted.
async fn read_until_contains(transport: &mut Transport, marker_checks: &[&Regex], deadline: Deadline) -> GatewayResult<String> {
    let mut acc = String::new();
    loop {
        acc.push_str(&read_chunk(transport, deadline).await?);
        if marker_checks.iter().any(|re| re.is_match(&acc)) {
            return Ok(acc);
        }
        if acc.len() > 1 << 20 {
            return Err(GatewayError::protocol_error("XMPP response exceeded the size cap without a recognized element"));
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StreamFeatures {
    pub starttls_offered: bool,
    pub starttls_required: bool,
    pub mechanisms: Vec<String>,
}

fn parse_features(xml: &str) -> StreamFeatures {
    let mut features = StreamFeatures::default();
    if let Some(caps) = STARTTLS_BLOCK_RE.captures(xml) {
        features.starttls_offered = true;
        features.starttls_required = REQUIRED_RE.is_match(&caps[1]);
    }
    features.mechanisms = MECHANISM_RE.captures_iter(xml).map(|c| c[1].to_string()).collect();
    features
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub stream_id: Option<String>,
    pub server_version: Option<String>,
}

/// Opens (or re-opens) the XML stream to `domain` and reads back the
/// server's `<stream:stream ...>` header plus `<stream:features>`.
async fn open_stream(transport: &mut Transport, domain: &str, is_s2s: bool, deadline: Deadline) -> GatewayResult<(SessionInfo, StreamFeatures)> {
    let ns = if is_s2s { "jabber:server" } else { "jabber:client" };
    let header = format!(
        "<?xml version='1.0'?><stream:stream to='{}' xmlns='{ns}' xmlns:stream='http://etherx.jabber.org/streams' version='1.0'>",
        escape_xml(domain)
    );
    send_raw(transport, &header, deadline).await?;

    let features_end_re = Regex::new(r"</stream:features>").unwrap();
    let xml = read_until_contains(transport, &[&features_end_re], deadline).await?;

    let stream_id = STREAM_ID_RE.captures(&xml).map(|c| c[1].to_string());
    let server_version = STREAM_VERSION_RE.captures(&xml).map(|c| c[1].to_string());
    let _server_from = STREAM_FROM_RE.captures(&xml).map(|c| c[1].to_string());
    let features = parse_features(&xml);

    Ok((SessionInfo { stream_id, server_version }, features))
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub phases: Vec<String>,
    pub authenticated: bool,
    pub tls_upgraded: bool,
    pub bound_jid: Option<String>,
}

/// Runs the full c2s probe (spec §8 scenario 6): open stream, STARTTLS
/// if offered, SASL PLAIN, re-open, bind resource, optional session.
pub async fn probe_c2s(
    transport: Transport,
    domain: &str,
    username: &str,
    password: &str,
    resource: &str,
    deadline: Deadline,
) -> GatewayResult<ProbeResult> {
    let mut transport = transport;
    let mut phases = Vec::new();

    let (_info, features) = open_stream(&mut transport, domain, false, deadline).await?;
    phases.push("stream_opened".to_string());

    let mut tls_upgraded = false;
    if features.starttls_offered {
        send_raw(&mut transport, "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>", deadline).await?;
        let proceed_or_failure = read_until_contains(&mut transport, &[&PROCEED_RE, &FAILURE_RE], deadline).await?;
        if PROCEED_RE.is_match(&proceed_or_failure) {
            transport = transport.upgrade_to_tls(domain, false, deadline).await?;
            tls_upgraded = true;
            phases.push("starttls_upgraded".to_string());
        } else if features.starttls_required {
            return Err(GatewayError::protocol_error("STARTTLS was required but the server returned <failure/>"));
        }
        // Optional-and-failed: continue in cleartext (spec §4.4.4); the
        // caller can see this from `tls_upgraded == false`.
    }

    let (_info2, features2) = open_stream(&mut transport, domain, false, deadline).await?;
    if tls_upgraded {
        phases.push("stream_restarted".to_string());
    }

    if !features2.mechanisms.iter().any(|m| m == "PLAIN") {
        return Err(GatewayError::protocol_error("server did not advertise SASL PLAIN"));
    }
    let mut plain_payload = Vec::new();
    plain_payload.push(0u8);
    plain_payload.extend_from_slice(username.as_bytes());
    plain_payload.push(0u8);
    plain_payload.extend_from_slice(password.as_bytes());
    let b64 = base64::engine::general_purpose::STANDARD.encode(&plain_payload);
    let auth_stanza = format!("<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>{b64}</auth>");
    send_raw(&mut transport, &auth_stanza, deadline).await?;
    let auth_result = read_until_contains(&mut transport, &[&SUCCESS_RE, &FAILURE_RE], deadline).await?;
    if !SUCCESS_RE.is_match(&auth_result) {
        return Err(GatewayError::auth_failed("SASL PLAIN authentication was rejected"));
    }
    phases.push("authenticated".to_string());

    let (_info3, _features3) = open_stream(&mut transport, domain, false, deadline).await?;
    phases.push("stream_restarted".to_string());

    let bind_id = "bind1";
    let bind_stanza = format!(
        "<iq type='set' id='{bind_id}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>{}</resource></bind></iq>",
        escape_xml(resource)
    );
    send_raw(&mut transport, &bind_stanza, deadline).await?;
    let iq_close_re = Regex::new(r"</iq>").unwrap();
    let bind_response = read_until_contains(&mut transport, &[&iq_close_re], deadline).await?;
    let jid_re = Regex::new(r"<jid>([^<]+)</jid>").unwrap();
    let bound_jid = jid_re.captures(&bind_response).map(|c| c[1].to_string());
    phases.push("resource_bound".to_string());

    let closing = "</stream:stream>";
    let _ = send_raw(&mut transport, closing, deadline).await;
    phases.push("closed".to_string());

    Ok(ProbeResult {
        phases,
        authenticated: true,
        tls_upgraded,
        bound_jid,
    })
}

/// Server-to-server dialback-free probe: opens the s2s stream and reports
/// the advertised features without attempting SASL (s2s auth in this
/// gateway's scope is limited to a diagnostic handshake).
pub async fn probe_s2s(transport: &mut Transport, origin_domain: &str, deadline: Deadline) -> GatewayResult<StreamFeatures> {
    let (_info, features) = open_stream(transport, origin_domain, true, deadline).await?;
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_xml_covers_all_five_entities() {
        assert_eq!(escape_xml("a&b<c>d\"e'f"), "a&amp;b&lt;c&gt;d&quot;e&apos;f");
    }

    #[test]
    fn starttls_required_detected_when_scoped_inside_starttls() {
        let xml = "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls></stream:features>";
        let f = parse_features(xml);
        assert!(f.starttls_offered);
        assert!(f.starttls_required);
    }

    #[test]
    fn unrelated_bind_required_is_not_mistaken_for_starttls_required() {
        let xml = "<stream:features><starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><required/></bind></stream:features>";
        let f = parse_features(xml);
        assert!(f.starttls_offered);
        assert!(!f.starttls_required);
    }

    #[test]
    fn mechanisms_are_extracted_in_order() {
        let xml = "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism><mechanism>SCRAM-SHA-1</mechanism></mechanisms>";
        let f = parse_features(xml);
        assert_eq!(f.mechanisms, vec!["PLAIN".to_string(), "SCRAM-SHA-1".to_string()]);
    }

    #[test]
    fn stream_id_regex_extracts_quoted_value() {
        let xml = "<stream:stream id='c2s_123' from='example.com'>";
        assert_eq!(STREAM_ID_RE.captures(xml).unwrap()[1].to_string(), "c2s_123");
    }
}
