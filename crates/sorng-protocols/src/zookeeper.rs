//! ZooKeeper four-letter-word administrative commands (spec §4.7.g,
//! glossary "4LW"): write exactly four ASCII bytes, read the text reply
//! until the peer closes the socket.

use sorng_wire::{Deadline, GatewayError, GatewayResult, Transport};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const MAX_RESPONSE_BYTES: usize = 1 << 20;

/// Known four-letter words this gateway allows; anything else is rejected
/// before it ever reaches the wire (spec §6 validation is enforced by
/// the core, not the handler).
pub const KNOWN_COMMANDS: &[&str] = &[
    "ruok", "stat", "srvr", "conf", "cons", "crst", "dump", "envi", "gtmk", "isro", "mntr", "srst", "wchs", "wchc",
    "wchp",
];

pub fn is_known_command(word: &str) -> bool {
    KNOWN_COMMANDS.contains(&word)
}

/// Sends a four-letter command and reads the reply to EOF. `word` must be
/// exactly four ASCII characters; the server closes the connection after
/// writing its reply, so the read loop ends on a clean EOF rather than a
/// delimiter.
pub async fn four_letter_word(transport: &mut Transport, word: &str, deadline: Deadline) -> GatewayResult<String> {
    if word.len() != 4 || !word.is_ascii() {
        return Err(GatewayError::invalid_argument(format!(
            "four-letter word must be exactly 4 ASCII characters, got: {word:?}"
        )));
    }
    deadline
        .race(async {
            transport.write_all(word.as_bytes()).await.map_err(GatewayError::from)?;
            transport.flush().await.map_err(GatewayError::from)
        })
        .await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = deadline
            .race(async { transport.read(&mut chunk).await.map_err(GatewayError::from) })
            .await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_RESPONSE_BYTES {
            return Err(GatewayError::protocol_error("4LW response exceeded the size cap"));
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruok_is_known() {
        assert!(is_known_command("ruok"));
    }

    #[test]
    fn unknown_word_is_rejected_by_caller_policy() {
        assert!(!is_known_command("rm -r"));
    }
}
