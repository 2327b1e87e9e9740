//! Crypto Helpers (spec §4.6): a hand-rolled MD5 (RFC 1321), the SIP
//! digest algorithm built on top of it (RFC 2617), and the TDS 5.0
//! password obfuscation XOR. base64/hex live in [`crate::codec`].
//!
//! None of the protocols this gateway speaks authenticate with anything
//! stronger than MD5-based digest auth or a reversible XOR, so that is all
//! that lives here — this is not a general-purpose crypto module.

/// RFC 1321 MD5. Returns the 16-byte digest.
pub fn md5(input: &[u8]) -> [u8; 16] {
    const S: [u32; 64] = [
        7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 5, 9, 14, 20, 5, 9, 14, 20, 5,
        9, 14, 20, 5, 9, 14, 20, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 6,
        10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
    ];
    const K: [u32; 64] = [
        0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613,
        0xfd469501, 0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193,
        0xa679438e, 0x49b40821, 0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d,
        0x02441453, 0xd8a1e681, 0xe7d3fbc8, 0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed,
        0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a, 0xfffa3942, 0x8771f681, 0x6d9d6122,
        0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70, 0x289b7ec6, 0xeaa127fa,
        0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665, 0xf4292244,
        0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
        0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb,
        0xeb86d391,
    ];

    let mut a0: u32 = 0x67452301;
    let mut b0: u32 = 0xefcdab89;
    let mut c0: u32 = 0x98badcfe;
    let mut d0: u32 = 0x10325476;

    let mut msg = input.to_vec();
    let bit_len = (input.len() as u64).wrapping_mul(8);
    msg.push(0x80);
    while msg.len() % 64 != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_le_bytes());

    for chunk in msg.chunks(64) {
        let mut m = [0u32; 16];
        for (i, word) in chunk.chunks(4).enumerate() {
            m[i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        }

        let mut a = a0;
        let mut b = b0;
        let mut c = c0;
        let mut d = d0;

        for i in 0..64 {
            let (f, g) = if i < 16 {
                ((b & c) | (!b & d), i)
            } else if i < 32 {
                ((d & b) | (!d & c), (5 * i + 1) % 16)
            } else if i < 48 {
                (b ^ c ^ d, (3 * i + 5) % 16)
            } else {
                (c ^ (b | !d), (7 * i) % 16)
            };
            let f = f
                .wrapping_add(a)
                .wrapping_add(K[i])
                .wrapping_add(m[g]);
            a = d;
            d = c;
            c = b;
            b = b.wrapping_add(f.rotate_left(S[i]));
        }

        a0 = a0.wrapping_add(a);
        b0 = b0.wrapping_add(b);
        c0 = c0.wrapping_add(c);
        d0 = d0.wrapping_add(d);
    }

    let mut out = [0u8; 16];
    out[0..4].copy_from_slice(&a0.to_le_bytes());
    out[4..8].copy_from_slice(&b0.to_le_bytes());
    out[8..12].copy_from_slice(&c0.to_le_bytes());
    out[12..16].copy_from_slice(&d0.to_le_bytes());
    out
}

pub fn md5_hex(input: &[u8]) -> String {
    crate::codec::to_hex(&md5(input))
}

/// RFC 2617 digest auth, `qop=auth` or unqualified. `HA1 = MD5(user:realm:pass)`,
/// `HA2 = MD5(method:uri)`, response per RFC 2617 §3.2.2.1.
pub struct DigestParams<'a> {
    pub username: &'a str,
    pub realm: &'a str,
    pub password: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    /// `Some((nc, cnonce))` when the server requested `qop=auth`.
    pub qop_auth: Option<(&'a str, &'a str)>,
}

pub fn sip_digest_response(p: &DigestParams<'_>) -> String {
    let ha1 = md5_hex(format!("{}:{}:{}", p.username, p.realm, p.password).as_bytes());
    let ha2 = md5_hex(format!("{}:{}", p.method, p.uri).as_bytes());
    let input = match p.qop_auth {
        Some((nc, cnonce)) => format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", p.nonce),
        None => format!("{ha1}:{}:{ha2}", p.nonce),
    };
    md5_hex(input.as_bytes())
}

/// TDS 5.0 LOGIN password obfuscation: XOR every byte with `0xA5`.
/// Symmetric — the same function both obfuscates and de-obfuscates.
pub fn tds_password_obfuscate(password: &[u8]) -> Vec<u8> {
    password.iter().map(|&b| b ^ 0xA5).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_string_matches_rfc1321_test_vector() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn md5_of_abc_matches_rfc1321_test_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn md5_of_longer_string_matches_rfc1321_test_vector() {
        assert_eq!(
            md5_hex(b"message digest"),
            "f96b697d7cb7938d525a2f31aaf161d0"
        );
    }

    #[test]
    fn md5_of_alphabet_matches_rfc1321_test_vector() {
        assert_eq!(
            md5_hex(b"abcdefghijklmnopqrstuvwxyz"),
            "c3fcd3d76192e4007dfb496cca67e13b"
        );
    }

    #[test]
    fn sip_digest_with_qop_auth_matches_rfc2617_example() {
        // RFC 2617 §3.5 worked example.
        let p = DigestParams {
            username: "Mufasa",
            realm: "testrealm@host.com",
            password: "Circle Of Life",
            method: "GET",
            uri: "/dir/index.html",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            qop_auth: Some(("00000001", "0a4f113b")),
        };
        let resp = sip_digest_response(&p);
        assert_eq!(resp, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn tds_obfuscate_is_involutive() {
        let pw = b"letmein".to_vec();
        let obfuscated = tds_password_obfuscate(&pw);
        let back = tds_password_obfuscate(&obfuscated);
        assert_eq!(back, pw);
    }

    #[test]
    fn tds_obfuscate_changes_every_byte() {
        let pw = b"aaaa".to_vec();
        let obfuscated = tds_password_obfuscate(&pw);
        assert!(obfuscated.iter().all(|&b| b != b'a'));
    }
}
